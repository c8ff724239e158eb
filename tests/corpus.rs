// Corpus-level tests: clustering, insights, theme categories and store parity.
//
// These run whole-corpus operations over small fixed datasets. Dates are in
// early 2025 so the recent-window rules see nothing and the results do not
// depend on when the tests run.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use rusqlite::Connection;

use verbatim::clustering::hashing::HashingEmbedder;
use verbatim::clustering::TextEmbedder;
use verbatim::db::memory::MemoryStore;
use verbatim::db::models::{EvaluationRecord, NOISE_CLUSTER_ID};
use verbatim::db::schema::create_tables;
use verbatim::db::sqlite::SqliteStore;
use verbatim::db::Store;
use verbatim::insights::analytics::TrendQuery;
use verbatim::insights::models::{InsightFilter, InsightKind, InsightType, Metric, Scope, TrendDirection};
use verbatim::language::{Language, LanguageRouter};
use verbatim::sentiment::lexicon::LexiconModel;
use verbatim::sentiment::registry::ModelRegistry;
use verbatim::sentiment::stage::{SentimentSettings, SentimentStage};
use verbatim::themes::extract::ThemeExtractor;
use verbatim::themes::taxonomy::Category;
use verbatim::{Pipeline, PipelineError, PipelineParts, PipelineSettings};

// ============================================================
// Helpers
// ============================================================

/// Hashing embedder that can be switched off.
struct SwitchableEmbedder {
    inner: HashingEmbedder,
    down: AtomicBool,
}

#[async_trait]
impl TextEmbedder for SwitchableEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f64>>> {
        if self.down.load(Ordering::SeqCst) {
            anyhow::bail!("embedding service down");
        }
        self.inner.embed_batch(texts).await
    }

    fn name(&self) -> &'static str {
        "switchable"
    }
}

fn pipeline_over(store: Arc<dyn Store>) -> Pipeline {
    pipeline_embedding_with(store, Arc::new(HashingEmbedder::default()))
}

fn pipeline_embedding_with(store: Arc<dyn Store>, embedder: Arc<dyn TextEmbedder>) -> Pipeline {
    Pipeline::new(PipelineParts {
        store,
        sentiment: SentimentStage::new(
            Arc::new(LexiconModel::new()),
            ModelRegistry::default(),
            SentimentSettings::default(),
        ),
        embedder,
        router: LanguageRouter::default(),
        extractor: ThemeExtractor::default(),
        settings: PipelineSettings {
            recluster_threshold: 0,
            insight_threshold: 0,
            ..PipelineSettings::default()
        },
    })
}

fn memory_pipeline() -> Pipeline {
    pipeline_over(Arc::new(MemoryStore::new()))
}

fn sqlite_pipeline() -> Pipeline {
    let conn = Connection::open_in_memory().unwrap();
    create_tables(&conn).unwrap();
    pipeline_over(Arc::new(SqliteStore::new(conn)))
}

fn evaluation(id: &str, trainer: &str, satisfaction: u8, comment: &str, day: i64) -> EvaluationRecord {
    let start = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
    EvaluationRecord {
        id: id.to_string(),
        formation_id: format!("F-{trainer}"),
        formation_type: "bureautique".to_string(),
        trainer_id: trainer.to_string(),
        satisfaction,
        content: satisfaction,
        logistics: 3,
        applicability: satisfaction,
        comment: comment.to_string(),
        language: Some("FR".to_string()),
        date: start + Duration::days(day),
    }
}

/// Three groups of four identical comments.
fn grouped_corpus() -> Vec<EvaluationRecord> {
    let comments = [
        "Le formateur était passionné et patient",
        "Salle trop petite, climatisation en panne",
        "Contenu pertinent, exercices concrets",
    ];
    comments
        .iter()
        .enumerate()
        .flat_map(|(g, comment)| {
            (0..4).map(move |i| evaluation(&format!("g{g}-{i}"), "T9", 4, comment, i))
        })
        .collect()
}

/// T1 is rated poorly ten times, T2 well five times.
fn alert_corpus() -> Vec<EvaluationRecord> {
    let mut records: Vec<EvaluationRecord> = (0..10)
        .map(|i| {
            let satisfaction = if i % 2 == 0 { 1 } else { 2 };
            evaluation(&format!("t1-{i:02}"), "T1", satisfaction, "Formateur pas clair", i)
        })
        .collect();
    records.extend(
        (0..5).map(|i| evaluation(&format!("t2-{i:02}"), "T2", 5, "Formateur excellent", i)),
    );
    records
}

async fn theme_counts(pipeline: &Pipeline) -> Vec<(String, Language, u64)> {
    let mut counts: Vec<(String, Language, u64)> = pipeline
        .list_themes(usize::MAX, None)
        .await
        .unwrap()
        .into_iter()
        .map(|t| (t.name, t.language, t.frequency))
        .collect();
    counts.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    counts
}

// ============================================================
// Clustering
// ============================================================

#[tokio::test]
async fn recluster_partitions_every_result() {
    let pipeline = memory_pipeline();
    let mut records = grouped_corpus();
    records.push(evaluation("lone", "T9", 3, "Parking introuvable le matin", 20));
    pipeline.analyze_batch(&records).await;

    let clusters = pipeline.recluster().await.unwrap();
    let results = pipeline.store().list_results().await.unwrap();

    let total: usize = clusters.iter().map(|c| c.size()).sum();
    assert_eq!(total, results.len());

    let mut seen = HashSet::new();
    for cluster in &clusters {
        for member in &cluster.members {
            assert!(seen.insert(member.clone()), "{member} is in two clusters");
        }
    }

    for result in &results {
        let owner = clusters
            .iter()
            .find(|c| c.members.contains(&result.record_id))
            .unwrap();
        assert_eq!(result.cluster_id, Some(owner.id), "{}", result.record_id);
    }
}

#[tokio::test]
async fn identical_comments_cluster_together() {
    let pipeline = memory_pipeline();
    let mut records = grouped_corpus();
    records.push(evaluation("lone", "T9", 3, "Parking introuvable le matin", 20));
    pipeline.analyze_batch(&records).await;

    let clusters = pipeline.recluster().await.unwrap();

    let grouped: Vec<_> = clusters.iter().filter(|c| !c.is_noise()).collect();
    assert_eq!(grouped.len(), 3);
    for cluster in &grouped {
        assert_eq!(cluster.size(), 4);
        let prefix = &cluster.members[0][..2];
        assert!(cluster.members.iter().all(|m| m.starts_with(prefix)));
    }

    let noise = clusters.iter().find(|c| c.is_noise()).unwrap();
    assert_eq!(noise.id, NOISE_CLUSTER_ID);
    assert_eq!(noise.members, vec!["lone".to_string()]);
}

#[tokio::test]
async fn recluster_is_deterministic() {
    let pipeline = memory_pipeline();
    pipeline.analyze_batch(&grouped_corpus()).await;

    let first = pipeline.recluster().await.unwrap();
    let second = pipeline.recluster().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(pipeline.list_clusters().await.unwrap(), second);
}

#[tokio::test]
async fn recluster_on_empty_corpus_is_empty() {
    let pipeline = memory_pipeline();
    assert!(pipeline.recluster().await.unwrap().is_empty());
}

// ============================================================
// Insights
// ============================================================

#[tokio::test]
async fn low_rated_trainer_gets_one_confident_alert() {
    let pipeline = memory_pipeline();
    pipeline.analyze_batch(&alert_corpus()).await;

    let insights = pipeline.generate_insights(None).await;
    let alerts: Vec<_> = insights
        .iter()
        .filter(|i| {
            i.insight_type() == InsightType::Alert && i.scope == Scope::Trainer("T1".into())
        })
        .collect();

    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].confidence > 0.7, "confidence {}", alerts[0].confidence);
    match &alerts[0].kind {
        InsightKind::Alert(data) => {
            assert_eq!(data.sample_size, 10);
            assert!(data.value < 3.0);
        }
        other => panic!("expected an alert payload, got {other:?}"),
    }

    assert!(!insights.iter().any(|i| {
        i.insight_type() == InsightType::Alert && i.scope == Scope::Trainer("T2".into())
    }));
}

#[tokio::test]
async fn regenerating_insights_is_idempotent() {
    let pipeline = memory_pipeline();
    pipeline.analyze_batch(&alert_corpus()).await;

    let first = pipeline.generate_insights(None).await;
    let second = pipeline.generate_insights(None).await;

    assert!(!first.is_empty());
    assert_eq!(first, second);

    let stored = pipeline
        .list_insights(usize::MAX, &InsightFilter::default())
        .await
        .unwrap();
    assert_eq!(stored.len(), first.len());
}

#[tokio::test]
async fn resolved_alert_is_removed_on_regeneration() {
    let pipeline = memory_pipeline();
    let mut records = alert_corpus();
    pipeline.analyze_batch(&records).await;
    pipeline.generate_insights(None).await;

    // T1's ratings are corrected upstream and re-ingested
    for record in records.iter_mut().filter(|r| r.trainer_id == "T1") {
        record.satisfaction = 5;
        record.content = 5;
        record.applicability = 5;
    }
    pipeline.analyze_batch(&records).await;
    pipeline.generate_insights(None).await;

    let filter = InsightFilter {
        kind: Some(InsightType::Alert),
        scope: Some(Scope::Trainer("T1".into())),
        min_confidence: None,
    };
    assert!(pipeline.list_insights(10, &filter).await.unwrap().is_empty());
}

#[tokio::test]
async fn scoped_generation_leaves_other_scopes_alone() {
    let pipeline = memory_pipeline();
    pipeline.analyze_batch(&alert_corpus()).await;
    let all = pipeline.generate_insights(None).await;

    let t1 = Scope::Trainer("T1".into());
    let scoped = pipeline.generate_insights(Some(&t1)).await;
    assert!(!scoped.is_empty());
    assert!(scoped.iter().all(|i| i.scope == t1));

    let stored = pipeline
        .list_insights(usize::MAX, &InsightFilter::default())
        .await
        .unwrap();
    assert_eq!(stored.len(), all.len());
}

#[tokio::test]
async fn insight_listing_applies_filter_and_limit() {
    let pipeline = memory_pipeline();
    pipeline.analyze_batch(&alert_corpus()).await;
    pipeline.generate_insights(None).await;

    let filter = InsightFilter {
        kind: Some(InsightType::Alert),
        scope: None,
        min_confidence: Some(0.5),
    };
    let listed = pipeline.list_insights(1, &filter).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].insight_type(), InsightType::Alert);
    assert!(listed[0].confidence >= 0.5);
}

// ============================================================
// Themes and stats
// ============================================================

#[tokio::test]
async fn category_shares_sum_to_one_hundred() {
    let pipeline = memory_pipeline();
    pipeline.analyze_batch(&grouped_corpus()).await;

    let breakdown = pipeline.theme_categories(50).await.unwrap();
    assert_eq!(breakdown.len(), 5);
    let total: f64 = breakdown.iter().map(|b| b.percentage).sum();
    assert!((total - 100.0).abs() < 1e-6, "total {total}");
}

#[tokio::test]
async fn stats_reflect_the_corpus() {
    let pipeline = memory_pipeline();
    pipeline.analyze_batch(&alert_corpus()).await;

    let stats = pipeline.stats().await.unwrap();
    assert_eq!(stats.total_records, 15);
    assert_eq!(stats.analyzed, 15);
    assert_eq!(stats.needs_reprocessing, 0);
    assert_eq!(stats.languages.get("FR"), Some(&15));
    assert_eq!(stats.formation_types.get("bureautique"), Some(&15));
}

// ============================================================
// SqliteStore behaves like MemoryStore
// ============================================================

#[tokio::test]
async fn sqlite_and_memory_stores_agree() {
    let memory = memory_pipeline();
    let sqlite = sqlite_pipeline();

    let mut records = alert_corpus();
    records.extend(grouped_corpus());

    for pipeline in [&memory, &sqlite] {
        let outcome = pipeline.analyze_batch(&records).await;
        assert_eq!(outcome.succeeded(), records.len());
        pipeline.recluster().await.unwrap();
        pipeline.generate_insights(None).await;
    }

    assert_eq!(theme_counts(&memory).await, theme_counts(&sqlite).await);

    let members = |clusters: Vec<verbatim::db::models::Cluster>| {
        clusters
            .into_iter()
            .map(|c| (c.id, c.members))
            .collect::<Vec<_>>()
    };
    assert_eq!(
        members(memory.list_clusters().await.unwrap()),
        members(sqlite.list_clusters().await.unwrap())
    );

    let keys = |insights: Vec<verbatim::insights::models::Insight>| {
        let mut keys: Vec<String> = insights.into_iter().map(|i| i.key).collect();
        keys.sort();
        keys
    };
    let filter = InsightFilter::default();
    assert_eq!(
        keys(memory.list_insights(usize::MAX, &filter).await.unwrap()),
        keys(sqlite.list_insights(usize::MAX, &filter).await.unwrap())
    );

    let m = memory.store().counts().await.unwrap();
    let s = sqlite.store().counts().await.unwrap();
    assert_eq!((m.records, m.results, m.clusters), (s.records, s.results, s.clusters));
}

// ============================================================
// Clustering failures
// ============================================================

#[tokio::test]
async fn failed_recluster_keeps_previous_clusters() {
    let embedder = Arc::new(SwitchableEmbedder {
        inner: HashingEmbedder::default(),
        down: AtomicBool::new(false),
    });
    let pipeline = pipeline_embedding_with(Arc::new(MemoryStore::new()), embedder.clone());
    pipeline.analyze_batch(&grouped_corpus()).await;

    pipeline.recluster().await.unwrap();
    let before = pipeline.list_clusters().await.unwrap();
    assert!(!before.is_empty());
    let assignments = |results: Vec<verbatim::db::models::AnalysisResult>| {
        results
            .into_iter()
            .map(|r| (r.record_id, r.cluster_id))
            .collect::<Vec<_>>()
    };
    let assigned_before = assignments(pipeline.store().list_results().await.unwrap());

    embedder.down.store(true, Ordering::SeqCst);
    let err = pipeline.recluster().await.unwrap_err();
    assert!(matches!(err, PipelineError::Clustering(_)), "got {err}");
    assert!(err.to_string().contains("embedding service down"));

    assert_eq!(pipeline.list_clusters().await.unwrap(), before);
    assert_eq!(
        assignments(pipeline.store().list_results().await.unwrap()),
        assigned_before
    );
}

// ============================================================
// Trends and formation comparison
// ============================================================

#[tokio::test]
async fn trends_can_be_scoped_to_one_trainer() {
    let pipeline = memory_pipeline();
    pipeline.analyze_batch(&alert_corpus()).await;

    // T1: week of Jan 6 averages 10/7, week of Jan 13 averages 5/3
    let t1 = pipeline
        .analyze_trends(&TrendQuery {
            trainer: Some("T1".to_string()),
            ..TrendQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(t1.evaluations, 10);
    let satisfaction = &t1.metrics[0];
    assert_eq!(satisfaction.metric, Metric::Satisfaction);
    assert_eq!(satisfaction.windows.len(), 2);
    assert!((satisfaction.slope.unwrap() - 5.0 / 21.0).abs() < 1e-9);
    assert_eq!(satisfaction.direction, Some(TrendDirection::Rising));
    // "pas clair" reads negative in every week
    assert!(t1.sentiment.iter().all(|w| w.mean < 0.0));

    // T2 was only rated in one week
    let t2 = pipeline
        .analyze_trends(&TrendQuery {
            trainer: Some("T2".to_string()),
            ..TrendQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(t2.evaluations, 5);
    assert_eq!(t2.metrics[0].slope, None);
}

#[tokio::test]
async fn trend_window_excludes_older_evaluations() {
    let pipeline = memory_pipeline();
    pipeline.analyze_batch(&alert_corpus()).await;

    // Every fixture date is in January 2025
    let report = pipeline
        .analyze_trends(&TrendQuery {
            days: Some(30),
            ..TrendQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(report.evaluations, 0);
    assert!(report.since.is_some());
}

#[tokio::test]
async fn formations_compare_side_by_side() {
    let pipeline = memory_pipeline();
    let records: Vec<EvaluationRecord> = alert_corpus()
        .into_iter()
        .map(|mut r| {
            if r.trainer_id == "T2" {
                r.formation_type = "langues".to_string();
            }
            r
        })
        .collect();
    pipeline.analyze_batch(&records).await;

    let columns = pipeline.compare_formations(&[]).await.unwrap();
    let names: Vec<&str> = columns.iter().map(|c| c.formation_type.as_str()).collect();
    assert_eq!(names, vec!["bureautique", "langues"]);

    let office = &columns[0];
    assert_eq!(office.evaluations, 10);
    assert_eq!(office.metric_means[0], (Metric::Satisfaction, 1.5));
    assert_eq!(office.negative_share, Some(1.0));
    assert!(office.top_themes.contains(&("formateur".to_string(), 10)));
    assert!(office.categories.get(&Category::Trainer).copied().unwrap_or(0) >= 10);

    let languages = &columns[1];
    assert_eq!(languages.evaluations, 5);
    assert_eq!(languages.metric_means[0], (Metric::Satisfaction, 5.0));
    assert_eq!(languages.negative_share, Some(0.0));
    assert!(languages.mean_sentiment.unwrap() > 0.0);

    // Asking for one type by name, plus one that has no data
    let wanted = vec!["langues".to_string(), "python".to_string()];
    let columns = pipeline.compare_formations(&wanted).await.unwrap();
    assert_eq!(columns.len(), 2);
    assert_eq!(columns[0].evaluations, 5);
    assert_eq!(columns[1].evaluations, 0);
}
