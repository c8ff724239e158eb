// Analysis pipeline — record in, analysis artifacts out.
//
// The Pipeline owns every stage and the state they share (store handle,
// result cache, locks), so tests can build as many isolated pipelines as
// they like. Flow per record:
// 1. Route the comment to a language
// 2. Fingerprint (normalized text, language, model version)
// 3. Reuse the stored result if its fingerprint is current
// 4. Otherwise classify sentiment and extract themes through the cache
// 5. Persist the record and result, fold theme frequency changes
//
// Clustering and insight generation run over the whole corpus, on request or
// after a batch crosses its size threshold.

pub mod batch;
pub mod locks;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::cache::{fingerprint, CacheStats, CachedAnalysis, ResultCache};
use crate::clustering::{build_clusters, dbscan, ClusterParams, TextEmbedder};
use crate::db::models::{AnalysisResult, Cluster, EvaluationRecord, Theme, ThemeTag};
use crate::db::Store;
use crate::error::PipelineError;
use crate::insights::analytics::{
    compare_formations, trend_report, FormationComparison, TrendQuery, TrendReport,
};
use crate::insights::generator::{generate, InsightInput};
use crate::insights::models::{Insight, InsightFilter, InsightThresholds, Metric, Scope};
use crate::insights::stats::mean;
use crate::language::{Language, LanguageRouter};
use crate::sentiment::stage::SentimentStage;
use crate::themes::extract::{ThemeExtractor, ThemeTally};
use crate::themes::taxonomy::{categorize, Category};

pub use batch::{BatchOutcome, FailedRecord};
use locks::KeyedLocks;

/// Themes listed per formation type in a comparison.
const COMPARISON_TOP_THEMES: usize = 5;

/// Knobs for orchestration. Stage-specific settings live with their stage.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Records classified at once within a batch
    pub concurrency: usize,
    /// Successful records in one batch that trigger a recluster (0 = never)
    pub recluster_threshold: usize,
    /// Successful records in one batch that trigger insight regeneration (0 = never)
    pub insight_threshold: usize,
    /// Fingerprint component; bump it to invalidate every cached result
    pub model_version: String,
    pub cluster: ClusterParams,
    pub insights: InsightThresholds,
    /// Draw a progress bar during batches
    pub show_progress: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            concurrency: 8,
            recluster_threshold: 50,
            insight_threshold: 20,
            model_version: "1".to_string(),
            cluster: ClusterParams::default(),
            insights: InsightThresholds::default(),
            show_progress: false,
        }
    }
}

/// Everything a Pipeline is built from.
pub struct PipelineParts {
    pub store: Arc<dyn Store>,
    pub sentiment: SentimentStage,
    pub embedder: Arc<dyn TextEmbedder>,
    pub router: LanguageRouter,
    pub extractor: ThemeExtractor,
    pub settings: PipelineSettings,
}

pub struct Pipeline {
    store: Arc<dyn Store>,
    cache: ResultCache,
    sentiment: SentimentStage,
    embedder: Arc<dyn TextEmbedder>,
    router: LanguageRouter,
    extractor: ThemeExtractor,
    settings: PipelineSettings,
    record_locks: KeyedLocks,
    insight_locks: KeyedLocks,
    recluster_lock: Mutex<()>,
}

/// One record's analysis, relative to what was stored before.
pub(crate) struct Processed {
    pub result: AnalysisResult,
    /// The result this one replaced, if any
    pub previous: Option<AnalysisResult>,
    /// The stored result was still current and was returned as-is
    pub reused: bool,
}

/// Per-category share of the most frequent themes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryBreakdown {
    pub category: Category,
    pub themes: usize,
    pub frequency: u64,
    /// Share of the total frequency, 0 to 100
    pub percentage: f64,
}

/// Corpus-wide aggregates for the dashboard view.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CorpusStats {
    pub total_records: usize,
    pub analyzed: usize,
    pub needs_reprocessing: usize,
    pub metric_means: Vec<(Metric, f64)>,
    pub sentiments: BTreeMap<String, usize>,
    pub languages: BTreeMap<String, usize>,
    pub formation_types: BTreeMap<String, usize>,
}

impl Pipeline {
    pub fn new(parts: PipelineParts) -> Self {
        Self {
            store: parts.store,
            cache: ResultCache::new(),
            sentiment: parts.sentiment,
            embedder: parts.embedder,
            router: parts.router,
            extractor: parts.extractor,
            settings: parts.settings,
            record_locks: KeyedLocks::new(),
            insight_locks: KeyedLocks::new(),
            recluster_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn sentiment_backend(&self) -> &'static str {
        self.sentiment.backend_name()
    }

    pub fn embedder_name(&self) -> &'static str {
        self.embedder.name()
    }

    /// Analyze one record and persist the result.
    ///
    /// Only validation and storage failures are errors. A classifier that is
    /// down yields a neutral result flagged `needs_reprocessing`.
    pub async fn analyze(&self, record: &EvaluationRecord) -> Result<AnalysisResult, PipelineError> {
        record.validate()?;
        let processed = self.process(record).await?;

        let mut tally = ThemeTally::new();
        fold_themes(&mut tally, &processed);
        if !tally.is_empty() {
            self.store.add_theme_counts(&tally.deltas()).await?;
        }
        Ok(processed.result)
    }

    /// Analyze and persist one already-validated record. Theme counts are
    /// left to the caller so a batch can write them in one go.
    pub(crate) async fn process(&self, record: &EvaluationRecord) -> Result<Processed, PipelineError> {
        let _guard = self.record_locks.lock(&record.id).await;

        let resolution = self
            .router
            .resolve(&record.comment, record.language.as_deref());
        let language = resolution.language;
        let fp = fingerprint(&record.comment, language, &self.settings.model_version);

        let previous = self.store.get_result(&record.id).await?;
        if let Some(prev) = &previous {
            if prev.fingerprint == fp && !prev.needs_reprocessing {
                debug!(record_id = %record.id, "Stored result is current, reusing");
                self.store.put_record(record).await?;
                return Ok(Processed {
                    result: prev.clone(),
                    previous: None,
                    reused: true,
                });
            }
        }

        let analysis = self
            .cache
            .get_or_compute(&fp, || self.compute(&record.comment, language))
            .await;

        let result = AnalysisResult {
            record_id: record.id.clone(),
            language,
            sentiment: analysis.sentiment.label,
            score: analysis.sentiment.score,
            confidence: analysis.sentiment.confidence,
            themes: analysis.themes,
            cluster_id: previous.as_ref().and_then(|p| p.cluster_id),
            fingerprint: fp,
            model_version: self.settings.model_version.clone(),
            needs_reprocessing: analysis.sentiment.degraded,
            analyzed_at: Utc::now(),
        };

        self.store.put_record(record).await?;
        self.store.put_result(&result).await?;

        debug!(
            record_id = %record.id,
            language = %language,
            language_declared = resolution.declared,
            sentiment = %result.sentiment,
            themes = result.themes.len(),
            degraded = result.needs_reprocessing,
            "Record analyzed"
        );

        Ok(Processed {
            result,
            previous,
            reused: false,
        })
    }

    /// The text-only part of an analysis; this is what the cache stores.
    async fn compute(&self, text: &str, language: Language) -> CachedAnalysis {
        let sentiment = self.sentiment.classify(text, language).await;
        let themes = self
            .extractor
            .extract(text, language)
            .into_iter()
            .map(|name| ThemeTag {
                category: categorize(&name, language),
                name,
            })
            .collect();
        CachedAnalysis { sentiment, themes }
    }

    /// Recompute clusters over every analyzed record and replace the stored set.
    ///
    /// On failure the previous clusters stay in place.
    pub async fn recluster(&self) -> Result<Vec<Cluster>, PipelineError> {
        let _guard = self.recluster_lock.lock().await;

        let results = self.store.list_results().await?;
        let records = self.store.list_records().await?;
        let comments: BTreeMap<&str, &str> = records
            .iter()
            .map(|r| (r.id.as_str(), r.comment.as_str()))
            .collect();

        // list_results is ordered by record id, which fixes the DBSCAN input order
        let texts: Vec<String> = results
            .iter()
            .map(|r| {
                comments
                    .get(r.record_id.as_str())
                    .copied()
                    .unwrap_or_default()
                    .to_string()
            })
            .collect();

        let vectors = self
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(|e| PipelineError::Clustering(format!("embedding failed: {e:#}")))?;
        if vectors.len() != texts.len() {
            return Err(PipelineError::Clustering(format!(
                "embedder returned {} vectors for {} comments",
                vectors.len(),
                texts.len()
            )));
        }

        let params = self.settings.cluster;
        let labels = tokio::task::spawn_blocking(move || dbscan(&vectors, &params))
            .await
            .map_err(|e| PipelineError::Clustering(format!("clustering task failed: {e}")))?;

        let clusters = build_clusters(&results, &labels);
        self.store
            .replace_clusters(&clusters)
            .await
            .map_err(|e| PipelineError::Clustering(format!("could not store clusters: {e:#}")))?;

        info!(
            records = results.len(),
            clusters = clusters.iter().filter(|c| !c.is_noise()).count(),
            noise = clusters.iter().find(|c| c.is_noise()).map_or(0, |c| c.size()),
            embedder = self.embedder.name(),
            "Reclustered corpus"
        );
        Ok(clusters)
    }

    /// Most frequent themes, optionally for one language.
    pub async fn list_themes(
        &self,
        top_n: usize,
        language: Option<Language>,
    ) -> Result<Vec<Theme>, PipelineError> {
        let themes = self.store.list_themes().await?;
        Ok(themes
            .into_iter()
            .filter(|t| language.map_or(true, |l| t.language == l))
            .take(top_n)
            .collect())
    }

    pub async fn list_clusters(&self) -> Result<Vec<Cluster>, PipelineError> {
        Ok(self.store.list_clusters().await?)
    }

    /// Stored insights matching `filter`, most confident first.
    pub async fn list_insights(
        &self,
        limit: usize,
        filter: &InsightFilter,
    ) -> Result<Vec<Insight>, PipelineError> {
        let insights = self.store.list_insights().await?;
        Ok(insights
            .into_iter()
            .filter(|i| filter.matches(i))
            .take(limit)
            .collect())
    }

    /// Regenerate insights, for one scope or for all of them.
    ///
    /// Each (scope, type) group is rewritten under its own lock: current
    /// findings are upserted by key, findings that no longer hold are removed.
    /// Failures are logged and the insights written so far are returned.
    pub async fn generate_insights(&self, scope: Option<&Scope>) -> Vec<Insight> {
        let (records, results) = match self.load_corpus().await {
            Ok(corpus) => corpus,
            Err(e) => {
                let err = PipelineError::InsightGeneration(format!("{e}"));
                error!(error = %err, "Could not load corpus for insights");
                return Vec::new();
            }
        };

        let input = InsightInput {
            records: &records,
            results: &results,
        };
        let fresh = generate(&input, &self.settings.insights, scope, Utc::now());

        let stored = match self.store.list_insights().await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Could not list stored insights, stale ones will linger");
                Vec::new()
            }
        };

        // group key -> (fresh insights, stored keys)
        let mut groups: BTreeMap<String, (Vec<Insight>, Vec<String>)> = BTreeMap::new();
        for insight in fresh {
            groups
                .entry(group_key(&insight))
                .or_default()
                .0
                .push(insight);
        }
        for insight in stored
            .into_iter()
            .filter(|i| scope.map_or(true, |s| &i.scope == s))
        {
            groups
                .entry(group_key(&insight))
                .or_default()
                .1
                .push(insight.key);
        }

        let mut saved = Vec::new();
        let mut removed = 0usize;
        for (key, (fresh, stored_keys)) in groups {
            let _guard = self.insight_locks.lock(&key).await;

            let fresh_keys: HashSet<&str> = fresh.iter().map(|i| i.key.as_str()).collect();
            let stale: Vec<String> = stored_keys
                .into_iter()
                .filter(|k| !fresh_keys.contains(k.as_str()))
                .collect();

            for insight in &fresh {
                match self.store.upsert_insight(insight).await {
                    Ok(stored) => saved.push(stored),
                    Err(e) => {
                        let err = PipelineError::InsightGeneration(format!("{e:#}"));
                        warn!(group = %key, insight = %insight.key, error = %err, "Insight not saved");
                    }
                }
            }

            if !stale.is_empty() {
                match self.store.delete_insights(&stale).await {
                    Ok(()) => removed += stale.len(),
                    Err(e) => warn!(group = %key, error = %e, "Stale insights not removed"),
                }
            }
        }

        saved.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.key.cmp(&b.key))
        });

        info!(
            scope = %scope.map_or_else(|| "all".to_string(), |s| s.to_string()),
            saved = saved.len(),
            removed = removed,
            "Insights regenerated"
        );
        saved
    }

    /// How the top `top_n` themes split across categories. Every category
    /// appears, in display order, even with zero themes.
    pub async fn theme_categories(
        &self,
        top_n: usize,
    ) -> Result<Vec<CategoryBreakdown>, PipelineError> {
        let themes = self.list_themes(top_n, None).await?;
        let total: u64 = themes.iter().map(|t| t.frequency).sum();

        Ok(Category::MATCH_ORDER
            .iter()
            .copied()
            .chain(std::iter::once(Category::Other))
            .map(|category| {
                let in_category: Vec<&Theme> =
                    themes.iter().filter(|t| t.category == category).collect();
                let frequency: u64 = in_category.iter().map(|t| t.frequency).sum();
                let percentage = if total == 0 {
                    0.0
                } else {
                    frequency as f64 * 100.0 / total as f64
                };
                CategoryBreakdown {
                    category,
                    themes: in_category.len(),
                    frequency,
                    percentage,
                }
            })
            .collect())
    }

    /// Corpus-wide aggregates.
    pub async fn stats(&self) -> Result<CorpusStats, PipelineError> {
        let (records, results) = self.load_corpus().await?;

        let metric_means = Metric::ALL
            .iter()
            .filter_map(|metric| {
                let values: Vec<f64> = records.iter().map(|r| metric.value(r)).collect();
                mean(&values).map(|m| (*metric, m))
            })
            .collect();

        let mut stats = CorpusStats {
            total_records: records.len(),
            analyzed: results.len(),
            needs_reprocessing: results.iter().filter(|r| r.needs_reprocessing).count(),
            metric_means,
            ..CorpusStats::default()
        };
        for result in &results {
            *stats
                .sentiments
                .entry(result.sentiment.as_str().to_string())
                .or_insert(0) += 1;
            *stats
                .languages
                .entry(result.language.as_str().to_string())
                .or_insert(0) += 1;
        }
        for record in &records {
            *stats
                .formation_types
                .entry(record.formation_type.clone())
                .or_insert(0) += 1;
        }
        Ok(stats)
    }

    /// Weekly metric and sentiment trends for the evaluations `query` selects.
    pub async fn analyze_trends(&self, query: &TrendQuery) -> Result<TrendReport, PipelineError> {
        let (records, results) = self.load_corpus().await?;
        Ok(trend_report(&records, &results, query, Utc::now()))
    }

    /// Compare formation types side by side; all of them when `formation_types`
    /// is empty.
    pub async fn compare_formations(
        &self,
        formation_types: &[String],
    ) -> Result<Vec<FormationComparison>, PipelineError> {
        let (records, results) = self.load_corpus().await?;
        Ok(compare_formations(
            &records,
            &results,
            formation_types,
            COMPARISON_TOP_THEMES,
        ))
    }

    /// Recompute theme frequencies from the stored results and apply the
    /// difference. Repairs counts after a batch reported `themes_stale`.
    /// Returns the number of themes whose frequency changed.
    pub async fn rebuild_theme_counts(&self) -> Result<usize, PipelineError> {
        let results = self.store.list_results().await?;
        let stored = self.store.list_themes().await?;

        let mut tally = ThemeTally::new();
        for result in &results {
            tally.add(result.language, result.theme_names());
        }
        for theme in &stored {
            let count = i64::try_from(theme.frequency).unwrap_or(i64::MAX);
            tally.remove_count(theme.language, &theme.name, count);
        }

        let deltas = tally.deltas();
        if !deltas.is_empty() {
            self.store.add_theme_counts(&deltas).await?;
        }
        info!(changed = deltas.len(), "Theme counts rebuilt");
        Ok(deltas.len())
    }

    async fn load_corpus(&self) -> Result<(Vec<EvaluationRecord>, Vec<AnalysisResult>), PipelineError> {
        let records = self.store.list_records().await?;
        let results = self.store.list_results().await?;
        Ok((records, results))
    }
}

/// Frequency changes implied by one record's new analysis.
pub(crate) fn fold_themes(tally: &mut ThemeTally, processed: &Processed) {
    if processed.reused {
        return;
    }
    if let Some(prev) = &processed.previous {
        tally.remove(prev.language, prev.theme_names());
    }
    tally.add(processed.result.language, processed.result.theme_names());
}

fn group_key(insight: &Insight) -> String {
    format!("{}|{}", insight.scope.as_key(), insight.insight_type().as_str())
}
