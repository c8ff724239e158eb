// Clustering engine — groups comments in a shared multilingual vector space.
//
// A pass embeds every analyzed comment (ordered by record id), runs DBSCAN on
// cosine distance, and summarizes each group into a Cluster. Passes are full
// recomputations: the pipeline swaps the whole set in one store call.

pub mod dbscan;
pub mod download;
pub mod embeddings;
pub mod hashing;
pub mod traits;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::db::models::{AnalysisResult, Cluster, NOISE_CLUSTER_ID};
use crate::insights::stats::mean;

pub use dbscan::{dbscan, ClusterParams};
pub use traits::TextEmbedder;

/// Representative themes kept per cluster.
pub const REPRESENTATIVE_THEMES: usize = 5;

/// Summarize DBSCAN labels into clusters.
///
/// `results[i]` carries `labels[i]`. Non-noise clusters get ids `0..k` in
/// label order; noise points, if any, go into one extra cluster with
/// `NOISE_CLUSTER_ID`. Every result lands in exactly one cluster.
pub fn build_clusters(results: &[AnalysisResult], labels: &[Option<usize>]) -> Vec<Cluster> {
    let mut groups: BTreeMap<usize, Vec<&AnalysisResult>> = BTreeMap::new();
    let mut noise: Vec<&AnalysisResult> = Vec::new();

    for (result, label) in results.iter().zip(labels.iter()) {
        match label {
            Some(idx) => groups.entry(*idx).or_default().push(result),
            None => noise.push(result),
        }
    }

    let mut clusters: Vec<Cluster> = groups
        .into_values()
        .enumerate()
        .map(|(id, members)| {
            let themes = top_themes(&members, REPRESENTATIVE_THEMES);
            let label = themes
                .first()
                .map(|t| title_case(t))
                .unwrap_or_else(|| format!("Cluster {}", id + 1));
            summarize(id as i64, label, &members, themes)
        })
        .collect();

    if !noise.is_empty() {
        let themes = top_themes(&noise, REPRESENTATIVE_THEMES);
        clusters.push(summarize(
            NOISE_CLUSTER_ID,
            "Unclustered".to_string(),
            &noise,
            themes,
        ));
    }

    clusters
}

fn summarize(id: i64, label: String, members: &[&AnalysisResult], themes: Vec<String>) -> Cluster {
    let scores: Vec<f64> = members.iter().map(|r| r.score).collect();
    Cluster {
        id,
        label,
        members: members.iter().map(|r| r.record_id.clone()).collect(),
        representative_themes: themes,
        avg_sentiment: mean(&scores).unwrap_or(0.0),
    }
}

/// Most frequent themes among members; ties broken alphabetically.
fn top_themes(members: &[&AnalysisResult], n: usize) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for result in members {
        for name in result.theme_names() {
            *counts.entry(name).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.into_iter().take(n).map(|(name, _)| name.to_string()).collect()
}

fn title_case(theme: &str) -> String {
    theme
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Pick the embedder for reclustering: the ONNX model when its files are
/// present and load cleanly, the hashing embedder otherwise.
pub fn load_embedder(model_dir: &Path) -> Arc<dyn TextEmbedder> {
    if download::embedding_files_present(model_dir) {
        match embeddings::SentenceEmbedder::load(&download::embedding_model_dir(model_dir)) {
            Ok(embedder) => {
                info!("Using multilingual sentence embeddings for clustering");
                return Arc::new(embedder);
            }
            Err(e) => {
                warn!(error = %e, "Failed to load embedding model, falling back to hashing");
            }
        }
    } else {
        info!("Embedding model not downloaded, clustering with hashed features");
    }
    Arc::new(hashing::HashingEmbedder::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{SentimentLabel, ThemeTag};
    use crate::language::Language;
    use crate::themes::taxonomy::Category;
    use chrono::Utc;

    fn result(id: &str, score: f64, themes: &[&str]) -> AnalysisResult {
        AnalysisResult {
            record_id: id.to_string(),
            language: Language::Fr,
            sentiment: SentimentLabel::from_score(score),
            score,
            confidence: score.abs(),
            themes: themes
                .iter()
                .map(|t| ThemeTag {
                    name: t.to_string(),
                    category: Category::Other,
                })
                .collect(),
            cluster_id: None,
            fingerprint: format!("fp-{id}"),
            model_version: "1".to_string(),
            needs_reprocessing: false,
            analyzed_at: Utc::now(),
        }
    }

    #[test]
    fn test_build_clusters_partitions_every_record() {
        let results = vec![
            result("a", 0.8, &["salle"]),
            result("b", 0.6, &["salle", "pause"]),
            result("c", -0.5, &["formateur"]),
            result("d", 0.0, &[]),
        ];
        let labels = vec![Some(0), Some(0), Some(1), None];
        let clusters = build_clusters(&results, &labels);

        let total: usize = clusters.iter().map(|c| c.size()).sum();
        assert_eq!(total, results.len());
        assert_eq!(clusters.len(), 3);
        assert!(clusters[2].is_noise());
        assert_eq!(clusters[2].members, vec!["d"]);
    }

    #[test]
    fn test_cluster_summary() {
        let results = vec![
            result("a", 0.8, &["salle"]),
            result("b", 0.6, &["salle", "pause"]),
        ];
        let clusters = build_clusters(&results, &[Some(0), Some(0)]);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].id, 0);
        assert_eq!(clusters[0].label, "Salle");
        assert_eq!(clusters[0].representative_themes, vec!["salle", "pause"]);
        assert!((clusters[0].avg_sentiment - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_cluster_without_themes_gets_numbered_label() {
        let results = vec![result("a", 0.0, &[]), result("b", 0.0, &[])];
        let clusters = build_clusters(&results, &[Some(0), Some(0)]);
        assert_eq!(clusters[0].label, "Cluster 1");
    }

    #[test]
    fn test_no_noise_cluster_when_everything_clusters() {
        let results = vec![result("a", 0.1, &["x"])];
        let clusters = build_clusters(&results, &[Some(0)]);
        assert!(clusters.iter().all(|c| !c.is_noise()));
    }

    #[test]
    fn test_title_case_multiword() {
        assert_eq!(title_case("salle froide"), "Salle Froide");
        assert_eq!(title_case("قاعة"), "قاعة");
    }

    #[test]
    fn test_load_embedder_falls_back_to_hashing() {
        let dir = std::env::temp_dir().join("verbatim-test-no-embedder");
        assert_eq!(load_embedder(&dir).name(), "hashing");
    }
}
