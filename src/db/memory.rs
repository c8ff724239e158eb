// MemoryStore — in-process Store backed by ordered maps.
//
// Gives tests and programs using the library isolated state without a
// database file. Semantics match SqliteStore, including the atomic cluster
// swap, which here is a single write-lock section.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::models::{AnalysisResult, Cluster, EvaluationRecord, Theme};
use super::traits::{Store, StoreCounts};
use crate::insights::models::Insight;
use crate::language::Language;
use crate::themes::taxonomy::categorize;

#[derive(Default)]
struct State {
    records: BTreeMap<String, EvaluationRecord>,
    results: BTreeMap<String, AnalysisResult>,
    themes: BTreeMap<(String, Language), u64>,
    clusters: Vec<Cluster>,
    insights: BTreeMap<String, Insight>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put_record(&self, record: &EvaluationRecord) -> Result<()> {
        let mut state = self.state.write().await;
        state.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_record(&self, id: &str) -> Result<Option<EvaluationRecord>> {
        Ok(self.state.read().await.records.get(id).cloned())
    }

    async fn list_records(&self) -> Result<Vec<EvaluationRecord>> {
        Ok(self.state.read().await.records.values().cloned().collect())
    }

    async fn put_result(&self, result: &AnalysisResult) -> Result<()> {
        let mut state = self.state.write().await;
        let mut stored = result.clone();
        if let Some(existing) = state.results.get(&result.record_id) {
            stored.cluster_id = existing.cluster_id;
        }
        state.results.insert(stored.record_id.clone(), stored);
        Ok(())
    }

    async fn get_result(&self, record_id: &str) -> Result<Option<AnalysisResult>> {
        Ok(self.state.read().await.results.get(record_id).cloned())
    }

    async fn list_results(&self) -> Result<Vec<AnalysisResult>> {
        Ok(self.state.read().await.results.values().cloned().collect())
    }

    async fn add_theme_counts(&self, deltas: &[(String, Language, i64)]) -> Result<()> {
        let mut state = self.state.write().await;
        for (name, language, delta) in deltas {
            let count = state.themes.entry((name.clone(), *language)).or_insert(0);
            *count = if *delta >= 0 {
                count.saturating_add(delta.unsigned_abs())
            } else {
                count.saturating_sub(delta.unsigned_abs())
            };
        }
        Ok(())
    }

    async fn list_themes(&self) -> Result<Vec<Theme>> {
        let state = self.state.read().await;
        let mut themes: Vec<Theme> = state
            .themes
            .iter()
            .filter(|(_, frequency)| **frequency > 0)
            .map(|((name, language), frequency)| Theme {
                name: name.clone(),
                language: *language,
                frequency: *frequency,
                category: categorize(name, *language),
            })
            .collect();
        themes.sort_by(|a, b| b.frequency.cmp(&a.frequency).then_with(|| a.name.cmp(&b.name)));
        Ok(themes)
    }

    async fn replace_clusters(&self, clusters: &[Cluster]) -> Result<()> {
        let mut state = self.state.write().await;
        for result in state.results.values_mut() {
            result.cluster_id = None;
        }
        for cluster in clusters {
            for member in &cluster.members {
                if let Some(result) = state.results.get_mut(member) {
                    result.cluster_id = Some(cluster.id);
                }
            }
        }
        let mut ordered = clusters.to_vec();
        ordered.sort_by_key(|c| (c.id < 0, c.id));
        state.clusters = ordered;
        Ok(())
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>> {
        Ok(self.state.read().await.clusters.clone())
    }

    async fn upsert_insight(&self, insight: &Insight) -> Result<Insight> {
        let mut state = self.state.write().await;
        let mut stored = insight.clone();
        if let Some(existing) = state.insights.get(&insight.key) {
            stored.created_at = existing.created_at;
        }
        state.insights.insert(stored.key.clone(), stored.clone());
        Ok(stored)
    }

    async fn delete_insights(&self, keys: &[String]) -> Result<()> {
        let mut state = self.state.write().await;
        for key in keys {
            state.insights.remove(key);
        }
        Ok(())
    }

    async fn list_insights(&self) -> Result<Vec<Insight>> {
        let state = self.state.read().await;
        let mut insights: Vec<Insight> = state.insights.values().cloned().collect();
        insights.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.key.cmp(&b.key))
        });
        Ok(insights)
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let state = self.state.read().await;
        Ok(StoreCounts {
            records: state.records.len(),
            results: state.results.len(),
            needs_reprocessing: state
                .results
                .values()
                .filter(|r| r.needs_reprocessing)
                .count(),
            themes: state.themes.values().filter(|f| **f > 0).count(),
            clusters: state.clusters.iter().filter(|c| !c.is_noise()).count(),
            insights: state.insights.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_theme_counts_floor_at_zero() {
        let store = MemoryStore::new();
        store
            .add_theme_counts(&[("salle".into(), Language::Fr, 2)])
            .await
            .unwrap();
        store
            .add_theme_counts(&[("salle".into(), Language::Fr, -5)])
            .await
            .unwrap();
        assert!(store.list_themes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_themes_sorted_by_frequency() {
        let store = MemoryStore::new();
        store
            .add_theme_counts(&[
                ("a".into(), Language::Fr, 1),
                ("b".into(), Language::Fr, 4),
                ("c".into(), Language::Ar, 2),
            ])
            .await
            .unwrap();
        let names: Vec<_> = store
            .list_themes()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["b", "c", "a"]);
    }
}
