// Store trait — the pipeline's view of persistence.
//
// Implementors: SqliteStore (rusqlite behind a tokio Mutex) and MemoryStore
// (plain maps, used by tests and one-off runs). The pipeline treats both as
// an opaque durable map. All methods are async so a native async backend
// could slot in without touching callers.

use anyhow::Result;
use async_trait::async_trait;

use super::models::{AnalysisResult, Cluster, EvaluationRecord, Theme};
use crate::insights::models::Insight;
use crate::language::Language;

/// Row counts for the status command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub records: usize,
    pub results: usize,
    pub needs_reprocessing: usize,
    /// Themes with a positive frequency
    pub themes: usize,
    /// Non-noise clusters
    pub clusters: usize,
    pub insights: usize,
}

#[async_trait]
pub trait Store: Send + Sync {
    // --- Records ---

    async fn put_record(&self, record: &EvaluationRecord) -> Result<()>;

    async fn get_record(&self, id: &str) -> Result<Option<EvaluationRecord>>;

    /// All records, ordered by id.
    async fn list_records(&self) -> Result<Vec<EvaluationRecord>>;

    // --- Results ---

    /// Write the current result for a record. Does not move the record
    /// between clusters; only `replace_clusters` does that.
    async fn put_result(&self, result: &AnalysisResult) -> Result<()>;

    async fn get_result(&self, record_id: &str) -> Result<Option<AnalysisResult>>;

    /// All results, ordered by record id.
    async fn list_results(&self) -> Result<Vec<AnalysisResult>>;

    // --- Themes ---

    /// Apply (name, language, delta) frequency changes. Themes are created
    /// on first sight and never deleted; counters floor at zero.
    async fn add_theme_counts(&self, deltas: &[(String, Language, i64)]) -> Result<()>;

    /// Themes with a positive frequency, most frequent first, categorized.
    async fn list_themes(&self) -> Result<Vec<Theme>>;

    // --- Clusters ---

    /// Atomically replace the cluster set and every result's cluster reference.
    async fn replace_clusters(&self, clusters: &[Cluster]) -> Result<()>;

    /// Current clusters by id, noise last.
    async fn list_clusters(&self) -> Result<Vec<Cluster>>;

    // --- Insights ---

    /// Insert or update by key. An existing insight keeps its `created_at`.
    /// Returns the insight as stored.
    async fn upsert_insight(&self, insight: &Insight) -> Result<Insight>;

    async fn delete_insights(&self, keys: &[String]) -> Result<()>;

    /// All insights, most confident first.
    async fn list_insights(&self) -> Result<Vec<Insight>>;

    // --- Status ---

    async fn counts(&self) -> Result<StoreCounts>;
}
