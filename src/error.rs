// Pipeline error taxonomy.
//
// Every failure the pipeline can surface falls into one of these buckets.
// The variant decides what the caller does next: retry, degrade to a neutral
// result, reject a single record, or keep serving the previous artifacts.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Timeout, rate limit or 5xx from an external model. Retried with backoff,
    /// then degraded to a neutral result flagged for reprocessing.
    #[error("transient external error: {0}")]
    TransientExternal(String),

    /// The model rejected the input or returned something unusable.
    /// Degraded immediately, never retried.
    #[error("permanent model error: {0}")]
    PermanentModel(String),

    /// A single record failed validation. Only that record is rejected.
    #[error("invalid record {record_id}: {field} {reason}")]
    Validation {
        record_id: String,
        field: &'static str,
        reason: String,
    },

    /// Reclustering failed; the previous cluster set stays in place.
    #[error("clustering failed: {0}")]
    Clustering(String),

    /// Insight generation failed for one scope/kind. Logged, never fatal.
    #[error("insight generation failed: {0}")]
    InsightGeneration(String),

    /// The persistence collaborator failed.
    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl PipelineError {
    /// Whether a retry has any chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::TransientExternal(_))
    }

    pub fn validation(record_id: &str, field: &'static str, reason: impl Into<String>) -> Self {
        PipelineError::Validation {
            record_id: record_id.to_string(),
            field,
            reason: reason.into(),
        }
    }
}
