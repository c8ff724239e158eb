// Sentiment model trait — the boundary to the per-language classifiers.
//
// The pipeline never talks to a classifier directly. It goes through
// SentimentModel, so the remote HuggingFace backend, the offline lexicon,
// and the counting mocks in the tests are interchangeable. The boundary is
// treated as unreliable: every call may time out or fail.

use async_trait::async_trait;

use crate::error::PipelineError;

/// What a classifier returns before normalization: its own label string and
/// the confidence it gives that label (0.0 to 1.0).
#[derive(Debug, Clone, PartialEq)]
pub struct RawSentiment {
    pub label: String,
    pub score: f64,
}

impl RawSentiment {
    pub fn new(label: impl Into<String>, score: f64) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

/// A sentiment classifier reachable by model id.
///
/// Errors must be classified: `PipelineError::TransientExternal` for anything
/// worth retrying (timeouts, rate limits, 5xx), `PipelineError::PermanentModel`
/// for rejected input or an unusable response.
#[async_trait]
pub trait SentimentModel: Send + Sync {
    /// Classify one text with the given model.
    async fn invoke(&self, text: &str, model_id: &str) -> Result<RawSentiment, PipelineError>;

    /// Wait until the backend may take another call. Runs before each
    /// attempt and outside its timeout, so queuing is never mistaken for a
    /// slow answer.
    async fn admit(&self) {}

    /// Short backend name for logs and the status command.
    fn name(&self) -> &'static str;
}
