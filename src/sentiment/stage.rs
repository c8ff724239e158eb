// Sentiment stage: model dispatch, timeout, retry, degradation.
//
// classify() never fails. A text either gets a normalized sentiment from its
// language's model, or, when the model cannot be reached or rejects the
// input, a neutral result flagged `degraded` so the record can be picked up
// again later. One bad comment never takes a batch down with it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::registry::ModelRegistry;
use super::traits::{RawSentiment, SentimentModel};
use crate::db::models::SentimentLabel;
use crate::error::PipelineError;
use crate::language::Language;

/// Timeout and retry policy for classifier calls.
#[derive(Debug, Clone)]
pub struct SentimentSettings {
    /// Upper bound on a single classifier call
    pub timeout: Duration,
    /// Retries after the first attempt, transient errors only
    pub max_retries: u32,
    /// First backoff delay; doubles on every retry
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Polar labels below this confidence are treated as neutral
    pub min_confidence: f64,
}

impl Default for SentimentSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            min_confidence: 0.55,
        }
    }
}

/// Normalized classifier output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentimentOutcome {
    pub label: SentimentLabel,
    /// In [-1, 1]; the label is always this score thresholded at ±0.3
    pub score: f64,
    pub confidence: f64,
    /// True when the classifier was unavailable and this is a placeholder
    pub degraded: bool,
}

impl SentimentOutcome {
    /// Neutral result for text with nothing to classify.
    pub fn neutral() -> Self {
        Self {
            label: SentimentLabel::Neutral,
            score: 0.0,
            confidence: 0.0,
            degraded: false,
        }
    }

    /// Neutral placeholder for a failed classification.
    pub fn degraded() -> Self {
        Self {
            degraded: true,
            ..Self::neutral()
        }
    }

    fn scored(score: f64, confidence: f64) -> Self {
        let score = score.clamp(-1.0, 1.0);
        Self {
            label: SentimentLabel::from_score(score),
            score,
            confidence: confidence.clamp(0.0, 1.0),
            degraded: false,
        }
    }
}

/// Direction of a classifier label, whatever naming scheme the model uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Positive,
    Negative,
    Neutral,
}

/// Map a classifier label to a polarity.
///
/// Handles word labels (`positive`, `POS`, `Negative`), star ratings
/// (`5 stars`, `1 star`) and binary `LABEL_0`/`LABEL_1` heads.
/// Unknown labels are neutral.
pub fn polarity(label: &str) -> Polarity {
    let label = label.trim().to_lowercase().replace([' ', '-'], "_");

    if label.starts_with("pos") {
        return Polarity::Positive;
    }
    if label.starts_with("neg") {
        return Polarity::Negative;
    }
    if label.starts_with("neu") {
        return Polarity::Neutral;
    }

    if let Some(stars) = label
        .strip_suffix("_stars")
        .or_else(|| label.strip_suffix("_star"))
    {
        return match stars.parse::<u8>() {
            Ok(4 | 5) => Polarity::Positive,
            Ok(1 | 2) => Polarity::Negative,
            _ => Polarity::Neutral,
        };
    }

    match label.as_str() {
        "label_1" | "1" => Polarity::Positive,
        "label_0" | "0" => Polarity::Negative,
        _ => Polarity::Neutral,
    }
}

/// Turn a raw classifier answer into a signed score.
/// Low-confidence polar answers collapse to neutral.
pub fn normalize(raw: &RawSentiment, min_confidence: f64) -> SentimentOutcome {
    let confidence = raw.score.clamp(0.0, 1.0);
    match polarity(&raw.label) {
        Polarity::Positive if confidence >= min_confidence => {
            SentimentOutcome::scored(confidence, confidence)
        }
        Polarity::Negative if confidence >= min_confidence => {
            SentimentOutcome::scored(-confidence, confidence)
        }
        _ => SentimentOutcome::scored(0.0, confidence),
    }
}

/// Exponential backoff for retry `attempt` (1-based): `base * 2^(attempt-1)`,
/// capped at `max`, with ±25% jitter.
pub fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let backoff = base.saturating_mul(1u32 << exp).min(max);

    // The nanosecond component of the clock is enough spread to keep
    // concurrent retries from lining up.
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    let jitter_factor = 0.75 + (nanos % 500) as f64 / 1000.0;
    Duration::from_secs_f64(backoff.as_secs_f64() * jitter_factor)
}

/// Dispatches text to its language's classifier.
pub struct SentimentStage {
    model: Arc<dyn SentimentModel>,
    registry: ModelRegistry,
    settings: SentimentSettings,
}

impl SentimentStage {
    pub fn new(
        model: Arc<dyn SentimentModel>,
        registry: ModelRegistry,
        settings: SentimentSettings,
    ) -> Self {
        Self {
            model,
            registry,
            settings,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.model.name()
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Classify one comment. Never fails; see the module comment.
    pub async fn classify(&self, text: &str, language: Language) -> SentimentOutcome {
        if text.trim().is_empty() {
            return SentimentOutcome::neutral();
        }

        let model_id = self.registry.model_for(language);
        match self.invoke_with_retry(text, model_id).await {
            Ok(raw) => {
                let outcome = normalize(&raw, self.settings.min_confidence);
                debug!(
                    model = model_id,
                    language = %language,
                    raw_label = %raw.label,
                    score = outcome.score,
                    "Sentiment classified"
                );
                outcome
            }
            Err(err) => {
                warn!(
                    model = model_id,
                    language = %language,
                    error = %err,
                    "Classifier unavailable, degrading to neutral"
                );
                SentimentOutcome::degraded()
            }
        }
    }

    async fn invoke_with_retry(
        &self,
        text: &str,
        model_id: &str,
    ) -> Result<RawSentiment, PipelineError> {
        let mut attempt = 0u32;

        loop {
            self.model.admit().await;
            let result =
                match tokio::time::timeout(self.settings.timeout, self.model.invoke(text, model_id))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(PipelineError::TransientExternal(format!(
                        "{model_id}: no answer within {:?}",
                        self.settings.timeout
                    ))),
                };

            match result {
                Ok(raw) => return Ok(raw),
                Err(err) if err.is_transient() && attempt < self.settings.max_retries => {
                    attempt += 1;
                    let delay = backoff_delay(
                        self.settings.base_backoff,
                        self.settings.max_backoff,
                        attempt,
                    );
                    warn!(
                        model = model_id,
                        attempt = attempt,
                        max_retries = self.settings.max_retries,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient classifier error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails transiently `failures` times, then answers positive.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SentimentModel for Flaky {
        async fn invoke(&self, _text: &str, _model: &str) -> Result<RawSentiment, PipelineError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(PipelineError::TransientExternal("503".into()))
            } else {
                Ok(RawSentiment::new("positive", 0.9))
            }
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    struct Rejecting {
        calls: AtomicU32,
    }

    #[async_trait]
    impl SentimentModel for Rejecting {
        async fn invoke(&self, _text: &str, _model: &str) -> Result<RawSentiment, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(PipelineError::PermanentModel("400 bad input".into()))
        }

        fn name(&self) -> &'static str {
            "rejecting"
        }
    }

    struct Slow;

    #[async_trait]
    impl SentimentModel for Slow {
        async fn invoke(&self, _text: &str, _model: &str) -> Result<RawSentiment, PipelineError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(RawSentiment::new("positive", 0.9))
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    /// Answers at once, but makes every caller queue first.
    struct Throttled {
        queue: Duration,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SentimentModel for Throttled {
        async fn admit(&self) {
            tokio::time::sleep(self.queue).await;
        }

        async fn invoke(&self, _text: &str, _model: &str) -> Result<RawSentiment, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RawSentiment::new("negative", 0.9))
        }

        fn name(&self) -> &'static str {
            "throttled"
        }
    }

    fn fast_settings() -> SentimentSettings {
        SentimentSettings {
            timeout: Duration::from_millis(50),
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            ..SentimentSettings::default()
        }
    }

    fn stage(model: Arc<dyn SentimentModel>) -> SentimentStage {
        SentimentStage::new(model, ModelRegistry::default(), fast_settings())
    }

    #[test]
    fn test_polarity_label_schemes() {
        assert_eq!(polarity("positive"), Polarity::Positive);
        assert_eq!(polarity("POS"), Polarity::Positive);
        assert_eq!(polarity("Negative"), Polarity::Negative);
        assert_eq!(polarity("neutral"), Polarity::Neutral);
        assert_eq!(polarity("5 stars"), Polarity::Positive);
        assert_eq!(polarity("4 stars"), Polarity::Positive);
        assert_eq!(polarity("3 stars"), Polarity::Neutral);
        assert_eq!(polarity("1 star"), Polarity::Negative);
        assert_eq!(polarity("LABEL_1"), Polarity::Positive);
        assert_eq!(polarity("LABEL_0"), Polarity::Negative);
        assert_eq!(polarity("something else"), Polarity::Neutral);
    }

    #[test]
    fn test_low_confidence_collapses_to_neutral() {
        let out = normalize(&RawSentiment::new("positive", 0.5), 0.55);
        assert_eq!(out.label, SentimentLabel::Neutral);
        assert_eq!(out.score, 0.0);
    }

    #[test]
    fn test_negative_score_is_signed() {
        let out = normalize(&RawSentiment::new("negative", 0.8), 0.55);
        assert_eq!(out.label, SentimentLabel::Negative);
        assert!((out.score + 0.8).abs() < 1e-9);
        assert!((out.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_label_always_matches_score() {
        for (label, conf) in [("positive", 0.56), ("negative", 0.99), ("neutral", 0.9), ("pos", 0.2)] {
            let out = normalize(&RawSentiment::new(label, conf), 0.55);
            assert_eq!(out.label, SentimentLabel::from_score(out.score));
            assert!((-1.0..=1.0).contains(&out.score));
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(1000);
        let first = backoff_delay(base, max, 1);
        let third = backoff_delay(base, max, 3);
        let tenth = backoff_delay(base, max, 10);
        assert!(first >= Duration::from_millis(75) && first <= Duration::from_millis(125));
        assert!(third >= Duration::from_millis(300) && third <= Duration::from_millis(500));
        assert!(tenth <= Duration::from_millis(1250));
    }

    #[tokio::test]
    async fn test_empty_text_skips_model() {
        let model = Arc::new(Flaky {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let out = stage(model.clone()).classify("   ", Language::Fr).await;
        assert_eq!(out, SentimentOutcome::neutral());
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let model = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let out = stage(model.clone()).classify("Formation utile", Language::Fr).await;
        assert_eq!(out.label, SentimentLabel::Positive);
        assert!(!out.degraded);
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_queuing_does_not_count_against_timeout() {
        // 50ms timeout, 120ms wait for admission
        let model = Arc::new(Throttled {
            queue: Duration::from_millis(120),
            calls: AtomicU32::new(0),
        });
        let out = stage(model.clone()).classify("Formation décevante", Language::Fr).await;
        assert_eq!(out.label, SentimentLabel::Negative);
        assert!(!out.degraded);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_degrade() {
        let model = Arc::new(Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
        });
        let out = stage(model.clone()).classify("Formation utile", Language::Fr).await;
        assert_eq!(out, SentimentOutcome::degraded());
        // first attempt + 3 retries
        assert_eq!(model.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let model = Arc::new(Rejecting {
            calls: AtomicU32::new(0),
        });
        let out = stage(model.clone()).classify("texte", Language::Ar).await;
        assert!(out.degraded);
        assert_eq!(out.confidence, 0.0);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_degrades() {
        let out = stage(Arc::new(Slow)).classify("texte", Language::Fr).await;
        assert!(out.degraded);
        assert_eq!(out.label, SentimentLabel::Neutral);
    }
}
