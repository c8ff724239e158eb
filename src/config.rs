use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::clustering::ClusterParams;
use crate::insights::models::InsightThresholds;
use crate::pipeline::PipelineSettings;
use crate::sentiment::huggingface::{HuggingFaceClassifier, DEFAULT_API_URL};
use crate::sentiment::lexicon::LexiconModel;
use crate::sentiment::registry::{
    ModelRegistry, DEFAULT_AR_MODEL, DEFAULT_DARIJA_MODEL, DEFAULT_FR_MODEL,
};
use crate::sentiment::stage::SentimentSettings;
use crate::sentiment::traits::SentimentModel;

/// Which sentiment backend to use.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SentimentBackend {
    /// HuggingFace Inference API, one model per language. Needs HUGGINGFACE_API_KEY.
    HuggingFace,
    /// Built-in FR/AR/Darija word lists. Offline, no key.
    Lexicon,
}

/// Central configuration loaded from environment variables.
///
/// Secrets come from env vars only. The .env file is loaded at startup via
/// dotenvy. Every insight threshold is a named, overridable parameter.
#[derive(Clone)]
pub struct Config {
    pub db_path: String,
    pub sentiment_backend: SentimentBackend,
    pub huggingface_api_key: String,
    pub huggingface_api_url: String,
    pub fr_model: String,
    pub ar_model: String,
    pub darija_model: String,
    /// Fingerprint component; bump to invalidate cached analyses
    pub model_version: String,
    /// Directory holding the embedding model
    pub model_dir: PathBuf,
    pub concurrency: usize,
    pub requests_per_second: f64,
    pub timeout_secs: u64,
    pub recluster_threshold: usize,
    pub insight_threshold: usize,
    pub cluster_eps: f64,
    pub cluster_min_samples: usize,
    pub alert_floor: f64,
    pub recommend_ceiling: f64,
    pub correlation_threshold: f64,
    pub trend_slope: f64,
    pub min_samples: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Everything has a default. A variable that is set but doesn't parse is
    /// an error rather than a silent fallback.
    pub fn load() -> Result<Self> {
        let huggingface_api_key = env::var("HUGGINGFACE_API_KEY").unwrap_or_default();

        let sentiment_backend = match env::var("VERBATIM_SENTIMENT").as_deref() {
            Ok("huggingface") => SentimentBackend::HuggingFace,
            Ok("lexicon") => SentimentBackend::Lexicon,
            Ok(other) => anyhow::bail!(
                "VERBATIM_SENTIMENT must be `huggingface` or `lexicon`, got `{}`",
                other
            ),
            // Unset: use the remote models when a key is available
            Err(_) if !huggingface_api_key.is_empty() => SentimentBackend::HuggingFace,
            Err(_) => SentimentBackend::Lexicon,
        };

        let model_dir = env::var("VERBATIM_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| crate::clustering::download::default_model_dir());

        let insight_defaults = InsightThresholds::default();
        let cluster_defaults = ClusterParams::default();
        let pipeline_defaults = PipelineSettings::default();

        Ok(Self {
            db_path: env::var("VERBATIM_DB_PATH").unwrap_or_else(|_| "./verbatim.db".to_string()),
            sentiment_backend,
            huggingface_api_key,
            huggingface_api_url: env::var("HUGGINGFACE_API_URL")
                .unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            fr_model: env::var("FR_SENTIMENT_MODEL").unwrap_or_else(|_| DEFAULT_FR_MODEL.to_string()),
            ar_model: env::var("AR_SENTIMENT_MODEL").unwrap_or_else(|_| DEFAULT_AR_MODEL.to_string()),
            darija_model: env::var("DARIJA_SENTIMENT_MODEL")
                .unwrap_or_else(|_| DEFAULT_DARIJA_MODEL.to_string()),
            model_version: env::var("VERBATIM_MODEL_VERSION")
                .unwrap_or_else(|_| pipeline_defaults.model_version.clone()),
            model_dir,
            concurrency: env_parse("VERBATIM_CONCURRENCY", pipeline_defaults.concurrency)?,
            requests_per_second: request_rate(env_parse("VERBATIM_REQUESTS_PER_SECOND", 5.0)?)?,
            timeout_secs: env_parse("VERBATIM_TIMEOUT_SECS", 10)?,
            recluster_threshold: env_parse(
                "VERBATIM_RECLUSTER_THRESHOLD",
                pipeline_defaults.recluster_threshold,
            )?,
            insight_threshold: env_parse(
                "VERBATIM_INSIGHT_THRESHOLD",
                pipeline_defaults.insight_threshold,
            )?,
            cluster_eps: env_parse("VERBATIM_CLUSTER_EPS", cluster_defaults.eps)?,
            cluster_min_samples: env_parse(
                "VERBATIM_CLUSTER_MIN_SAMPLES",
                cluster_defaults.min_samples,
            )?,
            alert_floor: env_parse("VERBATIM_ALERT_FLOOR", insight_defaults.alert_floor)?,
            recommend_ceiling: env_parse(
                "VERBATIM_RECOMMEND_CEILING",
                insight_defaults.recommend_ceiling,
            )?,
            correlation_threshold: env_parse(
                "VERBATIM_CORRELATION_THRESHOLD",
                insight_defaults.correlation,
            )?,
            trend_slope: env_parse("VERBATIM_TREND_SLOPE", insight_defaults.trend_slope)?,
            min_samples: env_parse("VERBATIM_MIN_SAMPLES", insight_defaults.min_samples)?,
        })
    }

    pub fn registry(&self) -> ModelRegistry {
        ModelRegistry::new(&self.fr_model, &self.ar_model, &self.darija_model)
    }

    pub fn sentiment_settings(&self) -> SentimentSettings {
        SentimentSettings {
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
            ..SentimentSettings::default()
        }
    }

    pub fn cluster_params(&self) -> ClusterParams {
        ClusterParams {
            eps: self.cluster_eps,
            min_samples: self.cluster_min_samples,
        }
    }

    pub fn insight_thresholds(&self) -> InsightThresholds {
        InsightThresholds {
            alert_floor: self.alert_floor,
            recommend_ceiling: self.recommend_ceiling,
            correlation: self.correlation_threshold,
            trend_slope: self.trend_slope,
            min_samples: self.min_samples,
            ..InsightThresholds::default()
        }
    }

    pub fn pipeline_settings(&self, show_progress: bool) -> PipelineSettings {
        PipelineSettings {
            concurrency: self.concurrency.max(1),
            recluster_threshold: self.recluster_threshold,
            insight_threshold: self.insight_threshold,
            model_version: self.model_version.clone(),
            cluster: self.cluster_params(),
            insights: self.insight_thresholds(),
            show_progress,
        }
    }

    /// Check that the HuggingFace key is configured.
    pub fn require_huggingface(&self) -> Result<()> {
        if self.huggingface_api_key.is_empty() {
            anyhow::bail!(
                "HUGGINGFACE_API_KEY not set. Add it to your .env file,\n\
                 or set VERBATIM_SENTIMENT=lexicon to use the offline word lists."
            );
        }
        Ok(())
    }

    /// Build the configured sentiment backend.
    pub fn sentiment_model(&self) -> Result<Arc<dyn SentimentModel>> {
        match self.sentiment_backend {
            SentimentBackend::HuggingFace => {
                self.require_huggingface()?;
                info!(
                    rps = self.requests_per_second,
                    "Using HuggingFace sentiment models"
                );
                let client = HuggingFaceClassifier::new(
                    &self.huggingface_api_url,
                    self.huggingface_api_key.clone(),
                    self.requests_per_second,
                    Duration::from_secs(self.timeout_secs.max(1)),
                )?;
                Ok(Arc::new(client))
            }
            SentimentBackend::Lexicon => {
                info!("Using built-in sentiment lexicon");
                Ok(Arc::new(LexiconModel::new()))
            }
        }
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

/// Requests per second must be a finite, non-negative number; 0 disables pacing.
fn request_rate(rps: f64) -> Result<f64> {
    if rps.is_finite() && rps >= 0.0 {
        Ok(rps)
    } else {
        anyhow::bail!(
            "VERBATIM_REQUESTS_PER_SECOND must be a non-negative number (0 = unlimited), got {}",
            rps
        )
    }
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("{}", e))
        .with_context(|| format!("Invalid value for {}: `{}`", name, raw))
}
