// HuggingFace Inference API backend.
//
// Each language has its own fine-tuned classifier on the hub (see
// ModelRegistry). The API answers `[[{label, score}, ...]]` for text
// classification models, sometimes flattened to `[{label, score}, ...]`.
// Cold models answer 503 while loading, which is transient like 429.
//
// API docs: https://huggingface.co/docs/api-inference/tasks/text-classification

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::rate_limiter::RateLimiter;
use super::traits::{RawSentiment, SentimentModel};
use crate::error::PipelineError;
use crate::output::truncate_chars;

/// Default base URL; the model id is appended as a path segment.
pub const DEFAULT_API_URL: &str = "https://api-inference.huggingface.co/models";

/// Longest input sent to a classifier, in characters.
const MAX_INPUT_CHARS: usize = 512;

/// Remote classifier over the HuggingFace Inference API.
pub struct HuggingFaceClassifier {
    client: Client,
    api_url: String,
    api_key: String,
    rate_limiter: RateLimiter,
}

impl HuggingFaceClassifier {
    /// Build a client with its own request timeout and rate limit.
    pub fn new(
        api_url: &str,
        api_key: String,
        requests_per_second: f64,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            rate_limiter: RateLimiter::new(requests_per_second),
        })
    }
}

#[async_trait]
impl SentimentModel for HuggingFaceClassifier {
    async fn admit(&self) {
        self.rate_limiter.acquire().await;
    }

    async fn invoke(&self, text: &str, model_id: &str) -> Result<RawSentiment, PipelineError> {
        let url = format!("{}/{}", self.api_url, model_id);
        let inputs: String = text.chars().take(MAX_INPUT_CHARS).collect();

        let mut request = self.client.post(&url).json(&InferenceRequest { inputs });
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        // Anything that fails before a status line arrives (timeout, DNS,
        // refused connection) is worth another try.
        let response = request.send().await.map_err(|e| {
            PipelineError::TransientExternal(format!("{model_id}: request failed: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("{model_id} returned {status}: {}", truncate_chars(&body, 200));
            return Err(if is_transient_status(status) {
                PipelineError::TransientExternal(message)
            } else {
                PipelineError::PermanentModel(message)
            });
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            PipelineError::PermanentModel(format!("{model_id}: unreadable response: {e}"))
        })?;

        let raw = parse_response(&body).ok_or_else(|| {
            PipelineError::PermanentModel(format!(
                "{model_id}: unexpected response shape: {}",
                truncate_chars(&body.to_string(), 200)
            ))
        })?;

        debug!(
            model = model_id,
            label = %raw.label,
            score = raw.score,
            text_preview = %truncate_chars(text, 50),
            "Classified text"
        );

        Ok(raw)
    }

    fn name(&self) -> &'static str {
        "huggingface"
    }
}

/// Rate limiting, overload and model warm-up are all temporary.
fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// Pick the highest-scoring label from either response shape.
pub fn parse_response(body: &serde_json::Value) -> Option<RawSentiment> {
    let outer = body.as_array()?;
    let candidates = match outer.first()? {
        serde_json::Value::Array(inner) => inner.as_slice(),
        _ => outer.as_slice(),
    };

    candidates
        .iter()
        .filter_map(|v| serde_json::from_value::<LabelScore>(v.clone()).ok())
        .max_by(|a, b| a.score.total_cmp(&b.score))
        .map(|best| RawSentiment::new(best.label, best.score))
}

#[derive(Serialize)]
struct InferenceRequest {
    inputs: String,
}

#[derive(Deserialize)]
struct LabelScore {
    label: String,
    score: f64,
}
