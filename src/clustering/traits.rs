// Text embedder trait — swap-ready abstraction.
//
// The clustering pass only needs "text in, vector out". SentenceEmbedder runs
// the multilingual ONNX model; HashingEmbedder is the offline stand-in used
// when the model hasn't been downloaded (and in tests).

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait TextEmbedder: Send + Sync {
    /// Embed each text into a vector. Output order matches input order and
    /// every vector has the same dimension.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>>;

    /// Short name for logs and the status command.
    fn name(&self) -> &'static str;
}
