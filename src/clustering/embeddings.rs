// Sentence embeddings with paraphrase-multilingual-MiniLM-L12-v2.
//
// French, Arabic and Latin-script Darija comments all land in one shared
// 384-dimensional space, so "salle froide" and "القاعة باردة" can end up in
// the same cluster. The model runs locally via ONNX. Token embeddings are
// mean-pooled over the attention mask and L2-normalized, so cosine distance
// between outputs is 1 - dot product.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tracing::debug;

use super::hashing::l2_normalize;
use super::traits::TextEmbedder;

/// Embedding dimension for paraphrase-multilingual-MiniLM-L12-v2.
pub const EMBEDDING_DIM: usize = 384;

/// XLM-R tokenizers pad with id 1, not 0.
const PAD_TOKEN_ID: i64 = 1;

/// Long comments are cut here; the model was trained on 128-token inputs.
const MAX_TOKENS: usize = 128;

/// Session behind a std Mutex because inference runs inside spawn_blocking.
pub struct SentenceEmbedder {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
}

impl SentenceEmbedder {
    /// Load the model and tokenizer from `model_dir`.
    ///
    /// Expects `model.onnx` and `tokenizer.json`; `verbatim download-model`
    /// puts them there.
    pub fn load(model_dir: &Path) -> Result<Self> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        if !model_path.exists() {
            anyhow::bail!(
                "Embedding model not found: {}\nRun `verbatim download-model` to download it.",
                model_path.display()
            );
        }
        if !tokenizer_path.exists() {
            anyhow::bail!(
                "Embedding tokenizer not found: {}\nRun `verbatim download-model` to download it.",
                tokenizer_path.display()
            );
        }

        let session = Session::builder()
            .context("Failed to create ONNX session builder")?
            .commit_from_file(&model_path)
            .with_context(|| {
                format!(
                    "Failed to load embedding model from {}",
                    model_path.display()
                )
            })?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load embedding tokenizer: {}", e))?;

        debug!(model_dir = %model_dir.display(), "Loaded multilingual embedding model");

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
        })
    }
}

#[async_trait]
impl TextEmbedder for SentenceEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let session = Arc::clone(&self.session);
        let tokenizer = Arc::clone(&self.tokenizer);
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || embed_sync(&session, &tokenizer, &texts))
            .await
            .context("spawn_blocking panicked")?
    }

    fn name(&self) -> &'static str {
        "multilingual-minilm"
    }
}

fn embed_sync(
    session: &Arc<Mutex<Session>>,
    tokenizer: &Arc<Tokenizer>,
    texts: &[String],
) -> Result<Vec<Vec<f64>>> {
    let encodings: Vec<_> = texts
        .iter()
        .map(|t| {
            tokenizer
                .encode(t.as_str(), true)
                .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))
        })
        .collect::<Result<Vec<_>>>()?;

    let batch_size = encodings.len();
    let max_len = encodings
        .iter()
        .map(|e| e.get_ids().len().min(MAX_TOKENS))
        .max()
        .unwrap_or(0);

    if max_len == 0 {
        return Ok(vec![vec![0.0; EMBEDDING_DIM]; batch_size]);
    }

    let mut input_ids_flat: Vec<i64> = Vec::with_capacity(batch_size * max_len);
    let mut attention_mask_flat: Vec<i64> = Vec::with_capacity(batch_size * max_len);

    for enc in &encodings {
        let seq_len = enc.get_ids().len().min(MAX_TOKENS);
        let ids = &enc.get_ids()[..seq_len];
        let mask = &enc.get_attention_mask()[..seq_len];

        input_ids_flat.extend(ids.iter().map(|&id| id as i64));
        attention_mask_flat.extend(mask.iter().map(|&m| m as i64));

        let pad_len = max_len - seq_len;
        input_ids_flat.extend(std::iter::repeat_n(PAD_TOKEN_ID, pad_len));
        attention_mask_flat.extend(std::iter::repeat_n(0i64, pad_len));
    }

    let shape = [batch_size as i64, max_len as i64];

    let input_ids_tensor =
        Tensor::from_array((shape, input_ids_flat)).context("Failed to create input_ids tensor")?;
    let attention_mask_tensor = Tensor::from_array((shape, attention_mask_flat.clone()))
        .context("Failed to create attention_mask tensor")?;

    // last_hidden_state: [batch, seq_len, 384]
    let hidden_states = {
        let mut session = session
            .lock()
            .map_err(|e| anyhow::anyhow!("Session lock poisoned: {}", e))?;

        let outputs = session
            .run(ort::inputs! {
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor
            })
            .context("Embedding ONNX inference failed")?;

        let (_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("Failed to extract embedding output tensor")?;

        data.to_vec()
    };

    let mut embeddings = Vec::with_capacity(batch_size);
    for i in 0..batch_size {
        let mut pooled = mean_pool(&hidden_states, &attention_mask_flat, i, max_len);
        l2_normalize(&mut pooled);
        embeddings.push(pooled);
    }

    debug!(
        batch_size = batch_size,
        dim = EMBEDDING_DIM,
        "Computed sentence embeddings"
    );

    Ok(embeddings)
}

/// Average the token vectors of row `row`, weighted by its attention mask.
fn mean_pool(hidden: &[f32], mask: &[i64], row: usize, max_len: usize) -> Vec<f64> {
    let mut sum = vec![0.0_f64; EMBEDDING_DIM];
    let mut mask_sum = 0.0_f64;

    for j in 0..max_len {
        let mask_val = mask[row * max_len + j] as f64;
        if mask_val > 0.0 {
            mask_sum += mask_val;
            let offset = (row * max_len + j) * EMBEDDING_DIM;
            for (k, slot) in sum.iter_mut().enumerate() {
                *slot += hidden[offset + k] as f64 * mask_val;
            }
        }
    }

    if mask_sum > 0.0 {
        for val in &mut sum {
            *val /= mask_sum;
        }
    }
    sum
}
