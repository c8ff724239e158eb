// Model download helper for the multilingual embedding model.
//
// Fetches paraphrase-multilingual-MiniLM-L12-v2 (~470MB) from HuggingFace
// into a platform-appropriate directory (~/.local/share/verbatim/models/ on
// Linux) so it persists across runs. Until it's there, reclustering uses the
// hashing embedder.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

/// HuggingFace repo for the sentence embedding model.
const EMBEDDING_HF_URL: &str =
    "https://huggingface.co/sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2/resolve/main";

const EMBEDDING_MODEL_FILE: &str = "onnx/model.onnx";
const EMBEDDING_TOKENIZER_FILE: &str = "tokenizer.json";

/// Subdirectory name under the model directory.
const EMBEDDING_DIR_NAME: &str = "paraphrase-multilingual-MiniLM-L12-v2";

/// ~/.local/share/verbatim/models/ on Linux.
pub fn default_model_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("verbatim")
        .join("models")
}

pub fn embedding_model_dir(base: &Path) -> PathBuf {
    base.join(EMBEDDING_DIR_NAME)
}

/// Check whether both embedding model files exist.
pub fn embedding_files_present(base: &Path) -> bool {
    let embed_dir = embedding_model_dir(base);
    embed_dir.join("model.onnx").exists() && embed_dir.join("tokenizer.json").exists()
}

/// Download the embedding model. Skips files that already exist.
pub async fn download_model(base: &Path) -> Result<()> {
    let embed_dir = embedding_model_dir(base);
    std::fs::create_dir_all(&embed_dir).with_context(|| {
        format!(
            "Failed to create embedding model directory: {}",
            embed_dir.display()
        )
    })?;

    println!("\nSentence embedding model ({}):", EMBEDDING_DIR_NAME);

    let tokenizer_path = embed_dir.join("tokenizer.json");
    if tokenizer_path.exists() {
        info!("Embedding tokenizer already exists, skipping");
        println!("  tokenizer.json (already exists)");
    } else {
        println!("  Downloading tokenizer.json...");
        download_file(
            &format!("{}/{}", EMBEDDING_HF_URL, EMBEDDING_TOKENIZER_FILE),
            &tokenizer_path,
            false,
        )
        .await?;
    }

    let model_path = embed_dir.join("model.onnx");
    if model_path.exists() {
        info!("Embedding model already exists, skipping");
        println!("  model.onnx (already exists)");
    } else {
        println!("  Downloading model.onnx (~470 MB)...");
        download_file(
            &format!("{}/{}", EMBEDDING_HF_URL, EMBEDDING_MODEL_FILE),
            &model_path,
            true,
        )
        .await?;
    }

    Ok(())
}

async fn download_file(url: &str, dest: &Path, show_progress: bool) -> Result<()> {
    let client = reqwest::Client::new();
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to download {}", url))?;

    if !response.status().is_success() {
        anyhow::bail!("Download failed with status {}: {}", response.status(), url);
    }

    let total_size = response.content_length();

    let pb = if show_progress {
        let pb = match total_size {
            Some(size) => {
                let pb = ProgressBar::new(size);
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template("    [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                        .expect("valid template")
                        .progress_chars("=> "),
                );
                pb
            }
            None => {
                let pb = ProgressBar::new_spinner();
                pb.set_style(
                    ProgressStyle::default_spinner()
                        .template("    {spinner} {bytes}")
                        .expect("valid template"),
                );
                pb
            }
        };
        Some(pb)
    } else {
        None
    };

    let bytes = response
        .bytes()
        .await
        .context("Failed to read response body")?;

    if let Some(ref pb) = pb {
        pb.set_position(bytes.len() as u64);
    }

    // Write to a temp name first so an interrupted download isn't mistaken
    // for a complete model on the next run
    let partial = dest.with_extension("part");
    std::fs::write(&partial, &bytes)
        .with_context(|| format!("Failed to write {}", partial.display()))?;
    std::fs::rename(&partial, dest)
        .with_context(|| format!("Failed to move {} into place", dest.display()))?;

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    info!(url = url, dest = %dest.display(), "Downloaded model file");
    Ok(())
}
