// System status display — DB stats, backends, corpus aggregates.

use anyhow::Result;

use crate::output::terminal;
use crate::pipeline::Pipeline;
use crate::themes::taxonomy::TAXONOMY_VERSION;

/// Display system status to the terminal.
pub async fn show(pipeline: &Pipeline, db_display_path: &str) -> Result<()> {
    let file_size = std::fs::metadata(db_display_path)
        .map(|m| format_bytes(m.len()))
        .unwrap_or_else(|_| "unknown".to_string());
    println!("Database: {} ({})", db_display_path, file_size);

    println!(
        "Sentiment backend: {} (model version {})",
        pipeline.sentiment_backend(),
        pipeline.settings().model_version
    );
    println!("Clustering embedder: {}", pipeline.embedder_name());
    println!("Taxonomy version: {}", TAXONOMY_VERSION);

    let counts = pipeline.store().counts().await?;
    println!(
        "Stored: {} themes, {} clusters, {} insights",
        counts.themes, counts.clusters, counts.insights
    );
    if counts.records == 0 {
        println!("  Run `verbatim analyze <records.json>` to ingest evaluations");
        return Ok(());
    }

    let stats = pipeline.stats().await?;
    terminal::display_stats(&stats);

    if counts.needs_reprocessing > 0 {
        println!("  Run `verbatim reprocess` to retry degraded sentiment results");
    }
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
