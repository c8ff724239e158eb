// Database schema — table creation and migrations.
//
// The pipeline treats storage as an opaque durable map, so most tables are
// key -> JSON payload. The few columns outside the payload are the ones that
// are updated independently of it: a result's cluster reference (rewritten
// by every clustering pass), a theme's counter, an insight's first-seen time.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create all tables if they don't exist yet. Idempotent.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Ingested evaluation records, immutable once written
        CREATE TABLE IF NOT EXISTS records (
            id TEXT PRIMARY KEY,
            payload TEXT NOT NULL,             -- EvaluationRecord JSON
            ingested_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- One current analysis result per record
        CREATE TABLE IF NOT EXISTS results (
            record_id TEXT PRIMARY KEY,
            cluster_id INTEGER,                -- NULL until the first clustering pass
            needs_reprocessing INTEGER NOT NULL DEFAULT 0,
            payload TEXT NOT NULL,             -- AnalysisResult JSON
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Corpus-wide theme frequencies
        CREATE TABLE IF NOT EXISTS themes (
            name TEXT NOT NULL,
            language TEXT NOT NULL,            -- FR / AR / DARIJA
            frequency INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (name, language)
        );

        -- Latest cluster set; replaced wholesale by each clustering pass
        CREATE TABLE IF NOT EXISTS clusters (
            id INTEGER PRIMARY KEY,            -- -1 is the noise cluster
            payload TEXT NOT NULL              -- Cluster JSON
        );

        -- Generated insights, keyed by their stable hash
        CREATE TABLE IF NOT EXISTS insights (
            key TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            scope TEXT NOT NULL,
            confidence REAL NOT NULL,
            payload TEXT NOT NULL,             -- Insight JSON
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_results_cluster
            ON results(cluster_id);

        CREATE INDEX IF NOT EXISTS idx_results_reprocess
            ON results(needs_reprocessing);

        CREATE INDEX IF NOT EXISTS idx_themes_frequency
            ON themes(frequency DESC);

        CREATE INDEX IF NOT EXISTS idx_insights_kind_scope
            ON insights(kind, scope);
        ",
    )
    .context("Failed to create database tables")?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [1],
    )?;

    Ok(())
}

/// Count the user tables in the database (shown after `verbatim init`).
pub fn table_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}
