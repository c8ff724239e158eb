// Database queries — every SQL statement lives here.
//
// Payloads are serde_json blobs; the handful of real columns are kept in
// sync by these functions. Multi-row writes run in a transaction so a crash
// never leaves half a cluster set or half a batch of theme counts behind.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::models::{AnalysisResult, Cluster, EvaluationRecord};
use super::traits::StoreCounts;
use crate::insights::models::Insight;
use crate::language::Language;

// --- Records ---

pub fn put_record(conn: &Connection, record: &EvaluationRecord) -> Result<()> {
    let payload = serde_json::to_string(record)?;
    conn.execute(
        "INSERT INTO records (id, payload) VALUES (?1, ?2)
         ON CONFLICT(id) DO UPDATE SET payload = ?2",
        params![record.id, payload],
    )?;
    Ok(())
}

pub fn get_record(conn: &Connection, id: &str) -> Result<Option<EvaluationRecord>> {
    let payload: Option<String> = conn
        .query_row(
            "SELECT payload FROM records WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    payload
        .map(|p| serde_json::from_str(&p).with_context(|| format!("Corrupt record payload for {id}")))
        .transpose()
}

/// All records, ordered by id.
pub fn list_records(conn: &Connection) -> Result<Vec<EvaluationRecord>> {
    let mut stmt = conn.prepare("SELECT payload FROM records ORDER BY id")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

    let mut records = Vec::new();
    for row in rows {
        records.push(serde_json::from_str(&row?).context("Corrupt record payload")?);
    }
    Ok(records)
}

// --- Results ---

/// Write a result. An existing cluster reference is left alone: only a
/// clustering pass moves records between clusters.
pub fn put_result(conn: &Connection, result: &AnalysisResult) -> Result<()> {
    let payload = serde_json::to_string(result)?;
    conn.execute(
        "INSERT INTO results (record_id, cluster_id, needs_reprocessing, payload, updated_at)
         VALUES (?1, ?2, ?3, ?4, datetime('now'))
         ON CONFLICT(record_id) DO UPDATE SET
            needs_reprocessing = ?3,
            payload = ?4,
            updated_at = datetime('now')",
        params![
            result.record_id,
            result.cluster_id,
            result.needs_reprocessing,
            payload
        ],
    )?;
    Ok(())
}

fn result_from_row(cluster_id: Option<i64>, payload: &str) -> Result<AnalysisResult> {
    let mut result: AnalysisResult =
        serde_json::from_str(payload).context("Corrupt analysis result payload")?;
    result.cluster_id = cluster_id;
    Ok(result)
}

pub fn get_result(conn: &Connection, record_id: &str) -> Result<Option<AnalysisResult>> {
    let row: Option<(Option<i64>, String)> = conn
        .query_row(
            "SELECT cluster_id, payload FROM results WHERE record_id = ?1",
            params![record_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    row.map(|(cluster_id, payload)| result_from_row(cluster_id, &payload))
        .transpose()
}

/// All results, ordered by record id.
pub fn list_results(conn: &Connection) -> Result<Vec<AnalysisResult>> {
    let mut stmt = conn.prepare("SELECT cluster_id, payload FROM results ORDER BY record_id")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, Option<i64>>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut results = Vec::new();
    for row in rows {
        let (cluster_id, payload) = row?;
        results.push(result_from_row(cluster_id, &payload)?);
    }
    Ok(results)
}

// --- Themes ---

/// Apply frequency deltas. Counters never go below zero.
pub fn add_theme_counts(conn: &mut Connection, deltas: &[(String, Language, i64)]) -> Result<()> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO themes (name, language, frequency) VALUES (?1, ?2, MAX(?3, 0))
             ON CONFLICT(name, language) DO UPDATE SET frequency = MAX(frequency + ?3, 0)",
        )?;
        for (name, language, delta) in deltas {
            stmt.execute(params![name, language.as_str(), delta])?;
        }
    }
    tx.commit().context("Failed to commit theme counts")?;
    Ok(())
}

/// Raw (name, language, frequency) rows with a positive count, most frequent first.
pub fn list_theme_counts(conn: &Connection) -> Result<Vec<(String, Language, u64)>> {
    let mut stmt = conn.prepare(
        "SELECT name, language, frequency FROM themes
         WHERE frequency > 0
         ORDER BY frequency DESC, name ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;

    let mut themes = Vec::new();
    for row in rows {
        let (name, language, frequency) = row?;
        let language: Language = language.parse()?;
        themes.push((name, language, frequency.max(0) as u64));
    }
    Ok(themes)
}

// --- Clusters ---

/// Swap in a new cluster set and the matching cluster references on results.
pub fn replace_clusters(conn: &mut Connection, clusters: &[Cluster]) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM clusters", [])?;
    tx.execute("UPDATE results SET cluster_id = NULL", [])?;
    {
        let mut insert = tx.prepare("INSERT INTO clusters (id, payload) VALUES (?1, ?2)")?;
        let mut assign = tx.prepare("UPDATE results SET cluster_id = ?1 WHERE record_id = ?2")?;
        for cluster in clusters {
            insert.execute(params![cluster.id, serde_json::to_string(cluster)?])?;
            for member in &cluster.members {
                assign.execute(params![cluster.id, member])?;
            }
        }
    }
    tx.commit().context("Failed to commit cluster set")?;
    Ok(())
}

/// Clusters by id, noise last.
pub fn list_clusters(conn: &Connection) -> Result<Vec<Cluster>> {
    let mut stmt = conn.prepare("SELECT payload FROM clusters ORDER BY id < 0, id")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

    let mut clusters = Vec::new();
    for row in rows {
        clusters.push(serde_json::from_str(&row?).context("Corrupt cluster payload")?);
    }
    Ok(clusters)
}

// --- Insights ---

/// Insert or update an insight by key, keeping the original creation time.
/// Returns the insight as stored.
pub fn upsert_insight(conn: &Connection, insight: &Insight) -> Result<Insight> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT created_at FROM insights WHERE key = ?1",
            params![insight.key],
            |row| row.get(0),
        )
        .optional()?;

    let mut stored = insight.clone();
    if let Some(created_at) = existing {
        stored.created_at = created_at
            .parse::<DateTime<Utc>>()
            .with_context(|| format!("Bad created_at for insight {}", insight.key))?;
    }

    conn.execute(
        "INSERT INTO insights (key, kind, scope, confidence, payload, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET
            kind = ?2,
            scope = ?3,
            confidence = ?4,
            payload = ?5,
            updated_at = datetime('now')",
        params![
            stored.key,
            stored.insight_type().as_str(),
            stored.scope.as_key(),
            stored.confidence,
            serde_json::to_string(&stored)?,
            stored.created_at.to_rfc3339(),
        ],
    )?;
    Ok(stored)
}

pub fn delete_insights(conn: &mut Connection, keys: &[String]) -> Result<()> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare("DELETE FROM insights WHERE key = ?1")?;
        for key in keys {
            stmt.execute(params![key])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// All insights, most confident first.
pub fn list_insights(conn: &Connection) -> Result<Vec<Insight>> {
    let mut stmt = conn.prepare("SELECT payload FROM insights ORDER BY confidence DESC, key ASC")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

    let mut insights = Vec::new();
    for row in rows {
        insights.push(serde_json::from_str(&row?).context("Corrupt insight payload")?);
    }
    Ok(insights)
}

// --- Status ---

pub fn counts(conn: &Connection) -> Result<StoreCounts> {
    let count = |sql: &str| -> Result<usize> {
        let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(n.max(0) as usize)
    };
    Ok(StoreCounts {
        records: count("SELECT COUNT(*) FROM records")?,
        results: count("SELECT COUNT(*) FROM results")?,
        needs_reprocessing: count("SELECT COUNT(*) FROM results WHERE needs_reprocessing = 1")?,
        themes: count("SELECT COUNT(*) FROM themes WHERE frequency > 0")?,
        clusters: count("SELECT COUNT(*) FROM clusters WHERE id >= 0")?,
        insights: count("SELECT COUNT(*) FROM insights")?,
    })
}
