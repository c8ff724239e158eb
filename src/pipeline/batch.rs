// Batch analysis — many records from one ingestion event.
//
// Records are validated up front, then classified concurrently (bounded by
// `concurrency`) in whatever order they finish. Results are joined by record
// id, theme counts are folded synchronously and written once, and the batch
// reports which records failed and which need reprocessing. One bad record
// never sinks the batch.

use std::collections::{BTreeMap, HashSet};

use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{error, info, warn};

use super::{fold_themes, Pipeline, Processed};
use crate::db::models::{AnalysisResult, EvaluationRecord};
use crate::error::PipelineError;
use crate::themes::extract::ThemeTally;

/// A record the batch could not analyze.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedRecord {
    pub id: String,
    pub reason: String,
}

impl FailedRecord {
    pub fn new(id: &str, err: &PipelineError) -> Self {
        Self {
            id: id.to_string(),
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    /// Successful results, ordered by record id
    pub results: Vec<AnalysisResult>,
    /// Rejected or failed records, ordered by id
    pub failed: Vec<FailedRecord>,
    /// Records whose sentiment was degraded and should be retried later
    pub reprocess: Vec<String>,
    /// Non-noise cluster count, when the batch triggered a recluster
    pub clusters: Option<usize>,
    /// Insights written, when the batch triggered regeneration
    pub insights: Option<usize>,
    /// The theme frequency update for this batch was not stored, so theme
    /// counts lag the stored results until they are rebuilt
    pub themes_stale: bool,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> usize {
        self.results.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.id.as_str()).collect()
    }

    /// Add records rejected before the batch ran, e.g. unparseable input lines.
    pub fn absorb_rejected(&mut self, rejected: Vec<FailedRecord>) {
        if rejected.is_empty() {
            return;
        }
        self.failed.extend(rejected);
        self.failed.sort_by(|a, b| a.id.cmp(&b.id));
    }
}

impl Pipeline {
    /// Analyze a batch with bounded concurrency. Never fails as a whole.
    pub async fn analyze_batch(&self, records: &[EvaluationRecord]) -> BatchOutcome {
        let mut failed = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut valid: Vec<&EvaluationRecord> = Vec::with_capacity(records.len());

        for record in records {
            if let Err(e) = record.validate() {
                warn!(record_id = %record.id, error = %e, "Record rejected");
                failed.push(FailedRecord::new(&record.id, &e));
                continue;
            }
            if !seen.insert(record.id.as_str()) {
                let e = PipelineError::validation(&record.id, "id", "appears twice in the batch");
                warn!(record_id = %record.id, "Duplicate record in batch, keeping the first");
                failed.push(FailedRecord::new(&record.id, &e));
                continue;
            }
            valid.push(record);
        }

        let pb = self.batch_progress(valid.len());
        let processed: Vec<(String, Result<Processed, PipelineError>)> =
            stream::iter(valid.into_iter().map(|record| {
                let pb = &pb;
                async move {
                    let outcome = self.process(record).await;
                    pb.inc(1);
                    (record.id.clone(), outcome)
                }
            }))
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;
        pb.finish_and_clear();

        // Join barrier: everything below sees the whole batch
        let mut joined: BTreeMap<String, Processed> = BTreeMap::new();
        for (id, outcome) in processed {
            match outcome {
                Ok(p) => {
                    joined.insert(id, p);
                }
                Err(e) => {
                    warn!(record_id = %id, error = %e, "Record failed, continuing batch");
                    failed.push(FailedRecord::new(&id, &e));
                }
            }
        }

        let mut tally = ThemeTally::new();
        for p in joined.values() {
            fold_themes(&mut tally, p);
        }
        let mut themes_stale = false;
        if !tally.is_empty() {
            if let Err(e) = self.store.add_theme_counts(&tally.deltas()).await {
                error!(error = %e, "Theme counts not updated for this batch");
                themes_stale = true;
            }
        }

        failed.sort_by(|a, b| a.id.cmp(&b.id));
        let results: Vec<AnalysisResult> = joined.into_values().map(|p| p.result).collect();
        let reprocess = results
            .iter()
            .filter(|r| r.needs_reprocessing)
            .map(|r| r.record_id.clone())
            .collect();

        let mut outcome = BatchOutcome {
            results,
            failed,
            reprocess,
            clusters: None,
            insights: None,
            themes_stale,
        };

        info!(
            submitted = records.len(),
            succeeded = outcome.succeeded(),
            failed = outcome.failed_count(),
            reprocess = outcome.reprocess.len(),
            themes_stale,
            "Batch analyzed"
        );

        let succeeded = outcome.succeeded();
        if threshold_reached(succeeded, self.settings.recluster_threshold) {
            match self.recluster().await {
                Ok(clusters) => {
                    outcome.clusters = Some(clusters.iter().filter(|c| !c.is_noise()).count());
                }
                Err(e) => warn!(error = %e, "Recluster after batch failed, previous clusters kept"),
            }
        }
        if threshold_reached(succeeded, self.settings.insight_threshold) {
            outcome.insights = Some(self.generate_insights(None).await.len());
        }

        outcome
    }

    /// Re-run every record whose sentiment was degraded.
    pub async fn reprocess_pending(&self) -> Result<BatchOutcome, PipelineError> {
        let pending: HashSet<String> = self
            .store
            .list_results()
            .await?
            .into_iter()
            .filter(|r| r.needs_reprocessing)
            .map(|r| r.record_id)
            .collect();
        if pending.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let records: Vec<EvaluationRecord> = self
            .store
            .list_records()
            .await?
            .into_iter()
            .filter(|r| pending.contains(&r.id))
            .collect();

        info!(count = records.len(), "Reprocessing degraded records");
        Ok(self.analyze_batch(&records).await)
    }

    fn batch_progress(&self, len: usize) -> ProgressBar {
        if !self.settings.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  Analyzing [{bar:30}] {pos}/{len} ({eta})")
                .expect("valid template"),
        );
        pb
    }
}

fn threshold_reached(count: usize, threshold: usize) -> bool {
    threshold > 0 && count >= threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_zero_disables() {
        assert!(!threshold_reached(1000, 0));
        assert!(threshold_reached(50, 50));
        assert!(!threshold_reached(49, 50));
    }

    #[test]
    fn test_failed_ids() {
        let outcome = BatchOutcome {
            failed: vec![FailedRecord {
                id: "r9".into(),
                reason: "bad".into(),
            }],
            ..BatchOutcome::default()
        };
        assert_eq!(outcome.failed_ids(), vec!["r9"]);
        assert_eq!(outcome.succeeded(), 0);
    }

    #[test]
    fn test_absorb_rejected_keeps_order() {
        let mut outcome = BatchOutcome {
            failed: vec![FailedRecord {
                id: "r5".into(),
                reason: "bad".into(),
            }],
            ..BatchOutcome::default()
        };
        outcome.absorb_rejected(vec![FailedRecord {
            id: "line 2".into(),
            reason: "not json".into(),
        }]);
        assert_eq!(outcome.failed_ids(), vec!["line 2", "r5"]);
    }
}
