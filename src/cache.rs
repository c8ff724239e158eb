// Content-addressed result cache with single-flight.
//
// Keyed by a fingerprint of (normalized text, language, model version).
// The first caller for a fingerprint runs the computation; callers arriving
// while it is in flight wait on the same cell and share its value, so a
// batch full of identical comments costs one classifier call. Entries never
// expire. Bumping the model version changes every fingerprint, which is the
// only invalidation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::db::models::ThemeTag;
use crate::language::Language;
use crate::sentiment::stage::SentimentOutcome;

/// Collapse whitespace and case so trivially different copies share a key.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Hex SHA-256 of the normalized text, language and model version.
pub fn fingerprint(text: &str, language: Language, model_version: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_text(text).as_bytes());
    hasher.update([0x1f]);
    hasher.update(language.as_str().as_bytes());
    hasher.update([0x1f]);
    hasher.update(model_version.as_bytes());
    hex::encode(hasher.finalize())
}

/// Everything about a comment that depends only on its text and language.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedAnalysis {
    pub sentiment: SentimentOutcome,
    pub themes: Vec<ThemeTag>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Default)]
pub struct ResultCache {
    cells: Mutex<HashMap<String, Arc<OnceCell<CachedAnalysis>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, fingerprint: &str) -> Arc<OnceCell<CachedAnalysis>> {
        let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(cells.entry(fingerprint.to_string()).or_default())
    }

    /// Cached value for a fingerprint, if one has been computed.
    pub fn get(&self, fingerprint: &str) -> Option<CachedAnalysis> {
        let cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        cells.get(fingerprint).and_then(|cell| cell.get().cloned())
    }

    /// Return the cached analysis, or run `compute` exactly once per
    /// fingerprint across concurrent callers.
    ///
    /// Degraded results are handed back to the caller but not stored, so a
    /// later call tries the classifier again.
    pub async fn get_or_compute<F, Fut>(&self, fingerprint: &str, compute: F) -> CachedAnalysis
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CachedAnalysis>,
    {
        let cell = self.cell(fingerprint);
        if let Some(hit) = cell.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return hit.clone();
        }

        let mut computed_here = false;
        let result = cell
            .get_or_try_init(|| async {
                computed_here = true;
                self.misses.fetch_add(1, Ordering::Relaxed);
                let analysis = compute().await;
                if analysis.sentiment.degraded {
                    Err(analysis)
                } else {
                    Ok(analysis)
                }
            })
            .await;

        match result {
            Ok(analysis) => {
                if !computed_here {
                    // Waited on another caller's computation
                    self.hits.fetch_add(1, Ordering::Relaxed);
                }
                analysis.clone()
            }
            Err(degraded) => {
                debug!(fingerprint = fingerprint, "Degraded result not cached");
                degraded
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self
            .cells
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|cell| cell.initialized())
            .count();
        CacheStats {
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::SentimentLabel;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn positive() -> CachedAnalysis {
        CachedAnalysis {
            sentiment: SentimentOutcome {
                label: SentimentLabel::Positive,
                score: 0.9,
                confidence: 0.9,
                degraded: false,
            },
            themes: Vec::new(),
        }
    }

    #[test]
    fn test_fingerprint_ignores_case_and_spacing() {
        let a = fingerprint("Formation  très utile", Language::Fr, "1");
        let b = fingerprint("formation très UTILE ", Language::Fr, "1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_depends_on_language_and_version() {
        let base = fingerprint("formation", Language::Fr, "1");
        assert_ne!(base, fingerprint("formation", Language::Darija, "1"));
        assert_ne!(base, fingerprint("formation", Language::Fr, "2"));
    }

    #[tokio::test]
    async fn test_second_lookup_is_a_hit() {
        let cache = ResultCache::new();
        let calls = AtomicU32::new(0);
        for _ in 0..2 {
            cache
                .get_or_compute("fp", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    positive()
                })
                .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats, CacheStats { entries: 1, hits: 1, misses: 1 });
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_computation() {
        let cache = Arc::new(ResultCache::new());
        let calls = Arc::new(AtomicU32::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_compute("same", || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            positive()
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap(), positive());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_degraded_result_is_not_cached() {
        let cache = ResultCache::new();
        let degraded = CachedAnalysis {
            sentiment: SentimentOutcome::degraded(),
            themes: Vec::new(),
        };

        let first = cache.get_or_compute("fp", || async { degraded.clone() }).await;
        assert!(first.sentiment.degraded);
        assert!(cache.get("fp").is_none());

        let second = cache.get_or_compute("fp", || async { positive() }).await;
        assert_eq!(second, positive());
        assert_eq!(cache.get("fp"), Some(positive()));
    }
}
