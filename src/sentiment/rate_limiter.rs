// Token-bucket rate limiter for classifier calls.
//
// The hosted inference API throttles per token. Batches fan out with bounded
// concurrency, but concurrency alone does not bound the request rate, so
// every remote call first takes a slot here. Slots are spaced at least
// 1/requests_per_second apart. A caller cancelled while waiting hands its
// slot back when nobody has booked after it.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

const MAX_INTERVAL: Duration = Duration::from_secs(3600);

/// Shared request pacer. Cloning shares the same schedule.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<Schedule>>,
}

struct Schedule {
    /// Minimum spacing between requests; zero disables pacing
    interval: Duration,
    /// Earliest instant the next request may start
    next_slot: Option<Instant>,
}

impl RateLimiter {
    /// Allow `requests_per_second` requests per second. Zero, negative,
    /// infinite or NaN rates mean unlimited; tiny rates wait at most an hour.
    pub fn new(requests_per_second: f64) -> Self {
        let interval = if requests_per_second.is_finite() && requests_per_second > 0.0 {
            Duration::try_from_secs_f64(1.0 / requests_per_second)
                .unwrap_or(MAX_INTERVAL)
                .min(MAX_INTERVAL)
        } else {
            Duration::ZERO
        };
        Self {
            inner: Arc::new(Mutex::new(Schedule {
                interval,
                next_slot: None,
            })),
        }
    }

    /// Reserve the next slot and sleep until it arrives.
    ///
    /// The slot is booked while holding the lock and the sleep happens after
    /// releasing it, so concurrent callers queue up behind each other
    /// instead of all waking at the same instant.
    pub async fn acquire(&self) {
        let (slot, booked_until) = {
            let mut schedule = self.inner.lock().await;
            let now = Instant::now();
            let slot = match schedule.next_slot {
                Some(next) if next > now => next,
                _ => now,
            };
            let booked_until = slot + schedule.interval;
            schedule.next_slot = Some(booked_until);
            (slot, booked_until)
        };

        if slot > Instant::now() {
            let mut booking = Booking {
                limiter: self,
                slot,
                booked_until,
                used: false,
            };
            tokio::time::sleep_until(slot).await;
            booking.used = true;
        }
    }
}

/// A slot still being waited for.
struct Booking<'a> {
    limiter: &'a RateLimiter,
    slot: Instant,
    booked_until: Instant,
    used: bool,
}

impl Drop for Booking<'_> {
    fn drop(&mut self) {
        if self.used {
            return;
        }
        // Best effort: a contended lock means another caller is booking
        // right now, and the slot is simply skipped.
        if let Ok(mut schedule) = self.limiter.inner.try_lock() {
            if schedule.next_slot == Some(self.booked_until) {
                schedule.next_slot = Some(self.slot);
            }
        }
    }
}
