// src/throttle.rs
//! Minimum-interval rate limiter shared by every caller of one external resource.
//!
//! Concurrent callers serialize through a single async mutex that guards the
//! last-grant instant; waiting happens with `tokio::time::sleep`, so unrelated
//! tasks keep running. Clones share state, separate instances never interact.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Clone, Debug)]
pub struct RateLimiter {
    min_interval: Option<Duration>,
    last_grant: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    /// `requests_per_minute <= 0` disables limiting.
    pub fn new(requests_per_minute: i64) -> Self {
        let min_interval = if requests_per_minute > 0 {
            Some(Duration::from_secs_f64(60.0 / requests_per_minute as f64))
        } else {
            None
        };
        Self {
            min_interval,
            last_grant: Arc::new(Mutex::new(None)),
        }
    }

    pub fn disabled() -> Self {
        Self::new(0)
    }

    pub fn min_interval(&self) -> Option<Duration> {
        self.min_interval
    }

    /// Wait until at least `60 / rpm` seconds passed since the previous grant.
    pub async fn wait(&self) {
        let Some(interval) = self.min_interval else {
            return;
        };
        let mut last = self.last_grant.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < interval {
                tokio::time::sleep(interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}
