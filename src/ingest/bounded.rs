// src/ingest/bounded.rs
//! Concurrency-bounded, rate-limited fan-out over a set of keys.
//!
//! One task per key. Each task takes a semaphore permit, then waits on the
//! shared rate limiter, then runs the operation. A failing or panicking task
//! becomes an entry in `errors`; its siblings keep going. Results are keyed,
//! so callers merge in their own key order and completion order never leaks.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use metrics::counter;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::throttle::RateLimiter;

#[derive(Debug)]
pub struct FetchOutcome<K, T> {
    pub results: HashMap<K, T>,
    pub errors: Vec<String>,
}

impl<K, T> Default for FetchOutcome<K, T> {
    fn default() -> Self {
        Self {
            results: HashMap::new(),
            errors: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct BoundedFetcher {
    limiter: RateLimiter,
    semaphore: Arc<Semaphore>,
}

impl BoundedFetcher {
    /// `max_concurrency` of zero is treated as one.
    pub fn new(requests_per_minute: i64, max_concurrency: usize) -> Self {
        Self::with_limiter(RateLimiter::new(requests_per_minute), max_concurrency)
    }

    pub fn with_limiter(limiter: RateLimiter, max_concurrency: usize) -> Self {
        Self {
            limiter,
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    /// Run `op` once per distinct key.
    pub async fn run<K, T, F, Fut>(&self, keys: Vec<K>, op: F) -> FetchOutcome<K, T>
    where
        K: Eq + Hash + Clone + Display + Send + 'static,
        T: Send + 'static,
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        crate::telemetry::ensure_metrics_described();

        let op = Arc::new(op);
        let mut seen = HashSet::new();
        let mut set = JoinSet::new();
        for key in keys {
            if !seen.insert(key.clone()) {
                continue;
            }
            let op = Arc::clone(&op);
            let sem = Arc::clone(&self.semaphore);
            let limiter = self.limiter.clone();
            set.spawn(async move {
                counter!("fetch_tasks_total").increment(1);
                let out = match sem.acquire_owned().await {
                    Ok(_permit) => {
                        limiter.wait().await;
                        AssertUnwindSafe(op(key.clone()))
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|_| Err(anyhow::anyhow!("task panicked")))
                    }
                    Err(e) => Err(anyhow::anyhow!(e)),
                };
                (key, out)
            });
        }

        let mut outcome = FetchOutcome::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((key, Ok(v))) => {
                    outcome.results.insert(key, v);
                }
                Ok((key, Err(e))) => {
                    counter!("fetch_errors_total").increment(1);
                    tracing::debug!(target: "fetch", %key, error = %e, "fetch failed");
                    outcome.errors.push(format!("{key}: {e:#}"));
                }
                Err(e) => {
                    counter!("fetch_errors_total").increment(1);
                    outcome.errors.push(format!("task join error: {e}"));
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_concurrency() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let fetcher = BoundedFetcher::new(0, 3);

        let (f, p) = (in_flight.clone(), peak.clone());
        let out = fetcher
            .run((0..12).collect::<Vec<u32>>(), move |k| {
                let (f, p) = (f.clone(), p.clone());
                async move {
                    let now = f.fetch_add(1, Ordering::SeqCst) + 1;
                    p.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    f.fetch_sub(1, Ordering::SeqCst);
                    Ok(k * 2)
                }
            })
            .await;

        assert_eq!(out.results.len(), 12);
        assert_eq!(out.results[&5], 10);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(out.errors.is_empty());
    }

    #[tokio::test]
    async fn failures_and_panics_are_isolated() {
        let fetcher = BoundedFetcher::new(0, 4);
        let out = fetcher
            .run(vec![1u32, 2, 3, 3], |k| async move {
                match k {
                    2 => anyhow::bail!("boom"),
                    3 => panic!("task blew up"),
                    _ => Ok(k),
                }
            })
            .await;
        assert_eq!(out.results.len(), 1);
        assert_eq!(out.errors.len(), 2, "duplicate key 3 runs once");
        assert!(out.errors.iter().any(|e| e.starts_with("2: boom")));
    }
}
