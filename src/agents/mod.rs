// src/agents/mod.rs
//! LLM stage agents and the batch runner they share.
//!
//! An agent turns one input into one output and never fails: LLM or transport
//! errors become the agent's deterministic fallback. `run_batch` fans a slice
//! out over at most `workers()` concurrent tasks and returns results in input
//! order. Throughput is bounded separately by each agent's own `RateLimiter`.

pub mod analysis;
pub mod carve_out;
pub mod compose;
pub mod dedupe;
pub mod triage;

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::FutureExt;
use metrics::counter;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::llm::json::{extract_json, JsonObject};
use crate::llm::LlmClient;
use crate::throttle::RateLimiter;

/// `(completed, total)`, called once per finished item from whichever task finished it.
pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Optional per-item prompt context.
pub type ContextFn<I> = Arc<dyn Fn(&I) -> Option<String> + Send + Sync>;

#[async_trait]
pub trait StageAgent: Send + Sync + 'static {
    type Input: Clone + Send + Sync + 'static;
    type Output: Send + 'static;

    /// Stage label for logs and metrics.
    fn stage(&self) -> &'static str;

    /// Worker pool size for `run_batch`; `<= 1` runs sequentially.
    fn workers(&self) -> usize;

    /// One LLM round trip. Errors are turned into `fallback` by `process_one`.
    async fn attempt(&self, item: &Self::Input, context: Option<&str>) -> Result<Self::Output>;

    /// Deterministic, clearly flagged result for an item that could not be processed.
    fn fallback(&self, item: &Self::Input) -> Self::Output;

    async fn process_one(&self, item: &Self::Input, context: Option<&str>) -> Self::Output {
        counter!("agent_items_total", "stage" => self.stage()).increment(1);
        match self.attempt(item, context).await {
            Ok(out) => out,
            Err(e) => {
                counter!("agent_item_failures_total", "stage" => self.stage()).increment(1);
                tracing::warn!(target: "agents", stage = self.stage(), error = %format!("{e:#}"), "item fell back");
                self.fallback(item)
            }
        }
    }
}

/// `process_one` with panics turned into the agent's fallback.
async fn guarded<A: StageAgent>(
    agent: &A,
    item: &A::Input,
    context: Option<&str>,
    idx: usize,
) -> A::Output {
    match AssertUnwindSafe(agent.process_one(item, context))
        .catch_unwind()
        .await
    {
        Ok(out) => out,
        Err(_) => {
            counter!("agent_item_failures_total", "stage" => agent.stage()).increment(1);
            tracing::error!(target: "agents", stage = agent.stage(), idx, "worker panicked");
            agent.fallback(item)
        }
    }
}

/// Process `items` with `agent`, returning one output per input in input order.
pub async fn run_batch<A: StageAgent>(
    agent: Arc<A>,
    items: &[A::Input],
    on_progress: Option<ProgressFn>,
    context: Option<ContextFn<A::Input>>,
) -> Vec<A::Output> {
    crate::telemetry::ensure_metrics_described();

    let total = items.len();
    if total == 0 {
        return Vec::new();
    }
    let ctx_for = |item: &A::Input| context.as_ref().and_then(|f| f(item));

    if agent.workers() <= 1 {
        let mut out = Vec::with_capacity(total);
        for (i, item) in items.iter().enumerate() {
            let ctx = ctx_for(item);
            out.push(guarded(agent.as_ref(), item, ctx.as_deref(), i).await);
            if let Some(p) = &on_progress {
                p(i + 1, total);
            }
        }
        return out;
    }

    let semaphore = Arc::new(Semaphore::new(agent.workers()));
    let completed = Arc::new(AtomicUsize::new(0));
    let mut set = JoinSet::new();
    for (idx, item) in items.iter().enumerate() {
        let item = item.clone();
        let ctx = ctx_for(&item);
        let agent = Arc::clone(&agent);
        let semaphore = Arc::clone(&semaphore);
        let completed = Arc::clone(&completed);
        let on_progress = on_progress.clone();
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let out = guarded(agent.as_ref(), &item, ctx.as_deref(), idx).await;
            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(p) = &on_progress {
                p(done, total);
            }
            (idx, out)
        });
    }

    let mut slots: Vec<Option<A::Output>> = (0..total).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, out)) => slots[idx] = Some(out),
            Err(e) => tracing::error!(target: "agents", stage = agent.stage(), error = %e, "worker join failed"),
        }
    }
    slots
        .into_iter()
        .zip(items)
        .map(|(slot, item)| slot.unwrap_or_else(|| agent.fallback(item)))
        .collect()
}

/// Paced LLM call parsed into a JSON object (empty when the reply holds none).
pub(crate) async fn ask_json(
    llm: &dyn LlmClient,
    limiter: &RateLimiter,
    prompt: &str,
) -> Result<JsonObject> {
    if !llm.is_available() {
        bail!("LLM unavailable ({})", llm.provider_name());
    }
    limiter.wait().await;
    let reply = llm.invoke(prompt).await?;
    Ok(extract_json(&reply))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Doubler {
        workers: usize,
    }

    #[async_trait]
    impl StageAgent for Doubler {
        type Input = u64;
        type Output = i64;

        fn stage(&self) -> &'static str {
            "double"
        }
        fn workers(&self) -> usize {
            self.workers
        }
        async fn attempt(&self, item: &u64, context: Option<&str>) -> Result<i64> {
            // Later items finish first so completion order differs from input order.
            tokio::time::sleep(Duration::from_millis(100 - *item)).await;
            match *item {
                7 => bail!("seven"),
                13 => panic!("unlucky"),
                n => Ok(n as i64 * 2 + context.map_or(0, |c| c.len() as i64)),
            }
        }
        fn fallback(&self, _item: &u64) -> i64 {
            -1
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_batch_keeps_input_order() {
        let items: Vec<u64> = (0..20).collect();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let progress: ProgressFn = Arc::new(move |done, total| s.lock().push((done, total)));

        let out = run_batch(Arc::new(Doubler { workers: 4 }), &items, Some(progress), None).await;

        let expected: Vec<i64> = items
            .iter()
            .map(|&n| match n {
                7 | 13 => -1,
                n => n as i64 * 2,
            })
            .collect();
        assert_eq!(out, expected);
        let seen = seen.lock();
        assert_eq!(seen.len(), 20);
        let mut counts: Vec<usize> = seen.iter().map(|(d, _)| *d).collect();
        counts.sort_unstable();
        assert_eq!(counts, (1..=20).collect::<Vec<_>>());
        assert!(seen.iter().all(|(_, t)| *t == 20));
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_batch_passes_context() {
        let ctx: ContextFn<u64> = Arc::new(|n| (*n == 2).then(|| "abc".to_string()));
        let out = run_batch(Arc::new(Doubler { workers: 1 }), &[1, 2, 7], None, Some(ctx)).await;
        assert_eq!(out, vec![2, 7, -1]);
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_batch_survives_a_panicking_item() {
        let out = run_batch(Arc::new(Doubler { workers: 1 }), &[1, 13, 2], None, None).await;
        assert_eq!(out, vec![2, -1, 4]);
    }
}
