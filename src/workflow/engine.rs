// src/workflow/engine.rs
//! Superstep loop: run the frontier, merge its updates, checkpoint, route.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::try_join_all;
use metrics::{counter, gauge, histogram};
use tokio::time::Instant;

use super::checkpoint::{Checkpoint, CheckpointStore};
use super::node::{entry, route, Node};
use super::nodes::{run_node, Collaborators};
use super::state::{PipelineState, StateUpdate};

/// Thread id that means "most recent run" on resume and "new id" on a fresh run.
pub const LATEST: &str = "latest";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub thread_id: String,
    pub resume: bool,
    /// Halt once this node's superstep is checkpointed.
    pub stop_after: Option<Node>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            thread_id: LATEST.to_string(),
            resume: false,
            stop_after: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run_id: String,
    pub state: PipelineState,
    pub completed: Vec<Node>,
    /// Non-empty when the run stopped early.
    pub next: Vec<Node>,
    pub resumed: bool,
}

impl RunReport {
    pub fn is_finished(&self) -> bool {
        self.next.is_empty()
    }
}

pub struct WorkflowEngine {
    deps: Arc<Collaborators>,
    store: Arc<dyn CheckpointStore>,
}

struct Cursor {
    run_id: String,
    step: u32,
    completed: Vec<Node>,
    frontier: Vec<Node>,
    state: PipelineState,
    resumed: bool,
}

impl WorkflowEngine {
    pub fn new(deps: Arc<Collaborators>, store: Arc<dyn CheckpointStore>) -> Self {
        Self { deps, store }
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.deps
    }

    fn fresh_run_id(&self, requested: &str) -> String {
        if requested.is_empty() || requested == LATEST {
            format!("run-{}", self.deps.clock.now().format("%Y%m%dT%H%M%SZ"))
        } else {
            requested.to_string()
        }
    }

    async fn start(&self, opts: &RunOptions) -> Result<Cursor> {
        if opts.resume {
            let id = if opts.thread_id == LATEST {
                self.store.latest().await?
            } else {
                Some(opts.thread_id.clone())
            };
            let found = match &id {
                Some(id) => self.store.get(id).await?,
                None => None,
            };
            match found {
                Some(cp) => {
                    tracing::info!(
                        target: "workflow",
                        run_id = %cp.run_id,
                        step = cp.step,
                        next = ?cp.next,
                        "resuming from checkpoint"
                    );
                    return Ok(Cursor {
                        run_id: cp.run_id,
                        step: cp.step,
                        completed: cp.completed,
                        frontier: cp.next,
                        state: cp.state,
                        resumed: true,
                    });
                }
                None => {
                    tracing::warn!(
                        target: "workflow",
                        thread_id = %opts.thread_id,
                        "no checkpoint for thread id; starting fresh"
                    );
                }
            }
        }
        Ok(Cursor {
            run_id: self.fresh_run_id(&opts.thread_id),
            step: 0,
            completed: Vec::new(),
            frontier: entry(),
            state: PipelineState::default(),
            resumed: false,
        })
    }

    async fn run_one(&self, node: Node, state: &PipelineState) -> Result<StateUpdate> {
        let t0 = Instant::now();
        tracing::info!(target: "workflow", node = node.name(), "node started");
        let update = run_node(node, state, &self.deps)
            .await
            .with_context(|| format!("node {}", node.name()))?;
        let ms = t0.elapsed().as_secs_f64() * 1000.0;
        counter!("pipeline_node_runs_total", "node" => node.name()).increment(1);
        histogram!("pipeline_node_ms", "node" => node.name()).record(ms);
        tracing::info!(target: "workflow", node = node.name(), ms, "node finished");
        Ok(update)
    }

    /// Drive the graph to its end, or to `stop_after`.
    ///
    /// A node error aborts the run and leaves the previous checkpoint in place.
    pub async fn run(&self, opts: RunOptions) -> Result<RunReport> {
        crate::telemetry::ensure_metrics_described();

        let mut cur = self.start(&opts).await?;
        if cur.resumed && cur.frontier.is_empty() {
            tracing::info!(target: "workflow", run_id = %cur.run_id, "run already complete");
        }

        while !cur.frontier.is_empty() {
            let frontier = std::mem::take(&mut cur.frontier);
            let updates = if frontier.len() == 1 {
                vec![self.run_one(frontier[0], &cur.state).await?]
            } else {
                let snapshot = &cur.state;
                try_join_all(frontier.iter().map(|&n| self.run_one(n, snapshot))).await?
            };
            cur.state.apply_all(updates);

            cur.step += 1;
            cur.completed.extend(frontier.iter().copied());
            let next = route(&frontier, &cur.state);
            let checkpoint = Checkpoint {
                run_id: cur.run_id.clone(),
                step: cur.step,
                completed: cur.completed.clone(),
                next: next.clone(),
                state: cur.state.clone(),
                saved_at: self.deps.clock.now(),
            };
            self.store.put(&checkpoint).await.context("persist checkpoint")?;
            counter!("pipeline_checkpoints_total").increment(1);
            tracing::debug!(target: "workflow", run_id = %cur.run_id, step = cur.step, next = ?next, "checkpoint written");

            cur.frontier = next;
            if let Some(stop) = opts.stop_after.filter(|s| frontier.contains(s)) {
                tracing::info!(target: "workflow", run_id = %cur.run_id, node = stop.name(), "stopping early");
                break;
            }
        }

        if cur.frontier.is_empty() {
            gauge!("pipeline_last_run_ts").set(self.deps.clock.now().timestamp() as f64);
            tracing::info!(
                target: "workflow",
                run_id = %cur.run_id,
                steps = cur.step,
                errors = cur.state.errors.len(),
                "run complete"
            );
        }
        Ok(RunReport {
            run_id: cur.run_id,
            state: cur.state,
            completed: cur.completed,
            next: cur.frontier,
            resumed: cur.resumed,
        })
    }
}
