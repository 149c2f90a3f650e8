// src/telemetry.rs
//! Metric descriptions and the Prometheus recorder used by the binary.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up in the snapshot).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_node_runs_total", "Workflow node executions, by node.");
        describe_histogram!("pipeline_node_ms", "Workflow node wall time in milliseconds.");
        describe_counter!("pipeline_checkpoints_total", "Checkpoints written.");
        describe_gauge!("pipeline_last_run_ts", "Unix ts when the pipeline last finished.");
        describe_counter!("agent_items_total", "Items processed by an LLM stage agent.");
        describe_counter!(
            "agent_item_failures_total",
            "Items that fell back to the deterministic result."
        );
        describe_counter!("fetch_tasks_total", "Bounded fetch tasks started.");
        describe_counter!("fetch_errors_total", "Bounded fetch tasks that failed.");
        describe_counter!(
            "collect_provider_errors_total",
            "Feed or search provider failures."
        );
        describe_counter!("collect_items_total", "Items collected, by source kind.");
        describe_histogram!("collect_parse_ms", "Feed parse time in milliseconds.");
    });
}

pub struct Telemetry {
    pub handle: PrometheusHandle,
}

impl Telemetry {
    /// Install the global Prometheus recorder.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("installing prometheus recorder")?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Write the exposition text to `<dir>/metrics.prom`.
    pub fn write_snapshot(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let path = dir.join("metrics.prom");
        fs::write(&path, self.handle.render())
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}
