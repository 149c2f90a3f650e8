// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod agents;
pub mod config;
pub mod curate;
pub mod ingest;
pub mod llm;
pub mod model;
pub mod notify;
pub mod portfolio;
pub mod retry;
pub mod telemetry;
pub mod throttle;
pub mod workflow;

// ---- Re-exports for stable public API ----
pub use crate::config::Settings;
pub use crate::throttle::RateLimiter;
pub use crate::workflow::{Collaborators, Node, PipelineState, RunOptions, RunReport, WorkflowEngine};
