// src/workflow/mod.rs
pub mod checkpoint;
pub mod clock;
pub mod engine;
pub mod node;
pub mod nodes;
pub mod state;

pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
pub use clock::{Clock, FixedClock, SystemClock};
pub use engine::{RunOptions, RunReport, WorkflowEngine, LATEST};
pub use node::{route, Node};
pub use nodes::Collaborators;
pub use state::{PipelineState, StateUpdate};
