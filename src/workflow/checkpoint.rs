// src/workflow/checkpoint.rs
//! Persisted `(run_id, frontier, state)` after every superstep.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use super::node::Node;
use super::state::PipelineState;
use crate::ingest::item_id;
use crate::llm::write_atomic;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    /// Number of supersteps completed.
    pub step: u32,
    pub completed: Vec<Node>,
    /// Empty once the run reached its end.
    pub next: Vec<Node>,
    pub state: PipelineState,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn is_finished(&self) -> bool {
        self.next.is_empty()
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, run_id: &str) -> Result<Option<Checkpoint>>;
    async fn put(&self, checkpoint: &Checkpoint) -> Result<()>;
    /// Run id of the most recent `put`, if any.
    async fn latest(&self) -> Result<Option<String>>;
}

/// One JSON file per run id plus a `LATEST` pointer, both replaced atomically.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

const LATEST_FILE: &str = "LATEST";

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File for `run_id`. Ids that are not already file-safe get a hash
    /// suffix so two ids never share a file.
    fn path_for(&self, run_id: &str) -> PathBuf {
        let safe: String = run_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let name = if safe == run_id && !safe.is_empty() {
            safe
        } else {
            format!("{safe}~{}", &item_id(run_id)[..12])
        };
        self.dir.join(format!("{name}.json"))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn get(&self, run_id: &str) -> Result<Option<Checkpoint>> {
        let path = self.path_for(run_id);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("read checkpoint {}", path.display())),
        };
        let cp: Checkpoint =
            serde_json::from_str(&text).with_context(|| format!("parse checkpoint {}", path.display()))?;
        // A file written for a different id is not this run.
        Ok((cp.run_id == run_id).then_some(cp))
    }

    async fn put(&self, checkpoint: &Checkpoint) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("create {}", self.dir.display()))?;
        let path = self.path_for(&checkpoint.run_id);
        let body = serde_json::to_vec_pretty(checkpoint).context("serialize checkpoint")?;
        write_atomic(&path, &body)
            .await
            .with_context(|| format!("write checkpoint {}", path.display()))?;
        write_atomic(&self.dir.join(LATEST_FILE), checkpoint.run_id.as_bytes())
            .await
            .context("write LATEST pointer")?;
        Ok(())
    }

    async fn latest(&self) -> Result<Option<String>> {
        let path = self.dir.join(LATEST_FILE);
        let id = match fs::read_to_string(&path).await {
            Ok(id) => id,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("read LATEST pointer"),
        };
        let id = id.trim();
        Ok((!id.is_empty()).then(|| id.to_string()))
    }
}

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    inner: Mutex<(HashMap<String, Checkpoint>, Option<String>)>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every run id stored so far.
    pub fn run_ids(&self) -> Vec<String> {
        let g = self.inner.lock().expect("checkpoint store mutex poisoned");
        let mut ids: Vec<String> = g.0.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get(&self, run_id: &str) -> Result<Option<Checkpoint>> {
        let g = self.inner.lock().expect("checkpoint store mutex poisoned");
        Ok(g.0.get(run_id).cloned())
    }

    async fn put(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut g = self.inner.lock().expect("checkpoint store mutex poisoned");
        g.0.insert(checkpoint.run_id.clone(), checkpoint.clone());
        g.1 = Some(checkpoint.run_id.clone());
        Ok(())
    }

    async fn latest(&self) -> Result<Option<String>> {
        let g = self.inner.lock().expect("checkpoint store mutex poisoned");
        Ok(g.1.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn checkpoint(run_id: &str, step: u32) -> Checkpoint {
        let mut state = PipelineState {
            lookback_days: 7,
            ..PipelineState::default()
        };
        state.errors.push("feed down".into());
        Checkpoint {
            run_id: run_id.into(),
            step,
            completed: vec![Node::Initialize],
            next: vec![Node::CollectRss, Node::CollectSearch],
            state,
            saved_at: Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn file_store_round_trips_and_tracks_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("cp"));
        assert!(store.get("run-1").await.unwrap().is_none());
        assert!(store.latest().await.unwrap().is_none());

        store.put(&checkpoint("run-1", 1)).await.unwrap();
        store.put(&checkpoint("run/2", 2)).await.unwrap();

        assert_eq!(store.get("run-1").await.unwrap(), Some(checkpoint("run-1", 1)));
        assert_eq!(store.get("run/2").await.unwrap().unwrap().step, 2);
        assert_eq!(store.latest().await.unwrap().as_deref(), Some("run/2"));
        assert!(dir.path().join("cp").join("run-1.json").exists());
        assert!(!dir.path().join("cp").join("run-1.json.tmp").exists());
    }

    #[tokio::test]
    async fn ids_that_sanitize_alike_stay_separate() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.put(&checkpoint("weekly/a", 3)).await.unwrap();
        assert!(store.get("weekly_a").await.unwrap().is_none());

        store.put(&checkpoint("weekly_a", 5)).await.unwrap();
        assert_eq!(store.get("weekly/a").await.unwrap().unwrap().step, 3);
        assert_eq!(store.get("weekly_a").await.unwrap().unwrap().step, 5);
    }

    #[tokio::test]
    async fn put_overwrites_previous_step() {
        let store = InMemoryCheckpointStore::new();
        store.put(&checkpoint("r", 1)).await.unwrap();
        store.put(&checkpoint("r", 2)).await.unwrap();
        assert_eq!(store.get("r").await.unwrap().unwrap().step, 2);
        assert_eq!(store.run_ids(), vec!["r".to_string()]);
    }
}
