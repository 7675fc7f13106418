//! In-memory reference implementation of [`CheckpointSaver`].
//!
//! Keeps every snapshot for every run in a `HashMap` behind a tokio
//! `RwLock`. Suitable for tests and single-process runs; nothing survives
//! the process.

use crate::checkpoint::Checkpoint;
use crate::error::Result;
use crate::traits::CheckpointSaver;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local checkpoint storage.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointSaver {
    runs: RwLock<HashMap<String, Vec<Checkpoint>>>,
}

impl InMemoryCheckpointSaver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of runs with at least one snapshot.
    pub async fn run_count(&self) -> usize {
        self.runs.read().await.len()
    }

    /// Total snapshots across all runs.
    pub async fn checkpoint_count(&self) -> usize {
        self.runs.read().await.values().map(Vec::len).sum()
    }

    /// Drop everything.
    pub async fn clear(&self) {
        self.runs.write().await.clear();
    }
}

#[async_trait]
impl CheckpointSaver for InMemoryCheckpointSaver {
    async fn save(&self, run_id: &str, checkpoint: Checkpoint) -> Result<()> {
        let mut runs = self.runs.write().await;
        runs.entry(run_id.to_string()).or_default().push(checkpoint);
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<Checkpoint>> {
        let runs = self.runs.read().await;
        Ok(runs.get(run_id).and_then(|history| history.last().cloned()))
    }

    async fn list(&self, run_id: &str) -> Result<Vec<Checkpoint>> {
        let runs = self.runs.read().await;
        Ok(runs.get(run_id).cloned().unwrap_or_default())
    }

    async fn delete(&self, run_id: &str) -> Result<()> {
        let mut runs = self.runs.write().await;
        runs.remove(run_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(superstep: usize) -> Checkpoint {
        let mut values = HashMap::new();
        values.insert("count".to_string(), json!(superstep));
        Checkpoint::new(superstep, values)
    }

    #[tokio::test]
    async fn save_and_load_latest() {
        let saver = InMemoryCheckpointSaver::new();
        saver.save("run-1", snapshot(0)).await.unwrap();
        saver.save("run-1", snapshot(1)).await.unwrap();

        let latest = saver.load("run-1").await.unwrap().unwrap();
        assert_eq!(latest.superstep, 1);
        assert_eq!(saver.checkpoint_count().await, 2);
    }

    #[tokio::test]
    async fn load_unknown_run_is_none() {
        let saver = InMemoryCheckpointSaver::new();
        assert!(saver.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_returns_history_in_order() {
        let saver = InMemoryCheckpointSaver::new();
        for step in 0..3 {
            saver.save("run-1", snapshot(step)).await.unwrap();
        }
        let history = saver.list("run-1").await.unwrap();
        let steps: Vec<usize> = history.iter().map(|c| c.superstep).collect();
        assert_eq!(steps, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn delete_removes_run() {
        let saver = InMemoryCheckpointSaver::new();
        saver.save("run-1", snapshot(0)).await.unwrap();
        saver.delete("run-1").await.unwrap();
        assert_eq!(saver.run_count().await, 0);
        assert!(saver.load("run-1").await.unwrap().is_none());
    }
}
