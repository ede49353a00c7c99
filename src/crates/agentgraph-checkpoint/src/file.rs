//! JSON-file checkpoint storage: one directory per execution, one file per
//! label.
//!
//! Labels are sanitized before touching the filesystem — anything outside
//! `[A-Za-z0-9_-]` becomes `_` — so a caller-supplied label can't escape the
//! execution's directory or collide with reserved names.

use crate::error::{CheckpointError, Result};
use crate::traits::{CheckpointRecord, Checkpointer};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Stores each execution's checkpoints as `<root>/<sanitized execution_id>/<sanitized label>.json`.
pub struct FileCheckpointer {
    root: PathBuf,
}

impl FileCheckpointer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn execution_dir(&self, execution_id: &str) -> PathBuf {
        self.root.join(sanitize(execution_id))
    }

    fn record_path(&self, execution_id: &str, label: &str) -> PathBuf {
        self.execution_dir(execution_id).join(format!("{}.json", sanitize(label)))
    }

    async fn read_record(path: &Path) -> Result<CheckpointRecord> {
        let bytes = fs::read(path).await.map_err(CheckpointError::Io)?;
        serde_json::from_slice(&bytes).map_err(CheckpointError::Serialization)
    }
}

#[async_trait]
impl Checkpointer for FileCheckpointer {
    async fn save(&self, execution_id: &str, state: serde_json::Value, label: Option<String>) -> Result<String> {
        let dir = self.execution_dir(execution_id);
        fs::create_dir_all(&dir).await.map_err(CheckpointError::Io)?;

        let label = label.unwrap_or_else(|| {
            chrono::Utc::now().format("checkpoint-%Y%m%dT%H%M%S%.6f").to_string()
        });
        let record = CheckpointRecord::new(execution_id, label.clone(), state);
        let bytes = serde_json::to_vec_pretty(&record).map_err(CheckpointError::Serialization)?;
        fs::write(self.record_path(execution_id, &label), bytes)
            .await
            .map_err(CheckpointError::Io)?;
        Ok(label)
    }

    async fn load(&self, execution_id: &str) -> Result<Option<CheckpointRecord>> {
        let labels = self.list(execution_id).await?;
        match labels.last() {
            Some(label) => self.load_by_label(execution_id, label).await,
            None => Ok(None),
        }
    }

    async fn load_by_label(&self, execution_id: &str, label: &str) -> Result<Option<CheckpointRecord>> {
        let path = self.record_path(execution_id, label);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(Self::read_record(&path).await?))
    }

    async fn list(&self, execution_id: &str) -> Result<Vec<String>> {
        let dir = self.execution_dir(execution_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = fs::read_dir(&dir).await.map_err(CheckpointError::Io)?;
        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(CheckpointError::Io)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let record = Self::read_record(&path).await?;
            records.push((record.timestamp, record.label));
        }
        records.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        Ok(records.into_iter().map(|(_, label)| label).collect())
    }

    async fn delete(&self, execution_id: &str, label: Option<&str>) -> Result<()> {
        match label {
            Some(label) => {
                let path = self.record_path(execution_id, label);
                if path.exists() {
                    fs::remove_file(path).await.map_err(CheckpointError::Io)?;
                }
            }
            None => {
                let dir = self.execution_dir(execution_id);
                if dir.exists() {
                    fs::remove_dir_all(dir).await.map_err(CheckpointError::Io)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn save_then_load_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let checkpointer = FileCheckpointer::new(dir.path());
        checkpointer.save("exec-1", json!({"step": 1}), Some("a".to_string())).await.unwrap();

        let loaded = checkpointer.load_by_label("exec-1", "a").await.unwrap().unwrap();
        assert_eq!(loaded.state, json!({"step": 1}));
    }

    #[tokio::test]
    async fn load_returns_the_most_recently_saved_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let checkpointer = FileCheckpointer::new(dir.path());
        checkpointer.save("exec-1", json!({"step": 1}), Some("a".to_string())).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        checkpointer.save("exec-1", json!({"step": 2}), Some("b".to_string())).await.unwrap();

        let latest = checkpointer.load("exec-1").await.unwrap().unwrap();
        assert_eq!(latest.state, json!({"step": 2}));
    }

    #[tokio::test]
    async fn label_is_sanitized_against_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let checkpointer = FileCheckpointer::new(dir.path());
        let assigned = checkpointer
            .save("exec-1", json!({}), Some("../../evil".to_string()))
            .await
            .unwrap();
        assert!(!assigned.contains('/'));
        assert!(!assigned.contains(".."));
    }

    #[tokio::test]
    async fn delete_without_label_removes_the_executions_directory() {
        let dir = tempfile::tempdir().unwrap();
        let checkpointer = FileCheckpointer::new(dir.path());
        checkpointer.save("exec-1", json!({}), Some("a".to_string())).await.unwrap();
        checkpointer.delete("exec-1", None).await.unwrap();
        assert!(checkpointer.list("exec-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_execution_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let checkpointer = FileCheckpointer::new(dir.path());
        assert!(checkpointer.load("nope").await.unwrap().is_none());
    }
}
