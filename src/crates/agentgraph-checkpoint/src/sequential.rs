//! Session-sequential checkpoint storage: every save gets the next
//! `node-NNN.json` file regardless of the label passed in, so a directory
//! listing alone shows save order. The label a caller supplies is still
//! stored inside the record and searchable via `load_by_label`.

use crate::error::{CheckpointError, Result};
use crate::traits::{CheckpointRecord, Checkpointer};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::sync::Mutex;

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

fn file_name(counter: u64) -> String {
    format!("node-{counter:03}.json")
}

/// Per-execution save counters live in memory; reading a directory that
/// already has checkpoints (e.g. after a restart) resumes the counter from
/// the highest `node-NNN.json` index found on disk.
pub struct SessionSequentialCheckpointer {
    root: PathBuf,
    counters: Mutex<HashMap<String, AtomicU64>>,
}

impl SessionSequentialCheckpointer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), counters: Mutex::new(HashMap::new()) }
    }

    fn execution_dir(&self, execution_id: &str) -> PathBuf {
        self.root.join(sanitize(execution_id))
    }

    async fn read_record(path: &std::path::Path) -> Result<CheckpointRecord> {
        let bytes = fs::read(path).await.map_err(CheckpointError::Io)?;
        serde_json::from_slice(&bytes).map_err(CheckpointError::Serialization)
    }

    /// Highest `node-NNN` index already on disk for `execution_id`, or 0.
    async fn highest_on_disk(&self, execution_id: &str) -> Result<u64> {
        let dir = self.execution_dir(execution_id);
        if !dir.exists() {
            return Ok(0);
        }
        let mut entries = fs::read_dir(&dir).await.map_err(CheckpointError::Io)?;
        let mut highest = 0u64;
        while let Some(entry) = entries.next_entry().await.map_err(CheckpointError::Io)? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stripped) = name.strip_prefix("node-").and_then(|s| s.strip_suffix(".json")) {
                if let Ok(n) = stripped.parse::<u64>() {
                    highest = highest.max(n);
                }
            }
        }
        Ok(highest)
    }

    /// Allocates the next counter value for `execution_id`, resuming from
    /// disk the first time this execution is touched by this instance.
    async fn next_counter(&self, execution_id: &str) -> Result<u64> {
        let mut counters = self.counters.lock().await;
        if !counters.contains_key(execution_id) {
            let resumed = self.highest_on_disk(execution_id).await?;
            counters.insert(execution_id.to_string(), AtomicU64::new(resumed));
        }
        let counter = counters.get(execution_id).expect("just inserted");
        Ok(counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl Checkpointer for SessionSequentialCheckpointer {
    async fn save(&self, execution_id: &str, state: serde_json::Value, label: Option<String>) -> Result<String> {
        let dir = self.execution_dir(execution_id);
        fs::create_dir_all(&dir).await.map_err(CheckpointError::Io)?;

        let counter = self.next_counter(execution_id).await?;
        let label = label.unwrap_or_else(|| format!("node-{counter:03}"));
        let record = CheckpointRecord::new(execution_id, label.clone(), state);
        let bytes = serde_json::to_vec_pretty(&record).map_err(CheckpointError::Serialization)?;
        fs::write(dir.join(file_name(counter)), bytes).await.map_err(CheckpointError::Io)?;
        Ok(label)
    }

    async fn load(&self, execution_id: &str) -> Result<Option<CheckpointRecord>> {
        let dir = self.execution_dir(execution_id);
        if !dir.exists() {
            return Ok(None);
        }
        let highest = self.highest_on_disk(execution_id).await?;
        if highest == 0 {
            return Ok(None);
        }
        Ok(Some(Self::read_record(&dir.join(file_name(highest))).await?))
    }

    async fn load_by_label(&self, execution_id: &str, label: &str) -> Result<Option<CheckpointRecord>> {
        let dir = self.execution_dir(execution_id);
        if !dir.exists() {
            return Ok(None);
        }
        let mut entries = fs::read_dir(&dir).await.map_err(CheckpointError::Io)?;
        let mut matches = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(CheckpointError::Io)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let record = Self::read_record(&path).await?;
            if record.label == label {
                matches.push(record);
            }
        }
        matches.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(matches.into_iter().next_back())
    }

    async fn list(&self, execution_id: &str) -> Result<Vec<String>> {
        let dir = self.execution_dir(execution_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = fs::read_dir(&dir).await.map_err(CheckpointError::Io)?;
        let mut indexed = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(CheckpointError::Io)? {
            let name = entry.file_name();
            let name = name.to_string_lossy().to_string();
            if let Some(stripped) = name.strip_prefix("node-").and_then(|s| s.strip_suffix(".json")) {
                if let Ok(n) = stripped.parse::<u64>() {
                    let record = Self::read_record(&entry.path()).await?;
                    indexed.push((n, record.label));
                }
            }
        }
        indexed.sort_by_key(|(n, _)| *n);
        Ok(indexed.into_iter().map(|(_, label)| label).collect())
    }

    async fn delete(&self, execution_id: &str, label: Option<&str>) -> Result<()> {
        let dir = self.execution_dir(execution_id);
        if !dir.exists() {
            return Ok(());
        }
        match label {
            Some(label) => {
                let mut entries = fs::read_dir(&dir).await.map_err(CheckpointError::Io)?;
                while let Some(entry) = entries.next_entry().await.map_err(CheckpointError::Io)? {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    if Self::read_record(&path).await?.label == label {
                        fs::remove_file(path).await.map_err(CheckpointError::Io)?;
                    }
                }
            }
            None => {
                fs::remove_dir_all(&dir).await.map_err(CheckpointError::Io)?;
                self.counters.lock().await.remove(execution_id);
            }
        }
        Ok(())
    }
}
