//! Human-readable checkpoint storage.
//!
//! Each checkpoint is one file: a `key: value` header naming `executionId`,
//! `label`, `timestamp`, and `nodeCount`, followed by a `---` line, followed
//! by the checkpoint's state as pretty-printed JSON. Meant to be skimmed in
//! an editor or pasted into an incident channel, not just consumed through
//! this crate — so the round trip back into a [`CheckpointRecord`] only
//! relies on the JSON body; the header is for a human reader.

use crate::error::{CheckpointError, Result};
use crate::traits::{CheckpointRecord, Checkpointer};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;

const SEPARATOR: &str = "---";

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Writes `.md` checkpoint files with an inspectable header. `extra_header`
/// entries are appended to every header this instance writes, beyond the
/// four mandatory keys.
pub struct MarkdownCheckpointer {
    root: PathBuf,
    extra_header: Vec<(String, String)>,
}

impl MarkdownCheckpointer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), extra_header: Vec::new() }
    }

    /// Adds a caller-supplied key/value pair written into every header this
    /// instance produces from now on, after the four mandatory keys.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_header.push((key.into(), value.into()));
        self
    }

    fn execution_dir(&self, execution_id: &str) -> PathBuf {
        self.root.join(sanitize(execution_id))
    }

    fn record_path(&self, execution_id: &str, label: &str) -> PathBuf {
        self.execution_dir(execution_id).join(format!("{}.md", sanitize(label)))
    }

    fn render(&self, record: &CheckpointRecord) -> String {
        let node_count = record.state.as_object().map(|m| m.len()).unwrap_or(0);
        let mut header = format!(
            "executionId: {}\nlabel: {}\ntimestamp: {}\nnodeCount: {}\n",
            record.execution_id,
            record.label,
            record.timestamp.to_rfc3339(),
            node_count,
        );
        for (key, value) in &self.extra_header {
            header.push_str(&format!("{key}: {value}\n"));
        }
        let body = serde_json::to_string_pretty(&record.state).unwrap_or_else(|_| "{}".to_string());
        format!("{header}{SEPARATOR}\n{body}\n")
    }

    /// Recovers the record from the JSON body only; the header is a
    /// human-facing rendering of fields the body already carries.
    fn parse(contents: &str) -> Result<CheckpointRecord> {
        let (_header, body) = contents
            .split_once(&format!("{SEPARATOR}\n"))
            .ok_or_else(|| CheckpointError::Invalid("missing header separator".to_string()))?;
        // The body is the record's state, not the record itself; the header
        // carries the rest.
        let mut execution_id = None;
        let mut label = None;
        let mut timestamp = None;
        for line in _header.lines() {
            if let Some((key, value)) = line.split_once(": ") {
                match key {
                    "executionId" => execution_id = Some(value.to_string()),
                    "label" => label = Some(value.to_string()),
                    "timestamp" => timestamp = Some(value.to_string()),
                    _ => {}
                }
            }
        }
        let execution_id = execution_id
            .ok_or_else(|| CheckpointError::Invalid("missing executionId header".to_string()))?;
        let label = label.ok_or_else(|| CheckpointError::Invalid("missing label header".to_string()))?;
        let timestamp = timestamp
            .ok_or_else(|| CheckpointError::Invalid("missing timestamp header".to_string()))?;
        let timestamp = chrono::DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| CheckpointError::Invalid(format!("invalid timestamp header: {e}")))?
            .with_timezone(&chrono::Utc);
        let state: serde_json::Value = serde_json::from_str(body.trim())
            .map_err(CheckpointError::Serialization)?;
        Ok(CheckpointRecord { execution_id, label, state, timestamp })
    }
}

#[async_trait]
impl Checkpointer for MarkdownCheckpointer {
    async fn save(&self, execution_id: &str, state: serde_json::Value, label: Option<String>) -> Result<String> {
        let dir = self.execution_dir(execution_id);
        fs::create_dir_all(&dir).await.map_err(CheckpointError::Io)?;

        let label = label.unwrap_or_else(|| {
            chrono::Utc::now().format("checkpoint-%Y%m%dT%H%M%S%.6f").to_string()
        });
        let record = CheckpointRecord::new(execution_id, label.clone(), state);
        let rendered = self.render(&record);
        fs::write(self.record_path(execution_id, &label), rendered)
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
        let contents = fs::read_to_string(&path).await.map_err(CheckpointError::Io)?;
        Ok(Some(Self::parse(&contents)?))
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
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let contents = fs::read_to_string(&path).await.map_err(CheckpointError::Io)?;
            let record = Self::parse(&contents)?;
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
    async fn header_carries_the_four_mandatory_keys() {
        let dir = tempfile::tempdir().unwrap();
        let checkpointer = MarkdownCheckpointer::new(dir.path());
        let label = checkpointer
            .save("exec-1", json!({"a": 1, "b": 2}), Some("step-1".to_string()))
            .await
            .unwrap();

        let path = checkpointer.record_path("exec-1", &label);
        let contents = fs::read_to_string(path).await.unwrap();
        assert!(contents.contains("executionId: exec-1"));
        assert!(contents.contains("label: step-1"));
        assert!(contents.contains("nodeCount: 2"));
        assert!(contents.contains(SEPARATOR));
    }

    #[tokio::test]
    async fn extra_header_pairs_are_written_after_mandatory_keys() {
        let dir = tempfile::tempdir().unwrap();
        let checkpointer = MarkdownCheckpointer::new(dir.path()).with_header("operator", "alice");
        let label = checkpointer.save("exec-1", json!({}), None).await.unwrap();
        let contents = fs::read_to_string(checkpointer.record_path("exec-1", &label)).await.unwrap();
        assert!(contents.contains("operator: alice"));
    }

    #[tokio::test]
    async fn round_trips_state_through_the_json_body() {
        let dir = tempfile::tempdir().unwrap();
        let checkpointer = MarkdownCheckpointer::new(dir.path());
        let state = json!({"plan": "do the thing", "count": 3});
        checkpointer.save("exec-1", state.clone(), Some("a".to_string())).await.unwrap();

        let loaded = checkpointer.load_by_label("exec-1", "a").await.unwrap().unwrap();
        assert_eq!(loaded.state, state);
    }
}
