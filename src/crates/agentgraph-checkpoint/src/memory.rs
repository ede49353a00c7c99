//! In-memory checkpoint storage for development and testing.
//!
//! Checkpoints live only for the process lifetime, behind a
//! `tokio::sync::RwLock<HashMap<..>>`. Appropriate for tests and short-lived
//! local runs; anything that needs to survive a restart should reach for
//! [`crate::file::FileCheckpointer`] or one of its siblings.

use crate::error::Result;
use crate::traits::{CheckpointRecord, Checkpointer};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryCheckpointer {
    records: RwLock<HashMap<String, Vec<CheckpointRecord>>>,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn save(&self, execution_id: &str, state: serde_json::Value, label: Option<String>) -> Result<String> {
        let mut records = self.records.write().await;
        let history = records.entry(execution_id.to_string()).or_default();
        let label = label.unwrap_or_else(|| format!("checkpoint-{}", history.len()));
        history.push(CheckpointRecord::new(execution_id, label.clone(), state));
        Ok(label)
    }

    async fn load(&self, execution_id: &str) -> Result<Option<CheckpointRecord>> {
        let records = self.records.read().await;
        Ok(records.get(execution_id).and_then(|history| history.last().cloned()))
    }

    async fn load_by_label(&self, execution_id: &str, label: &str) -> Result<Option<CheckpointRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(execution_id)
            .and_then(|history| history.iter().rev().find(|r| r.label == label).cloned()))
    }

    async fn list(&self, execution_id: &str) -> Result<Vec<String>> {
        let records = self.records.read().await;
        Ok(records
            .get(execution_id)
            .map(|history| history.iter().map(|r| r.label.clone()).collect())
            .unwrap_or_default())
    }

    async fn delete(&self, execution_id: &str, label: Option<&str>) -> Result<()> {
        let mut records = self.records.write().await;
        match label {
            Some(label) => {
                if let Some(history) = records.get_mut(execution_id) {
                    history.retain(|r| r.label != label);
                }
            }
            None => {
                records.remove(execution_id);
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
    async fn load_returns_most_recent_save() {
        let checkpointer = InMemoryCheckpointer::new();
        checkpointer.save("exec-1", json!({"step": 1}), Some("a".to_string())).await.unwrap();
        checkpointer.save("exec-1", json!({"step": 2}), Some("b".to_string())).await.unwrap();

        let latest = checkpointer.load("exec-1").await.unwrap().unwrap();
        assert_eq!(latest.state, json!({"step": 2}));
        assert_eq!(latest.label, "b");
    }

    #[tokio::test]
    async fn save_without_label_assigns_insertion_order_label() {
        let checkpointer = InMemoryCheckpointer::new();
        let first = checkpointer.save("exec-1", json!({}), None).await.unwrap();
        let second = checkpointer.save("exec-1", json!({}), None).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn load_by_label_finds_a_specific_checkpoint() {
        let checkpointer = InMemoryCheckpointer::new();
        checkpointer.save("exec-1", json!({"step": 1}), Some("a".to_string())).await.unwrap();
        checkpointer.save("exec-1", json!({"step": 2}), Some("b".to_string())).await.unwrap();

        let found = checkpointer.load_by_label("exec-1", "a").await.unwrap().unwrap();
        assert_eq!(found.state, json!({"step": 1}));
    }

    #[tokio::test]
    async fn list_returns_all_labels_in_save_order() {
        let checkpointer = InMemoryCheckpointer::new();
        for step in 1..=3 {
            checkpointer.save("exec-1", json!({"step": step}), Some(format!("n{step}"))).await.unwrap();
        }
        let labels = checkpointer.list("exec-1").await.unwrap();
        assert_eq!(labels, vec!["n1", "n2", "n3"]);
    }

    #[tokio::test]
    async fn delete_one_label_keeps_the_rest() {
        let checkpointer = InMemoryCheckpointer::new();
        checkpointer.save("exec-1", json!({}), Some("a".to_string())).await.unwrap();
        checkpointer.save("exec-1", json!({}), Some("b".to_string())).await.unwrap();
        checkpointer.delete("exec-1", Some("a")).await.unwrap();
        assert_eq!(checkpointer.list("exec-1").await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn delete_without_label_clears_an_executions_history() {
        let checkpointer = InMemoryCheckpointer::new();
        checkpointer.save("exec-1", json!({}), Some("a".to_string())).await.unwrap();
        checkpointer.delete("exec-1", None).await.unwrap();
        assert!(checkpointer.list("exec-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_execution_returns_empty() {
        let checkpointer = InMemoryCheckpointer::new();
        assert!(checkpointer.load("nope").await.unwrap().is_none());
        assert!(checkpointer.list("nope").await.unwrap().is_empty());
    }
}
