//! The [`Checkpointer`] trait: the storage abstraction a compiled graph uses
//! to persist and restore execution state.
//!
//! Deliberately decoupled from `agentgraph-core::state::State` — this crate
//! has no dependency on `agentgraph-core` (the dependency runs the other
//! way), so a checkpoint is a plain JSON snapshot labelled within its
//! execution, not a typed `State`.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One persisted snapshot: the state at the time of save, labelled within its
/// execution, plus the timestamp it was written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub execution_id: String,
    pub label: String,
    pub state: Value,
    pub timestamp: DateTime<Utc>,
}

impl CheckpointRecord {
    pub fn new(execution_id: impl Into<String>, label: impl Into<String>, state: Value) -> Self {
        Self {
            execution_id: execution_id.into(),
            label: label.into(),
            state,
            timestamp: Utc::now(),
        }
    }
}

/// Storage backend for execution checkpoints.
///
/// `save` without an explicit label assigns one the backend controls
/// (insertion order for the in-memory backend, a timestamp-derived label for
/// the file backends, a monotonic `node-NNN` counter for the session-
/// sequential backend) and returns it, so callers that want to `loadByLabel`
/// later can capture it.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Persists `state` under `label` (or an auto-assigned one), returning
    /// the label actually used.
    async fn save(&self, execution_id: &str, state: Value, label: Option<String>) -> Result<String>;

    /// The most recently saved record for `execution_id`, if any.
    async fn load(&self, execution_id: &str) -> Result<Option<CheckpointRecord>>;

    /// The record saved under `label` for `execution_id`, if any.
    async fn load_by_label(&self, execution_id: &str, label: &str) -> Result<Option<CheckpointRecord>>;

    /// Labels for `execution_id`, insertion order.
    async fn list(&self, execution_id: &str) -> Result<Vec<String>>;

    /// Deletes one label, or every checkpoint for `execution_id` when
    /// `label` is `None`.
    async fn delete(&self, execution_id: &str, label: Option<&str>) -> Result<()>;
}
