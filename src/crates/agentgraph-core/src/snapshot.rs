//! Execution status and the per-run [`ExecutionSnapshot`].
//!
//! Kept separate from [`crate::executor`] because the stream router
//! ([`crate::stream`]) needs [`ExecutionStatus`] for its terminal marker
//! without depending on the executor's traversal logic.

use crate::node::{ExecutionErrorEntry, NodeId, Signal};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `pending -> running -> {completed | failed | cancelled | paused}`.
/// `paused` is the only non-terminal status in this set; resuming from a
/// checkpoint re-enters `running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Paused,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Pending | ExecutionStatus::Running)
    }
}

/// The bookkeeping an execution accumulates: status, traversal history,
/// errors, signals, and timing. A clone of this is exposed on
/// [`crate::executor::ExecutionResult`] once the run reaches a terminal
/// status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub current_node: Option<NodeId>,
    pub visited_nodes: Vec<NodeId>,
    pub errors: Vec<ExecutionErrorEntry>,
    pub signals: Vec<Signal>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub step_count: u64,
}

impl ExecutionSnapshot {
    pub fn new(execution_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            execution_id: execution_id.into(),
            status: ExecutionStatus::Pending,
            current_node: None,
            visited_nodes: Vec::new(),
            errors: Vec::new(),
            signals: Vec::new(),
            started_at: now,
            updated_at: now,
            completed_at: None,
            step_count: 0,
        }
    }

    /// Wall-clock time between start and completion, or "so far" if the run
    /// hasn't reached a terminal status yet. Not load-bearing for any
    /// invariant; useful for the illustrative workflow's reviewer/fixer loop.
    pub fn duration(&self) -> chrono::Duration {
        self.completed_at.unwrap_or_else(Utc::now) - self.started_at
    }

    pub fn visited_nodes(&self) -> &[NodeId] {
        &self.visited_nodes
    }
}
