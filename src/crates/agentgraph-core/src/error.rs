//! Error types for graph construction, validation, and execution.
//!
//! All errors implement `std::error::Error` via [`thiserror`]. The variants
//! mirror the error taxonomy a graph execution can surface: some are fatal
//! build-time mistakes (`Validation`), some are recoverable through retry or
//! an `onError` hook (`NodeExecution`, `StateValidation`), and a few are not
//! really errors at all but are modeled as one so they can travel through the
//! same `Result` plumbing (`Cancelled`, `Paused`).

use crate::node::NodeId;
use thiserror::Error;

/// The crate-wide result alias.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised while building, compiling, or executing a graph.
#[derive(Debug, Error, Clone)]
pub enum GraphError {
    /// The graph structure is invalid (missing node, duplicate id, unbalanced
    /// `if`/`endif`, unknown edge target, ...).
    #[error("Graph validation failed: {0}")]
    Validation(String),

    /// A node's `execute` function returned an error after retries and any
    /// `onError` hook were exhausted.
    #[error("Node '{node}' execution failed: {error}")]
    NodeExecution { node: NodeId, error: String },

    /// State failed schema validation at a node or graph boundary. Message
    /// format follows `"State validation failed: <path>: <message>; ..."`
    /// (graph-level) or `"Node \"<id>\" input|output validation failed:
    /// <path>: <message>; ..."` (per-node).
    #[error("{0}")]
    StateValidation(String),

    /// An `onError` hook returned `goto` targeting a node that either does
    /// not exist or is not marked as a recovery node.
    #[error("onError goto target \"{node}\" must set isRecoveryNode: true")]
    MissingRecovery { node: NodeId },

    /// A node required a runtime dependency (provider, spawner, workflow
    /// resolver, ...) that the compiled graph was not configured with.
    #[error("missing runtime dependency: {0}")]
    MissingRuntimeDependency(String),

    /// The executor's step counter reached `max_steps` before the graph
    /// reached a terminal node.
    #[error("execution exceeded maxSteps")]
    MaxStepsExceeded,

    /// The execution's abort signal fired. Not a user-facing failure; callers
    /// see `ExecutionResult::status == Cancelled`.
    #[error("execution cancelled")]
    Cancelled,

    /// A checkpointer save/load/list/delete operation failed.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// A JSON (de)serialization failure outside of schema validation.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration supplied to the builder, executor, or SDK facade.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An operation exceeded a configured wall-clock budget.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Catch-all for application-defined node errors that don't fit the
    /// categories above.
    #[error("{0}")]
    Custom(String),
}

impl GraphError {
    pub fn node_execution(node: impl Into<NodeId>, error: impl std::fmt::Display) -> Self {
        GraphError::NodeExecution {
            node: node.into(),
            error: error.to_string(),
        }
    }

    pub fn missing_recovery(node: impl Into<NodeId>) -> Self {
        GraphError::MissingRecovery { node: node.into() }
    }

    /// `true` for errors that represent a normal, non-failure termination
    /// (cancellation). Callers should not report these as failures.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, GraphError::Cancelled)
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(err: serde_json::Error) -> Self {
        GraphError::Serialization(err.to_string())
    }
}
