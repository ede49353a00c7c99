//! Error types for the runtime facade and the sub-agent bridge.
//!
//! Kept separate from [`agentgraph_core::error::GraphError`] — the SDK is a
//! caller of `agentgraph-core`, not the other way around — but every
//! `SdkError` that reaches a node's `execute` function crosses back into a
//! `GraphError::Custom` (see the `From` impl below), since that's the only
//! channel a `NodeExecutor` has to report failure.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SdkError>;

#[derive(Error, Debug, Clone)]
pub enum SdkError {
    /// No provider registered under the requested name, and none could be
    /// inferred from a `provider/model` default.
    #[error("no provider registered for '{0}'")]
    UnknownProvider(String),

    /// `ClientProvider::create_session` failed.
    #[error("failed to create provider session: {0}")]
    SessionCreation(String),

    /// A sub-agent spawn's session factory failed before the task could run.
    #[error("failed to spawn sub-agent '{agent_id}': {message}")]
    SpawnFailed { agent_id: String, message: String },

    /// The external abort signal fired before the spawn completed.
    #[error("cancelled")]
    Cancelled,

    /// The spawn's own `timeout` elapsed before the session produced a result.
    #[error("timed out after {0}ms")]
    TimedOut(u64),

    /// Persisting a sub-agent result to its session directory failed.
    #[error("failed to persist sub-agent result: {0}")]
    Persistence(String),

    /// No workflow is registered under the requested name.
    #[error("no workflow registered for '{0}'")]
    UnknownWorkflow(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<SdkError> for agentgraph_core::error::GraphError {
    fn from(err: SdkError) -> Self {
        agentgraph_core::error::GraphError::Custom(err.to_string())
    }
}
