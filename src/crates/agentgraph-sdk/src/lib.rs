//! # agentgraph-sdk — runtime facade and sub-agent bridge
//!
//! `agentgraph-core` defines the engine and the narrow
//! [`agentgraph_core::node::RuntimeDependencies`] seam a compiled graph
//! reaches external collaborators through; it never depends on a concrete
//! LLM client. This crate is the other side of that seam: the one concrete
//! `RuntimeDependencies` implementation shipped here, plus the machinery it's
//! built from.
//!
//! ## Layout
//!
//! - [`runtime`] — [`runtime::Runtime`], the facade applications call
//!   `execute`/`stream` on. Holds a [`runtime::ProviderRegistry`], resolves
//!   nested workflows by name, and picks which provider a bare sub-agent
//!   spawn uses.
//! - [`subagent`] — [`subagent::SubagentBridge`], which actually spawns and
//!   joins sub-agent sessions: per-spawn timeout racing an external
//!   cancellation token, output truncation, settled-all fan-in.
//! - [`error`] — [`error::SdkError`], this crate's own error type, and its
//!   crossing back into [`agentgraph_core::error::GraphError`] at the one
//!   point a node's `execute` function can report failure.
//! - [`config`] — [`config::EngineConfig`], environment-sourced defaults
//!   (default model, `max_steps`, checkpoint root) a host application can
//!   fold into a [`runtime::RuntimeBuilder`] without writing its own env
//!   parsing, via `tooling::config::ConfigBuilder`.
//!
//! Nothing in this crate talks to a real model provider — `ClientProvider`
//! and `SessionFactory` are traits an embedding application implements.

pub mod config;
pub mod error;
pub mod runtime;
pub mod subagent;

pub use config::EngineConfig;
pub use error::{Result, SdkError};
pub use runtime::{
    downcast_provider, ClientProvider, ContextUsage, ProviderMessage, ProviderRegistry,
    ProviderSession, Runtime, RuntimeBuilder, RuntimeConfig,
};
pub use subagent::{SessionChunk, SessionFactory, SpawnedSession, SubagentBridge};
