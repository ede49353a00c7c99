//! # agentgraph-core — graph execution engine
//!
//! A typed-state, node-and-edge workflow engine for orchestrating LLM
//! agents, tools, decisions, parallel fan-out, loops, and human-in-the-loop
//! pauses. The compiled graph is an adjacency list keyed by node id;
//! [`executor::GraphExecutor`] walks it directly rather than running a
//! channel-versioned superstep loop on top of a separate graph library.
//!
//! ## Layout
//!
//! - [`state`] — typed state with per-field reducers (`StateSchema`,
//!   `Annotation`, `reducers::*`) and the merge semantics every step applies.
//! - [`node`] — node identity, the `execute` contract (`NodeExecutor`),
//!   signals, custom events, and `onError` actions.
//! - [`edge`] — directed, optionally conditional transitions.
//! - [`graph`] — the immutable, compiled [`graph::CompiledGraph`] and its
//!   [`graph::GraphConfig`].
//! - [`builder`] — [`builder::GraphBuilder`], the low-level node-by-node,
//!   edge-by-edge substrate.
//! - [`fluent`] — [`fluent::FluentGraphBuilder`], the linear-chain `then`/
//!   `if`/`endif`/`loop`/`parallel`/`catch` API built on top of it.
//! - [`retry`] — per-node backoff policy.
//! - [`validator`] — JSON Schema validation at node/graph boundaries.
//! - [`snapshot`] — [`snapshot::ExecutionStatus`] and the per-run
//!   [`snapshot::ExecutionSnapshot`].
//! - [`executor`] — [`executor::GraphExecutor`], the core traversal loop.
//! - [`stream`] — per-step streaming (`values`/`updates`/`events`/`debug`
//!   modes) via [`stream::StreamRouter`].
//! - [`error`] — the crate-wide [`error::GraphError`] and [`error::Result`].

pub mod builder;
pub mod edge;
pub mod error;
pub mod executor;
pub mod fluent;
pub mod graph;
pub mod node;
pub mod retry;
pub mod snapshot;
pub mod state;
pub mod stream;
pub mod validator;

pub use builder::GraphBuilder;
pub use fluent::{FluentGraphBuilder, IfCascade, LoopOptions, ParallelBlock};
pub use edge::{Edge, EdgeCondition};
pub use error::{GraphError, Result};
pub use executor::{ExecutionOptions, ExecutionResult, GraphExecutor};
pub use graph::{CompiledGraph, GraphConfig, GraphMetadata};
pub use node::{
    CustomEvent, ErrorAction, ErrorHook, ExecutionContext, ExecutionErrorEntry, GotoTarget,
    NodeDefinition, NodeExecutor, NodeId, NodeKind, NodeResult, OutputMapper, ParallelSpec,
    ParallelStrategy, RuntimeDependencies, Signal, SpawnOptions, SpawnResult, SubagentMetadata,
};
pub use retry::{RetryPolicy, RetryPredicate};
pub use snapshot::{ExecutionSnapshot, ExecutionStatus};
pub use state::{reducers, Annotation, Reducer, State, StateError, StateSchema};
pub use stream::{StepEmission, StreamChunk, StreamEvent, StreamMode, StreamRouter};
pub use validator::StateValidator;
