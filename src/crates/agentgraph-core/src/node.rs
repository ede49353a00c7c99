//! Node model: identity, kind, the execute contract, and what a node hands
//! back to the executor.
//!
//! The executor never switches on [`NodeKind`] at traversal time — kind is
//! only consulted by the [`crate::builder::GraphBuilder`] when it emits
//! synthetic decision/merge/loop nodes, and by [`crate::executor`] for the
//! one case (`Parallel`) that needs node-level metadata the execute function
//! alone can't carry.

use crate::error::{GraphError, Result};
use crate::retry::RetryPolicy;
use crate::state::State;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type NodeId = String;

/// Tags a node for the builder's own bookkeeping. The executor treats every
/// node uniformly through its `execute` function; only `Parallel` carries
/// extra data the executor reads directly (`branch_heads`, `output_mapper`).
#[derive(Clone)]
pub enum NodeKind {
    Agent,
    Tool,
    Decision,
    Wait,
    AskUser,
    Subgraph,
    Parallel(ParallelSpec),
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Agent => write!(f, "Agent"),
            NodeKind::Tool => write!(f, "Tool"),
            NodeKind::Decision => write!(f, "Decision"),
            NodeKind::Wait => write!(f, "Wait"),
            NodeKind::AskUser => write!(f, "AskUser"),
            NodeKind::Subgraph => write!(f, "Subgraph"),
            NodeKind::Parallel(_) => write!(f, "Parallel"),
        }
    }
}

/// `strategy` other than `all` is rejected at `compile()` time (see
/// `GraphBuilder::compile`); the variant still exists so the error message
/// can name what was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelStrategy {
    All,
    Race,
    Any,
}

pub type OutputMapper =
    Arc<dyn Fn(&HashMap<NodeId, State>) -> Result<Value> + Send + Sync>;

#[derive(Clone)]
pub struct ParallelSpec {
    pub branch_heads: Vec<NodeId>,
    pub strategy: ParallelStrategy,
    pub output_mapper: OutputMapper,
    /// The node every branch converges on once it runs out of outgoing edges.
    pub join_node: NodeId,
}

/// Out-of-band control marker a node can emit.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    HumanInputRequired { payload: Value },
    Checkpoint,
    ContextWindowWarning { usage_percentage: f64 },
    DebugReportGenerated { report: Value },
}

/// A custom event a node emits mid-execution via [`ExecutionContext::emit`],
/// surfaced to the `events` stream mode.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CustomEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Where a node wants execution to go next, overriding normal edge
/// evaluation for this step.
#[derive(Debug, Clone)]
pub enum GotoTarget {
    Single(NodeId),
    Parallel(Vec<NodeId>),
}

/// What a node's `execute` function returns: an optional state delta, an
/// optional `goto` override, and any signals to append to the snapshot.
#[derive(Debug, Clone, Default)]
pub struct NodeResult {
    pub update: Option<Value>,
    pub goto: Option<GotoTarget>,
    pub signals: Vec<Signal>,
}

impl NodeResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_update(mut self, update: Value) -> Self {
        self.update = Some(update);
        self
    }

    pub fn with_goto(mut self, node_id: impl Into<NodeId>) -> Self {
        self.goto = Some(GotoTarget::Single(node_id.into()));
        self
    }

    pub fn with_signal(mut self, signal: Signal) -> Self {
        self.signals.push(signal);
        self
    }
}

/// One error entry accumulated in the execution snapshot, one per failed
/// attempt (see `SPEC_FULL.md` §4.6 open-question resolution).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExecutionErrorEntry {
    pub node_id: NodeId,
    pub error: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub attempt: u32,
}

/// What a node's `execute` function is given each time it runs.
pub struct ExecutionContext {
    pub state: State,
    pub model: String,
    pub abort: tokio_util::sync::CancellationToken,
    pub errors: Vec<ExecutionErrorEntry>,
    pub node_outputs: HashMap<NodeId, Value>,
    pub config: Arc<crate::graph::GraphConfig>,
    pub runtime: Option<Arc<dyn RuntimeDependencies>>,
    emitted: Arc<std::sync::Mutex<Vec<CustomEvent>>>,
    emit_seq: Arc<AtomicU64>,
}

impl ExecutionContext {
    pub fn new(
        state: State,
        model: String,
        abort: tokio_util::sync::CancellationToken,
        errors: Vec<ExecutionErrorEntry>,
        node_outputs: HashMap<NodeId, Value>,
        config: Arc<crate::graph::GraphConfig>,
        runtime: Option<Arc<dyn RuntimeDependencies>>,
    ) -> Self {
        Self {
            state,
            model,
            abort,
            errors,
            node_outputs,
            config,
            runtime,
            emitted: Arc::new(std::sync::Mutex::new(Vec::new())),
            emit_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emits a custom event surfaced to `StreamMode::Events` listeners for
    /// this step, in call order.
    pub fn emit(&self, event_type: impl Into<String>, data: Value) {
        self.emit_seq.fetch_add(1, Ordering::SeqCst);
        self.emitted.lock().unwrap().push(CustomEvent {
            event_type: event_type.into(),
            data,
            timestamp: chrono::Utc::now(),
        });
    }

    pub fn take_emitted(&self) -> Vec<CustomEvent> {
        std::mem::take(&mut *self.emitted.lock().unwrap())
    }

    /// A clone of the handle backing `emit`/`take_emitted`. `execute` takes
    /// the context by value, so the executor grabs this before handing the
    /// context over in order to read back events the node emitted.
    pub fn emitted_handle(&self) -> Arc<std::sync::Mutex<Vec<CustomEvent>>> {
        self.emitted.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.abort.is_cancelled()
    }
}

/// What a node asks the runtime's sub-agent bridge to do: spawn one
/// independent LLM session to carry out `task`.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub agent_id: String,
    pub agent_name: String,
    pub task: String,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub tools: Vec<String>,
    pub timeout: Option<std::time::Duration>,
}

impl SpawnOptions {
    pub fn new(agent_id: impl Into<String>, agent_name: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_name: agent_name.into(),
            task: task.into(),
            system_prompt: None,
            model: None,
            tools: Vec::new(),
            timeout: None,
        }
    }
}

/// What a sub-agent spawn produced, successful or not.
#[derive(Debug, Clone)]
pub struct SpawnResult {
    pub agent_id: String,
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub tool_uses: u32,
    pub duration_ms: u64,
}

/// Metadata describing one registered sub-agent type, looked up by name
/// through [`RuntimeDependencies::subagent_registry_get`].
#[derive(Debug, Clone)]
pub struct SubagentMetadata {
    pub name: String,
    pub description: String,
    pub default_model: Option<String>,
}

/// The narrow interface through which a node reaches provider clients,
/// sub-agent spawning, and nested workflows — everything this engine
/// treats as an external collaborator. `agentgraph-sdk::Runtime` implements
/// this; `agentgraph-core` never depends on a concrete LLM client.
pub trait RuntimeDependencies: Send + Sync {
    fn client_provider(&self, agent_type: &str) -> Option<Arc<dyn std::any::Any + Send + Sync>>;
    fn workflow_resolver(&self, name: &str) -> Option<Arc<crate::graph::CompiledGraph>>;

    /// Spawns a single sub-agent. `abort` cancels the spawn in addition to
    /// the option's own per-spawn `timeout`.
    fn spawn_subagent(
        &self,
        opts: SpawnOptions,
        abort: tokio_util::sync::CancellationToken,
    ) -> BoxFuture<'static, SpawnResult>;

    /// Fans `opts` out concurrently; one failure does not cancel the rest.
    /// Results map positionally to `opts`.
    fn spawn_subagent_parallel(
        &self,
        opts: Vec<SpawnOptions>,
        abort: tokio_util::sync::CancellationToken,
    ) -> BoxFuture<'static, Vec<SpawnResult>>;

    fn subagent_registry_get(&self, _name: &str) -> Option<SubagentMetadata> {
        None
    }

    fn subagent_registry_get_all(&self) -> Vec<SubagentMetadata> {
        Vec::new()
    }

    fn notify_task_status_change(&self, _task_ids: &[String], _new_status: &str, _snapshot: &Value) {}
}

pub type NodeExecutor =
    Arc<dyn Fn(ExecutionContext) -> BoxFuture<'static, Result<NodeResult>> + Send + Sync>;

pub type ErrorHook = Arc<
    dyn Fn(GraphError, ExecutionContext) -> BoxFuture<'static, ErrorAction> + Send + Sync,
>;

/// What the executor does next after a node's retries are exhausted and
/// `onError` has been consulted.
#[derive(Debug, Clone)]
pub enum ErrorAction {
    Retry { delay_ms: u64 },
    Skip { fallback_state: Option<Value> },
    Abort { error: Option<String> },
    Goto { node_id: NodeId },
}

/// A node's full definition as stored in the compiled graph.
#[derive(Clone)]
pub struct NodeDefinition {
    pub id: NodeId,
    pub kind: NodeKind,
    pub execute: NodeExecutor,
    pub input_schema: Option<Value>,
    pub output_schema: Option<Value>,
    pub retry: Option<RetryPolicy>,
    pub on_error: Option<ErrorHook>,
    pub is_recovery_node: bool,
    pub model: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
}

impl fmt::Debug for NodeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeDefinition")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("is_recovery_node", &self.is_recovery_node)
            .field("model", &self.model)
            .finish()
    }
}

impl NodeDefinition {
    pub fn new(id: impl Into<NodeId>, kind: NodeKind, execute: NodeExecutor) -> Self {
        Self {
            id: id.into(),
            kind,
            execute,
            input_schema: None,
            output_schema: None,
            retry: None,
            on_error: None,
            is_recovery_node: false,
            model: None,
            name: None,
            description: None,
        }
    }

    /// A node whose execute function is a no-op pass-through — used for
    /// synthetic decision/merge/loop-start nodes the builder emits.
    pub fn passthrough(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        Self::new(
            id,
            kind,
            Arc::new(|_ctx: ExecutionContext| {
                Box::pin(async { Ok(NodeResult::new()) }) as BoxFuture<'static, Result<NodeResult>>
            }),
        )
    }

    pub fn recovery(mut self) -> Self {
        self.is_recovery_node = true;
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn with_on_error(mut self, hook: ErrorHook) -> Self {
        self.on_error = Some(hook);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }
}
