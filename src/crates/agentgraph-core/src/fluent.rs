//! Fluent construction on top of [`crate::builder::GraphBuilder`]: linear
//! chains (`then`), `if`/`else`/`endif`, a declarative `if` cascade, batch
//! `parallel`, `loop`, `wait`/`ask_user`, `catch`, and `subagent`/`tool`
//! convenience constructors with auto-entry-point.
//!
//! `GraphBuilder` is deliberately low-level — one node and one edge at a
//! time, same as the substrate it's built from. This layer tracks a cursor
//! (the most recently appended node) and a stack of open `if` frames so
//! callers can write a linear chain of calls instead of wiring synthetic
//! decision/merge/loop nodes by hand.

use crate::builder::{GraphBuilder, END};
use crate::edge::EdgeCondition;
use crate::error::{GraphError, Result};
use crate::graph::CompiledGraph;
use crate::node::{NodeDefinition, NodeExecutor, NodeId, NodeKind, OutputMapper, ParallelStrategy, Signal};
use crate::state::{State, StateSchema};
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

fn negate(cond: EdgeCondition) -> EdgeCondition {
    Arc::new(move |state: &State| !cond(state))
}

fn human_input_executor(payload: Value) -> NodeExecutor {
    Arc::new(move |_ctx: crate::node::ExecutionContext| {
        let payload = payload.clone();
        Box::pin(async move {
            Ok(crate::node::NodeResult::new().with_signal(Signal::HumanInputRequired { payload }))
        }) as BoxFuture<'static, Result<crate::node::NodeResult>>
    })
}

/// One open `if` awaiting its matching `endif`.
struct IfFrame {
    decision: NodeId,
    merge: NodeId,
    condition: EdgeCondition,
    in_else: bool,
    first_in_branch: bool,
    then_tail: Option<NodeId>,
    else_tail: Option<NodeId>,
}

/// Declarative cascade form of `if`/`else if`/`else`, equivalent to nested
/// `if(...).then(...).else_().endif()` calls.
pub struct IfCascade {
    pub condition: EdgeCondition,
    pub then: Vec<NodeDefinition>,
    pub else_if: Vec<(EdgeCondition, Vec<NodeDefinition>)>,
    pub else_: Vec<NodeDefinition>,
}

/// Declarative form of `parallel`: fan out every branch from the same input
/// state, join once every branch (the only implemented `strategy: all`) has
/// finished, and reduce branch outputs to a state delta via `output_mapper`
/// (alias `merge` — when both are set, `output_mapper` wins).
pub struct ParallelBlock {
    pub branches: Vec<Vec<NodeDefinition>>,
    pub strategy: ParallelStrategy,
    pub output_mapper: Option<OutputMapper>,
    pub merge: Option<OutputMapper>,
}

impl ParallelBlock {
    pub fn new(branches: Vec<Vec<NodeDefinition>>) -> Self {
        Self { branches, strategy: ParallelStrategy::All, output_mapper: None, merge: None }
    }

    pub fn with_output_mapper(mut self, mapper: OutputMapper) -> Self {
        self.output_mapper = Some(mapper);
        self
    }

    pub fn with_merge(mut self, mapper: OutputMapper) -> Self {
        self.merge = Some(mapper);
        self
    }

    fn resolve_mapper(&self) -> OutputMapper {
        self.output_mapper
            .clone()
            .or_else(|| self.merge.clone())
            .expect("ParallelBlock requires output_mapper or merge")
    }
}

/// Loop options: `until` stops the loop (checked before `max_iterations`),
/// `max_iterations` is a hard stop independent of the predicate.
pub struct LoopOptions {
    pub until: EdgeCondition,
    pub max_iterations: u64,
}

/// Fluent façade over [`GraphBuilder`]. Every method takes and returns
/// `Self` by value, same chaining style as the low-level builder.
pub struct FluentGraphBuilder {
    inner: GraphBuilder,
    cursor: Option<NodeId>,
    started: bool,
    synthetic_seq: u64,
    if_stack: Vec<IfFrame>,
}

impl FluentGraphBuilder {
    pub fn new(schema: StateSchema) -> Self {
        Self {
            inner: GraphBuilder::new(schema),
            cursor: None,
            started: false,
            synthetic_seq: 0,
            if_stack: Vec::new(),
        }
    }

    fn next_id(&mut self) -> u64 {
        self.synthetic_seq += 1;
        self.synthetic_seq
    }

    /// Explicit start node. Fails at `compile()` if called twice — the
    /// second call simply overwrites, matching `GraphBuilder::start`; to
    /// catch the "called twice" contract in a way a caller can act on, use
    /// `try_start`.
    pub fn start(mut self, id: impl Into<NodeId>) -> Self {
        let id = id.into();
        self.inner = self.inner.start(id.clone());
        self.started = true;
        self.cursor = Some(id);
        self
    }

    /// Appends `node` after the cursor — the tail of the current `if`
    /// branch, if one is open, or the most recently added node otherwise.
    /// The first node ever appended, when no `start` call preceded it,
    /// becomes the start node (auto-entry-point).
    pub fn then(mut self, node: NodeDefinition) -> Self {
        let id = node.id.clone();
        self.inner = self.inner.node(node);
        self = self.wire_append(id.clone());
        if !self.started {
            self.inner = self.inner.start(id.clone());
            self.started = true;
        }
        self.cursor = Some(id);
        self
    }

    fn wire_append(mut self, id: NodeId) -> Self {
        if let Some(frame) = self.if_stack.last_mut() {
            if frame.first_in_branch {
                let label = if frame.in_else { "if-false" } else { "if-true" };
                let cond = if frame.in_else {
                    negate(frame.condition.clone())
                } else {
                    frame.condition.clone()
                };
                let decision = frame.decision.clone();
                frame.first_in_branch = false;
                self.inner = self.inner.conditional_edge(decision, id.clone(), label, cond);
            } else {
                let in_else = frame.in_else;
                let prev = if in_else { frame.else_tail.clone() } else { frame.then_tail.clone() };
                if let Some(prev) = prev {
                    self.inner = self.inner.edge(prev, id.clone());
                }
            }
            let frame = self.if_stack.last_mut().expect("frame still open");
            if frame.in_else {
                frame.else_tail = Some(id);
            } else {
                frame.then_tail = Some(id);
            }
        } else if let Some(prev) = self.cursor.take() {
            self.inner = self.inner.edge(prev, id);
        }
        self
    }

    /// Marks the cursor node terminal.
    pub fn end(mut self) -> Self {
        if let Some(cursor) = self.cursor.clone() {
            self.inner = self.inner.end(cursor);
        }
        self
    }

    /// Opens an `if` block. Must be followed by one or more `then` calls,
    /// optionally an `else_` and more `then` calls, then `endif`.
    pub fn if_(mut self, condition: EdgeCondition) -> Self {
        let idx = self.next_id();
        let decision = format!("__if_decision_{idx}");
        let merge = format!("__if_merge_{idx}");
        self.inner = self.inner.node(NodeDefinition::passthrough(decision.clone(), NodeKind::Decision));
        self.inner = self.inner.node(NodeDefinition::passthrough(merge.clone(), NodeKind::Decision));
        if let Some(prev) = self.cursor.take() {
            self.inner = self.inner.edge(prev, decision.clone());
        } else if !self.started {
            self.inner = self.inner.start(decision.clone());
            self.started = true;
        }
        self.if_stack.push(IfFrame {
            decision,
            merge,
            condition,
            in_else: false,
            first_in_branch: true,
            then_tail: None,
            else_tail: None,
        });
        self.cursor = None;
        self
    }

    /// Switches the open `if` frame into its `else` branch.
    pub fn else_(mut self) -> Self {
        let frame = self
            .if_stack
            .last_mut()
            .unwrap_or_else(|| panic!("else_ called with no matching if_"));
        frame.in_else = true;
        frame.first_in_branch = true;
        self.cursor = None;
        self
    }

    /// Closes the innermost open `if` frame, wiring both branches into the
    /// synthetic merge node. A branch with no `then` call falls straight
    /// from the decision node to merge under its own label.
    pub fn endif(mut self) -> Self {
        let frame = self
            .if_stack
            .pop()
            .unwrap_or_else(|| panic!("endif called with no matching if_"));
        match frame.then_tail {
            Some(tail) => self.inner = self.inner.edge(tail, frame.merge.clone()),
            None => {
                self.inner = self.inner.conditional_edge(
                    frame.decision.clone(),
                    frame.merge.clone(),
                    "if-true",
                    frame.condition.clone(),
                )
            }
        }
        match frame.else_tail {
            Some(tail) => self.inner = self.inner.edge(tail, frame.merge.clone()),
            None => {
                self.inner = self.inner.conditional_edge(
                    frame.decision.clone(),
                    frame.merge.clone(),
                    "if-false",
                    negate(frame.condition.clone()),
                )
            }
        }
        self.cursor = Some(frame.merge);
        self
    }

    /// Declarative `if`/`else if`/`else` cascade, desugared into nested
    /// `if_`/`then`/`else_`/`endif` calls.
    pub fn if_cascade(mut self, cascade: IfCascade) -> Self {
        self = self.if_(cascade.condition);
        for node in cascade.then {
            self = self.then(node);
        }
        self = self.else_();
        if cascade.else_if.is_empty() {
            for node in cascade.else_ {
                self = self.then(node);
            }
        } else {
            let mut rest = cascade.else_if;
            let (condition, then) = rest.remove(0);
            self = self.if_cascade(IfCascade { condition, then, else_if: rest, else_: cascade.else_ });
        }
        self.endif()
    }

    /// Batch fan-out/fan-in. Every branch's node list is auto-chained in
    /// order; the cursor becomes the synthetic join node, so the next
    /// `then`/`end`/`if_` call picks up after the join.
    pub fn parallel(mut self, block: ParallelBlock) -> Self {
        let idx = self.next_id();
        let fanout = format!("__parallel_{idx}");
        let join = format!("__parallel_join_{idx}");
        let mapper = block.resolve_mapper();
        if block.strategy != ParallelStrategy::All {
            // Recorded as a Validation error at compile() time via
            // GraphBuilder::parallel + CompiledGraph::validate; nothing to
            // do here beyond passing the strategy through unchanged.
        }
        self.inner = self.inner.node(NodeDefinition::passthrough(join.clone(), NodeKind::Decision));
        let mut branch_heads = Vec::with_capacity(block.branches.len());
        for branch in block.branches {
            let ids: Vec<NodeId> = branch.iter().map(|n| n.id.clone()).collect();
            for node in branch {
                self.inner = self.inner.node(node);
            }
            for pair in ids.windows(2) {
                self.inner = self.inner.edge(pair[0].clone(), pair[1].clone());
            }
            if let Some(head) = ids.first() {
                branch_heads.push(head.clone());
            }
        }
        if let Some(prev) = self.cursor.take() {
            self.inner = self.inner.edge(prev, fanout.clone());
        } else if !self.started {
            self.inner = self.inner.start(fanout.clone());
            self.started = true;
        }
        self.inner = self.inner.parallel(fanout, branch_heads, join.clone(), mapper);
        self.cursor = Some(join);
        self
    }

    /// `loop(body, {until, maxIterations})`: chains `body` in order,
    /// surrounds it with synthetic `loop_start`/`loop_check` nodes, and
    /// leaves the cursor on `loop_check` so the next call wires the
    /// fallthrough ("after loop") edge. The body is expected to update the
    /// conventional `iteration` counter field itself.
    pub fn loop_block(mut self, body: Vec<NodeDefinition>, options: LoopOptions) -> Self {
        assert!(!body.is_empty(), "loop body must have at least one node");
        let idx = self.next_id();
        let loop_start = format!("__loop_start_{idx}");
        let loop_check = format!("__loop_check_{idx}");
        let ids: Vec<NodeId> = body.iter().map(|n| n.id.clone()).collect();
        let body_head = ids.first().cloned().expect("non-empty body");
        let body_tail = ids.last().cloned().expect("non-empty body");

        self.inner = self.inner.node(NodeDefinition::passthrough(loop_start.clone(), NodeKind::Decision));
        self.inner = self.inner.node(NodeDefinition::passthrough(loop_check.clone(), NodeKind::Decision));
        for node in body {
            self.inner = self.inner.node(node);
        }
        for pair in ids.windows(2) {
            self.inner = self.inner.edge(pair[0].clone(), pair[1].clone());
        }

        if let Some(prev) = self.cursor.take() {
            self.inner = self.inner.edge(prev, loop_start.clone());
        } else if !self.started {
            self.inner = self.inner.start(loop_start.clone());
            self.started = true;
        }
        self.inner = self.inner.edge(loop_start, body_head.clone());
        self.inner = self.inner.edge(body_tail, loop_check.clone());

        let until = options.until;
        let max_iterations = options.max_iterations;
        let continue_while: EdgeCondition = Arc::new(move |state: &State| {
            let iteration = state.fields.get("iteration").and_then(|v| v.as_f64()).unwrap_or(0.0);
            !until(state) && iteration < max_iterations as f64
        });
        self.inner = self.inner.conditional_edge(loop_check.clone(), body_head, "loop-continue", continue_while);
        self.cursor = Some(loop_check);
        self
    }

    /// A node that emits `human_input_required` with `prompt` as payload and
    /// otherwise behaves like `then`.
    pub fn wait(self, id: impl Into<NodeId>, prompt: Value) -> Self {
        let node = NodeDefinition::new(id, NodeKind::Wait, human_input_executor(prompt));
        self.then(node)
    }

    /// A node that emits `human_input_required` with `{question, options}`
    /// as payload and otherwise behaves like `then`.
    pub fn ask_user(self, id: impl Into<NodeId>, question: impl Into<String>, options: Vec<String>) -> Self {
        let payload = serde_json::json!({"question": question.into(), "options": options});
        let node = NodeDefinition::new(id, NodeKind::AskUser, human_input_executor(payload));
        self.then(node)
    }

    /// Registers a graph-wide error-handler node id (must be reached only
    /// through an explicit recovery-marked `onError` goto).
    pub fn catch(mut self, handler_id: impl Into<NodeId>) -> Self {
        self.inner = self.inner.with_error_handler(handler_id);
        self
    }

    /// Convenience agent-node constructor. Auto-sets the start node when
    /// this is the first call on an empty builder.
    pub fn subagent(self, id: impl Into<NodeId>, execute: NodeExecutor) -> Self {
        self.then(NodeDefinition::new(id, NodeKind::Agent, execute))
    }

    /// Convenience tool-node constructor, same auto-entry rule as `subagent`.
    pub fn tool(self, id: impl Into<NodeId>, execute: NodeExecutor) -> Self {
        self.then(NodeDefinition::new(id, NodeKind::Tool, execute))
    }

    pub fn recovery_node(mut self, id: impl Into<NodeId>, execute: NodeExecutor) -> Self {
        self.inner = self.inner.recovery_node(id, execute);
        self
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn agentgraph_checkpoint::Checkpointer>) -> Self {
        self.inner = self.inner.with_checkpointer(checkpointer);
        self
    }

    pub fn with_runtime(mut self, runtime: Arc<dyn crate::node::RuntimeDependencies>) -> Self {
        self.inner = self.inner.with_runtime(runtime);
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.inner = self.inner.with_default_model(model);
        self
    }

    pub fn with_max_steps(mut self, max: u64) -> Self {
        self.inner = self.inner.with_max_steps(max);
        self
    }

    pub fn with_auto_checkpoint(mut self, enabled: bool) -> Self {
        self.inner = self.inner.with_auto_checkpoint(enabled);
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.inner = self.inner.with_max_concurrency(max);
        self
    }

    /// Freezes the graph. Fails if no `if_`/`endif` pairs are unbalanced,
    /// and on every `GraphBuilder::compile` referential-integrity check.
    pub fn compile(self) -> Result<CompiledGraph> {
        if !self.if_stack.is_empty() {
            return Err(GraphError::Validation(format!(
                "{} unclosed if_ block(s): missing endif",
                self.if_stack.len()
            )));
        }
        self.inner.compile()
    }
}

/// `END` re-exported for callers constructing raw `Edge`s alongside the
/// fluent API.
pub const TERMINAL: &str = END;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecutionOptions, GraphExecutor};
    use crate::node::{ExecutionContext as Ctx, NodeResult};
    use crate::snapshot::ExecutionStatus;
    use crate::state::{reducers, Annotation};
    use serde_json::json;

    fn set_fields(id: &str, update: Value) -> NodeDefinition {
        NodeDefinition::new(
            id,
            NodeKind::Agent,
            Arc::new(move |_ctx: Ctx| {
                let update = update.clone();
                Box::pin(async move { Ok(NodeResult::new().with_update(update)) }) as BoxFuture<'static, Result<NodeResult>>
            }),
        )
    }

    #[tokio::test]
    async fn then_chain_auto_enters_start_and_terminates() {
        let graph = FluentGraphBuilder::new(StateSchema::new())
            .then(set_fields("a", json!({})))
            .then(set_fields("b", json!({})))
            .end()
            .compile()
            .unwrap();
        assert_eq!(graph.start, "a");
        assert!(graph.is_terminal("b"));
    }

    #[tokio::test]
    async fn if_else_endif_wires_both_branches_into_merge() {
        let mut schema = StateSchema::new();
        schema.field("messages", Annotation::with_factory(|| json!([])).with_reducer(reducers::concat()));
        let cond: EdgeCondition = Arc::new(|s: &State| s.fields.get("flag").and_then(|v| v.as_bool()).unwrap_or(false));

        let graph = FluentGraphBuilder::new(schema)
            .then(set_fields("start", json!({"flag": true})))
            .if_(cond)
            .then(set_fields("if_true", json!({"messages": ["if-branch"]})))
            .else_()
            .then(set_fields("if_false", json!({"messages": ["else-branch"]})))
            .endif()
            .then(set_fields("end", json!({"messages": ["end"]})))
            .end()
            .compile()
            .unwrap();

        let result = GraphExecutor::new(Arc::new(graph)).execute(ExecutionOptions::default()).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.state.fields["messages"], json!(["if-branch", "end"]));
    }

    #[tokio::test]
    async fn missing_endif_fails_compile() {
        let cond: EdgeCondition = Arc::new(|_s: &State| true);
        let err = FluentGraphBuilder::new(StateSchema::new())
            .then(set_fields("start", json!({})))
            .if_(cond)
            .then(set_fields("if_true", json!({})))
            .compile()
            .unwrap_err();
        assert!(err.to_string().contains("unclosed"));
    }

    #[tokio::test]
    async fn loop_runs_until_predicate_stops_it() {
        let mut schema = StateSchema::new();
        schema.field("iteration", Annotation::new(json!(0)).with_reducer(reducers::sum()));
        let until: EdgeCondition = Arc::new(|s: &State| {
            s.fields.get("iteration").and_then(|v| v.as_f64()).unwrap_or(0.0) >= 3.0
        });

        let graph = FluentGraphBuilder::new(schema)
            .loop_block(vec![set_fields("body", json!({"iteration": 1}))], LoopOptions { until, max_iterations: 10 })
            .then(set_fields("after", json!({})))
            .end()
            .compile()
            .unwrap();

        let result = GraphExecutor::new(Arc::new(graph)).execute(ExecutionOptions::default()).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.state.fields["iteration"], json!(3.0));
    }

    #[tokio::test]
    async fn parallel_block_fans_out_then_joins() {
        let mut schema = StateSchema::new();
        schema.field("counter", Annotation::new(json!(0)).with_reducer(reducers::sum()));
        let mapper: OutputMapper = Arc::new(|states: &std::collections::HashMap<NodeId, State>| {
            let sum: f64 = states.values().filter_map(|s| s.fields.get("local").and_then(|v| v.as_f64())).sum();
            Ok(json!({"counter": sum}))
        });

        let graph = FluentGraphBuilder::new(schema)
            .parallel(
                ParallelBlock::new(vec![
                    vec![set_fields("branch_a", json!({"local": 1}))],
                    vec![set_fields("branch_b", json!({"local": 2}))],
                ])
                .with_output_mapper(mapper),
            )
            .end()
            .compile()
            .unwrap();

        let result = GraphExecutor::new(Arc::new(graph)).execute(ExecutionOptions::default()).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.state.fields["counter"], json!(3.0));
    }
}
