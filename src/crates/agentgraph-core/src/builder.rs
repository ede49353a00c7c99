//! Fluent builder for assembling a [`CompiledGraph`].
//!
//! `GraphBuilder` is the low-level substrate: nodes and edges are
//! registered imperatively, then `compile()` validates referential integrity
//! and freezes the result. Two control-flow constructs get dedicated
//! convenience methods because the executor needs node-level metadata to
//! carry them out — `parallel` (fan-out/fan-in) and `loop_` (synthesized from
//! plain edges, no special `NodeKind`).

use crate::edge::{Edge, EdgeCondition};
use crate::error::{GraphError, Result};
use crate::graph::{CompiledGraph, GraphConfig};
use crate::node::{
    NodeDefinition, NodeExecutor, NodeId, NodeKind, OutputMapper, ParallelSpec, ParallelStrategy,
};
use crate::state::StateSchema;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub const START: &str = "__start__";
pub const END: &str = "__end__";

/// Builds a graph node by node, edge by edge.
pub struct GraphBuilder {
    nodes: HashMap<NodeId, NodeDefinition>,
    edges: Vec<Edge>,
    start: Option<NodeId>,
    schema: StateSchema,
    config: GraphConfig,
}

impl GraphBuilder {
    pub fn new(schema: StateSchema) -> Self {
        Self {
            nodes: HashMap::new(),
            edges: Vec::new(),
            start: None,
            schema,
            config: GraphConfig::default(),
        }
    }

    pub fn node(mut self, node: NodeDefinition) -> Self {
        self.nodes.insert(node.id.clone(), node);
        self
    }

    /// Convenience for a plain agent/tool node built from an async closure.
    pub fn agent(self, id: impl Into<NodeId>, execute: NodeExecutor) -> Self {
        self.node(NodeDefinition::new(id, NodeKind::Agent, execute))
    }

    pub fn tool(self, id: impl Into<NodeId>, execute: NodeExecutor) -> Self {
        self.node(NodeDefinition::new(id, NodeKind::Tool, execute))
    }

    pub fn decision(self, id: impl Into<NodeId>, execute: NodeExecutor) -> Self {
        self.node(NodeDefinition::new(id, NodeKind::Decision, execute))
    }

    pub fn wait(self, id: impl Into<NodeId>, execute: NodeExecutor) -> Self {
        self.node(NodeDefinition::new(id, NodeKind::Wait, execute))
    }

    pub fn ask_user(self, id: impl Into<NodeId>, execute: NodeExecutor) -> Self {
        self.node(NodeDefinition::new(id, NodeKind::AskUser, execute))
    }

    pub fn subgraph(self, id: impl Into<NodeId>, execute: NodeExecutor) -> Self {
        self.node(NodeDefinition::new(id, NodeKind::Subgraph, execute))
    }

    /// Marks `id` as reachable from `goto` in an `onError` hook.
    pub fn recovery_node(mut self, id: impl Into<NodeId>, execute: NodeExecutor) -> Self {
        let node = NodeDefinition::new(id, NodeKind::Agent, execute).recovery();
        self.nodes.insert(node.id.clone(), node);
        self
    }

    pub fn start(mut self, id: impl Into<NodeId>) -> Self {
        self.start = Some(id.into());
        self
    }

    pub fn edge(mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        self.edges.push(Edge::new(from, to));
        self
    }

    pub fn conditional_edge(
        mut self,
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
        label: impl Into<String>,
        condition: EdgeCondition,
    ) -> Self {
        self.edges.push(Edge::conditional(from, to, label, condition));
        self
    }

    /// Terminates `id` — an edge straight to the implicit `END` marker.
    pub fn end(mut self, id: impl Into<NodeId>) -> Self {
        self.edges.push(Edge::new(id, END));
        self
    }

    /// Fan-out/fan-in: every id in `branch_heads` runs from the same input
    /// state; `output_mapper` combines their final states into the delta
    /// applied before `join_node` runs. Only `strategy: all` (wait for every
    /// branch) is implemented — `compile()` rejects anything else.
    pub fn parallel(
        mut self,
        id: impl Into<NodeId>,
        branch_heads: Vec<NodeId>,
        join_node: impl Into<NodeId>,
        output_mapper: OutputMapper,
    ) -> Self {
        let id = id.into();
        let join_node = join_node.into();
        let spec = ParallelSpec {
            branch_heads,
            strategy: ParallelStrategy::All,
            output_mapper,
            join_node,
        };
        let node = NodeDefinition::passthrough(id, NodeKind::Parallel(spec));
        self.nodes.insert(node.id.clone(), node);
        self
    }

    /// Wires a loop purely through edges: an unconditional edge into
    /// `body_head`, then from `body_tail` a conditional "continue" edge back
    /// to `body_head` (checked first) and an unconditional fallthrough edge
    /// to `after`. No dedicated loop `NodeKind` — the executor just follows
    /// edges, same as any other routing decision.
    pub fn loop_(
        mut self,
        body_tail: impl Into<NodeId>,
        body_head: impl Into<NodeId>,
        after: impl Into<NodeId>,
        continue_while: EdgeCondition,
    ) -> Self {
        let body_tail = body_tail.into();
        let body_head = body_head.into();
        let after = after.into();
        self.edges.push(Edge::conditional(
            body_tail.clone(),
            body_head,
            "loop-continue",
            continue_while,
        ));
        self.edges.push(Edge::new(body_tail, after));
        self
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn agentgraph_checkpoint::Checkpointer>) -> Self {
        self.config.checkpointer = Some(checkpointer);
        self
    }

    pub fn with_runtime(mut self, runtime: Arc<dyn crate::node::RuntimeDependencies>) -> Self {
        self.config.runtime = Some(runtime);
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.config.default_model = model.into();
        self
    }

    pub fn with_output_schema(mut self, schema: serde_json::Value) -> Self {
        self.config.output_schema = Some(schema);
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.config.max_concurrency = max;
        self
    }

    pub fn with_max_steps(mut self, max: u64) -> Self {
        self.config.max_steps = max;
        self
    }

    pub fn with_auto_checkpoint(mut self, enabled: bool) -> Self {
        self.config.auto_checkpoint = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    pub fn with_schema_validation(mut self, enabled: bool) -> Self {
        self.config.validate_schemas = enabled;
        self
    }

    /// Registers a graph-wide error-handler node id, as `GraphBuilder::catch`
    /// does in the fluent layer. Not auto-wired into routing — a node still
    /// reaches it only through an explicit `onError` goto naming it.
    pub fn with_error_handler(mut self, id: impl Into<NodeId>) -> Self {
        self.config.metadata.error_handler_id = Some(id.into());
        self
    }

    /// Validates and freezes the graph. Terminal nodes are inferred: any
    /// node with no outgoing edges, plus any node with an edge to `END`.
    pub fn compile(self) -> Result<CompiledGraph> {
        let start = self
            .start
            .ok_or_else(|| GraphError::Validation("graph has no start node".to_string()))?;

        if self.nodes.is_empty() {
            return Err(GraphError::Validation("graph has no nodes".to_string()));
        }

        let has_outgoing: HashSet<&str> = self.edges.iter().map(|e| e.from.as_str()).collect();
        let mut terminal: HashSet<NodeId> = self
            .nodes
            .keys()
            .filter(|id| !has_outgoing.contains(id.as_str()))
            .cloned()
            .collect();
        for edge in &self.edges {
            if edge.to == END {
                terminal.insert(edge.from.clone());
            }
        }

        let edges: Vec<Edge> = self.edges.into_iter().filter(|e| e.to != END).collect();

        for hook_node in self.nodes.values() {
            if let Some(hook) = &hook_node.on_error {
                let _ = hook;
            }
        }

        let graph = CompiledGraph {
            nodes: self.nodes,
            edges,
            start,
            terminal,
            config: Arc::new(self.config),
            schema: Arc::new(self.schema),
        };
        graph.validate()?;
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{ExecutionContext, NodeResult};
    use futures::future::BoxFuture;

    fn noop() -> NodeExecutor {
        Arc::new(|_ctx: ExecutionContext| {
            Box::pin(async { Ok(NodeResult::new()) }) as BoxFuture<'static, Result<NodeResult>>
        })
    }

    #[test]
    fn compile_requires_start_node() {
        let builder = GraphBuilder::new(StateSchema::new()).agent("a", noop());
        assert!(builder.compile().is_err());
    }

    #[test]
    fn linear_graph_infers_terminal_from_end_edge() {
        let graph = GraphBuilder::new(StateSchema::new())
            .agent("a", noop())
            .agent("b", noop())
            .start("a")
            .edge("a", "b")
            .end("b")
            .compile()
            .unwrap();

        assert_eq!(graph.start, "a");
        assert!(graph.is_terminal("b"));
        assert!(!graph.is_terminal("a"));
    }

    #[test]
    fn node_with_no_outgoing_edges_is_terminal_without_explicit_end() {
        let graph = GraphBuilder::new(StateSchema::new())
            .agent("a", noop())
            .start("a")
            .compile()
            .unwrap();
        assert!(graph.is_terminal("a"));
    }

    #[test]
    fn dangling_edge_target_fails_compile() {
        let builder = GraphBuilder::new(StateSchema::new())
            .agent("a", noop())
            .start("a")
            .edge("a", "missing");
        assert!(builder.compile().is_err());
    }

    #[test]
    fn loop_wires_continue_and_fallthrough_edges() {
        let graph = GraphBuilder::new(StateSchema::new())
            .agent("body", noop())
            .agent("after", noop())
            .start("body")
            .loop_("body", "body", "after", Arc::new(|_s| false))
            .compile()
            .unwrap();
        let outgoing = graph.outgoing("body");
        assert_eq!(outgoing.len(), 2);
    }

    #[test]
    fn parallel_rejects_unknown_branch_head() {
        let builder = GraphBuilder::new(StateSchema::new())
            .agent("join", noop())
            .start("join")
            .parallel(
                "fanout",
                vec!["missing".to_string()],
                "join",
                Arc::new(|_states| Ok(serde_json::json!({}))),
            );
        assert!(builder.compile().is_err());
    }
}
