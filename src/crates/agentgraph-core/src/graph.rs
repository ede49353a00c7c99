//! The compiled, immutable graph artifact produced by
//! [`crate::builder::GraphBuilder::compile`].

use agentgraph_checkpoint::Checkpointer;
use crate::error::{GraphError, Result};
use crate::node::{NodeDefinition, NodeId, NodeKind, RuntimeDependencies};
use crate::edge::Edge;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Graph-wide metadata that doesn't belong to any one node.
#[derive(Clone, Default)]
pub struct GraphMetadata {
    /// The node id registered via `GraphBuilder::catch`. Not auto-wired into
    /// routing by itself — a node still reaches it only via an explicit
    /// `onError` goto that names it, which requires it to be a recovery node.
    pub error_handler_id: Option<NodeId>,
}

/// Immutable configuration carried by a [`CompiledGraph`].
#[derive(Clone)]
pub struct GraphConfig {
    pub checkpointer: Option<Arc<dyn Checkpointer>>,
    pub default_model: String,
    pub output_schema: Option<Value>,
    pub max_concurrency: usize,
    pub context_window_threshold: Option<usize>,
    pub runtime: Option<Arc<dyn RuntimeDependencies>>,
    pub metadata: GraphMetadata,
    pub max_steps: u64,
    pub auto_checkpoint: bool,
    pub timeout: Option<Duration>,
    pub validate_schemas: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            checkpointer: None,
            default_model: "unknown".to_string(),
            output_schema: None,
            max_concurrency: 8,
            context_window_threshold: None,
            runtime: None,
            metadata: GraphMetadata::default(),
            max_steps: 1_000,
            auto_checkpoint: false,
            timeout: None,
            validate_schemas: true,
        }
    }
}

/// The immutable, validated graph: nodes keyed by id, edges, a unique start
/// node, and the inferred/declared set of terminal nodes.
#[derive(Clone)]
pub struct CompiledGraph {
    pub nodes: HashMap<NodeId, NodeDefinition>,
    pub edges: Vec<Edge>,
    pub start: NodeId,
    pub terminal: HashSet<NodeId>,
    pub config: Arc<GraphConfig>,
    pub schema: Arc<crate::state::StateSchema>,
}

impl CompiledGraph {
    pub fn outgoing(&self, node_id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.from == node_id).collect()
    }

    pub fn is_terminal(&self, node_id: &str) -> bool {
        self.terminal.contains(node_id)
    }

    /// Re-validates referential integrity. Called once at compile time;
    /// exposed so the permitted post-compile escape hatch (patching in a
    /// recovery node + edge for `goto` tests) can re-check itself.
    pub fn validate(&self) -> Result<()> {
        if !self.nodes.contains_key(&self.start) {
            return Err(GraphError::Validation(format!(
                "start node '{}' does not exist",
                self.start
            )));
        }
        for edge in &self.edges {
            if !self.nodes.contains_key(&edge.from) {
                return Err(GraphError::Validation(format!(
                    "edge references unknown source node '{}'",
                    edge.from
                )));
            }
            if !self.nodes.contains_key(&edge.to) {
                return Err(GraphError::Validation(format!(
                    "edge references unknown target node '{}'",
                    edge.to
                )));
            }
        }
        for node in self.nodes.values() {
            if let NodeKind::Parallel(spec) = &node.kind {
                if spec.strategy != crate::node::ParallelStrategy::All {
                    return Err(GraphError::Validation(format!(
                        "node '{}' uses unsupported parallel strategy {:?}; only `all` is implemented",
                        node.id, spec.strategy
                    )));
                }
                for head in &spec.branch_heads {
                    if !self.nodes.contains_key(head) {
                        return Err(GraphError::Validation(format!(
                            "parallel node '{}' references unknown branch head '{}'",
                            node.id, head
                        )));
                    }
                }
                if !self.nodes.contains_key(&spec.join_node) {
                    return Err(GraphError::Validation(format!(
                        "parallel node '{}' references unknown join node '{}'",
                        node.id, spec.join_node
                    )));
                }
            }
        }
        Ok(())
    }

    /// Patches in a node and an edge targeting it after compilation. A
    /// permitted, narrow escape hatch (used by tests exercising `onError
    /// goto`), not a production code path.
    pub fn patch_goto_target(&mut self, from: &str, node: NodeDefinition, edge_label: &str) -> Result<()> {
        let node_id = node.id.clone();
        self.nodes.insert(node_id.clone(), node);
        self.edges.push(Edge {
            from: from.to_string(),
            to: node_id,
            condition: None,
            label: Some(edge_label.to_string()),
        });
        self.validate()
    }
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("edges", &self.edges.len())
            .field("start", &self.start)
            .field("terminal", &self.terminal)
            .finish()
    }
}
