//! Directed, optionally conditional transitions between nodes.

use crate::node::NodeId;
use crate::state::State;
use std::fmt;
use std::sync::Arc;

/// A boolean predicate over current state, evaluated synchronously. Graph
/// authors needing async lookups should resolve them into state fields from
/// within a node rather than an edge condition.
pub type EdgeCondition = Arc<dyn Fn(&State) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub condition: Option<EdgeCondition>,
    pub label: Option<String>,
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Edge")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("label", &self.label)
            .field("conditional", &self.condition.is_some())
            .finish()
    }
}

impl Edge {
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: None,
            label: None,
        }
    }

    pub fn conditional(
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
        label: impl Into<String>,
        condition: EdgeCondition,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: Some(condition),
            label: Some(label.into()),
        }
    }

    /// An edge with no condition always matches.
    pub fn matches(&self, state: &State) -> bool {
        match &self.condition {
            Some(cond) => cond(state),
            None => true,
        }
    }
}
