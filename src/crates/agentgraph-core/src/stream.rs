//! Streaming execution observability.
//!
//! Four modes:
//!
//! - `values` — full state snapshot after each step
//! - `updates` — just the delta the step's node produced
//! - `events` — custom events a node emitted plus signals (`HumanInputRequired`,
//!   `Checkpoint`, ...)
//! - `debug` — everything above plus per-step timing and the node's resolved
//!   model, retry attempt, and error entries
//!
//! A single execution can enable more than one mode at once; [`StreamRouter`]
//! fans a step out to whichever modes are subscribed.

use crate::node::{CustomEvent, ExecutionErrorEntry, NodeId, Signal};
use crate::snapshot::ExecutionStatus;
use crate::state::State;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    Values,
    Updates,
    Events,
    Debug,
}

/// One emission from the router. `mode` tells a multi-mode consumer which
/// subscription produced this chunk; the same step can produce one chunk per
/// enabled mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub mode: StreamMode,
    pub step: u64,
    pub node: NodeId,
    pub event: StreamEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Full state after the step (`values` mode).
    State { state: Value },
    /// The node's raw output delta before merge (`updates` mode).
    Update { update: Value },
    /// A signal the node emitted, or a custom event via `ExecutionContext::emit`
    /// (`events` mode).
    Signal(Signal),
    Custom(CustomEvent),
    /// Verbose per-step trace (`debug` mode only).
    Debug {
        model: Option<String>,
        attempt: u32,
        duration_ms: u64,
        errors: Vec<ExecutionErrorEntry>,
    },
}

/// What the executor hands the router once per completed step.
///
/// [`GraphExecutor::stream`](crate::executor::GraphExecutor::stream) yields
/// these directly (a lazy, finite sequence of `StepResult`s);
/// `terminal_status` is `None` for every executed-node emission and `Some`
/// only on the final synthetic item marking how the run ended.
#[derive(Debug, Clone)]
pub struct StepEmission {
    pub step: u64,
    pub node: NodeId,
    pub state: State,
    pub update: Option<Value>,
    pub signals: Vec<Signal>,
    pub custom_events: Vec<CustomEvent>,
    pub model: Option<String>,
    pub attempt: u32,
    pub duration_ms: u64,
    pub errors: Vec<ExecutionErrorEntry>,
    pub terminal_status: Option<ExecutionStatus>,
}

impl StepEmission {
    /// The final synthetic item a stream yields, carrying the terminal
    /// status and the state as of termination.
    pub fn terminal(step: u64, node: NodeId, state: State, status: ExecutionStatus) -> Self {
        Self {
            step,
            node,
            state,
            update: None,
            signals: Vec::new(),
            custom_events: Vec::new(),
            model: None,
            attempt: 0,
            duration_ms: 0,
            errors: Vec::new(),
            terminal_status: Some(status),
        }
    }
}

/// Filters a stream of [`StepEmission`]s down to the chunks a set of
/// subscribed modes care about, and pushes them onto an mpsc channel so a
/// caller can `stream.next().await` them independent of the execution loop.
pub struct StreamRouter {
    modes: HashSet<StreamMode>,
    tx: mpsc::Sender<StreamChunk>,
}

impl StreamRouter {
    pub fn new(modes: Vec<StreamMode>, tx: mpsc::Sender<StreamChunk>) -> Self {
        Self {
            modes: modes.into_iter().collect(),
            tx,
        }
    }

    pub fn has_mode(&self, mode: StreamMode) -> bool {
        self.modes.contains(&mode)
    }

    /// Projects one step into zero or more chunks and sends them in a fixed
    /// order (values, updates, events, debug) so consumers interleaving
    /// modes see a stable ordering per step.
    pub async fn route(&self, emission: StepEmission) -> Result<(), String> {
        if self.modes.contains(&StreamMode::Values) {
            self.send(StreamChunk {
                mode: StreamMode::Values,
                step: emission.step,
                node: emission.node.clone(),
                event: StreamEvent::State {
                    state: emission.state.to_value(),
                },
            })
            .await?;
        }

        if self.modes.contains(&StreamMode::Updates) {
            if let Some(update) = emission.update.clone() {
                self.send(StreamChunk {
                    mode: StreamMode::Updates,
                    step: emission.step,
                    node: emission.node.clone(),
                    event: StreamEvent::Update { update },
                })
                .await?;
            }
        }

        if self.modes.contains(&StreamMode::Events) {
            for signal in &emission.signals {
                self.send(StreamChunk {
                    mode: StreamMode::Events,
                    step: emission.step,
                    node: emission.node.clone(),
                    event: StreamEvent::Signal(signal.clone()),
                })
                .await?;
            }
            for event in &emission.custom_events {
                self.send(StreamChunk {
                    mode: StreamMode::Events,
                    step: emission.step,
                    node: emission.node.clone(),
                    event: StreamEvent::Custom(event.clone()),
                })
                .await?;
            }
        }

        if self.modes.contains(&StreamMode::Debug) {
            self.send(StreamChunk {
                mode: StreamMode::Debug,
                step: emission.step,
                node: emission.node.clone(),
                event: StreamEvent::Debug {
                    model: emission.model.clone(),
                    attempt: emission.attempt,
                    duration_ms: emission.duration_ms,
                    errors: emission.errors.clone(),
                },
            })
            .await?;
        }

        Ok(())
    }

    async fn send(&self, chunk: StreamChunk) -> Result<(), String> {
        self.tx
            .send(chunk)
            .await
            .map_err(|e| format!("stream closed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateSchema;
    use serde_json::json;

    fn sample_emission(step: u64) -> StepEmission {
        let schema = StateSchema::new();
        StepEmission {
            step,
            node: "plan".to_string(),
            state: schema.initial_state("exec-1"),
            update: Some(json!({"done": true})),
            signals: vec![Signal::Checkpoint],
            custom_events: vec![],
            model: Some("claude".to_string()),
            attempt: 1,
            duration_ms: 12,
            errors: vec![],
            terminal_status: None,
        }
    }

    #[tokio::test]
    async fn values_mode_only_emits_state_chunks() {
        let (tx, mut rx) = mpsc::channel(10);
        let router = StreamRouter::new(vec![StreamMode::Values], tx);
        router.route(sample_emission(1)).await.unwrap();
        drop(router);

        let chunk = rx.recv().await.unwrap();
        assert_eq!(chunk.mode, StreamMode::Values);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn multi_mode_emits_one_chunk_per_enabled_mode() {
        let (tx, mut rx) = mpsc::channel(10);
        let router = StreamRouter::new(vec![StreamMode::Values, StreamMode::Updates], tx);
        router.route(sample_emission(1)).await.unwrap();
        drop(router);

        let mut modes = vec![];
        while let Some(chunk) = rx.recv().await {
            modes.push(chunk.mode);
        }
        assert_eq!(modes, vec![StreamMode::Values, StreamMode::Updates]);
    }

    #[tokio::test]
    async fn events_mode_emits_signals_and_custom_events() {
        let (tx, mut rx) = mpsc::channel(10);
        let router = StreamRouter::new(vec![StreamMode::Events], tx);
        router.route(sample_emission(1)).await.unwrap();
        drop(router);

        let chunk = rx.recv().await.unwrap();
        assert!(matches!(chunk.event, StreamEvent::Signal(Signal::Checkpoint)));
    }
}
