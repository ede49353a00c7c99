//! The core execution loop (C6): drives traversal of a [`CompiledGraph`] —
//! node scheduling, retry/backoff, `onError` routing, parallel fan-out, loop
//! continuation, signal propagation, cancellation, `maxSteps`, and
//! checkpointing after each step.
//!
//! The executor never switches on [`NodeKind`] at traversal time, with one
//! documented exception: a `Parallel` node's branch list and output mapper
//! live on the node itself (a closure can't be expressed as a plain
//! `NodeResult`), so [`step_once`] reads `node.kind` only to recover that
//! metadata before dispatching to [`run_parallel`].

use crate::edge::Edge;
use crate::error::{GraphError, Result};
use crate::graph::CompiledGraph;
use crate::node::{
    ErrorAction, ExecutionContext, ExecutionErrorEntry, GotoTarget, NodeDefinition, NodeId,
    NodeKind, NodeResult, ParallelSpec, Signal,
};
use crate::snapshot::{ExecutionSnapshot, ExecutionStatus};
use crate::state::State;
use crate::stream::StepEmission;
use crate::validator::StateValidator;
use futures::stream::Stream;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Caller-supplied parameters for one execution.
#[derive(Default)]
pub struct ExecutionOptions {
    /// Defaults to a fresh UUID v4.
    pub execution_id: Option<String>,
    /// Merged into the schema's default state via the same reducers a
    /// mid-execution update would use. The caller cannot overwrite
    /// `executionId` this way (see `StateSchema::merge`).
    pub initial_state: Option<Value>,
    pub abort: Option<CancellationToken>,
    /// The resolved model of the enclosing context, consulted by model
    /// resolution when a node's own `model` is unset or `"inherit"`.
    pub parent_model: Option<String>,
}

/// What one execution produced.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub state: State,
    pub snapshot: ExecutionSnapshot,
}

type StepSink = mpsc::Sender<StepEmission>;

/// Shared, read-only context for one run (and every branch task it spawns).
#[derive(Clone)]
struct RunContext {
    graph: Arc<CompiledGraph>,
    execution_id: String,
    abort: CancellationToken,
    parent_model: Option<String>,
}

/// Mutable bookkeeping for one traversal — the top-level run, or one
/// parallel branch. Branches get their own tracker and are merged back into
/// the parent's after the join.
struct Tracker {
    state: State,
    visited: Vec<NodeId>,
    errors: Vec<ExecutionErrorEntry>,
    signals: Vec<Signal>,
    step_count: u64,
}

enum RunOutcome {
    Terminal(ExecutionStatus),
    /// Only returned when `run_until` was called with a `stop_before`
    /// target and the traversal reached it without executing it.
    ReachedJoin,
}

enum StepNext {
    Node(NodeId),
    Terminal(ExecutionStatus),
}

/// Drives one execution of a [`CompiledGraph`].
pub struct GraphExecutor {
    graph: Arc<CompiledGraph>,
}

impl GraphExecutor {
    pub fn new(graph: Arc<CompiledGraph>) -> Self {
        Self { graph }
    }

    /// Runs the graph to a terminal status and returns the final result.
    #[tracing::instrument(skip_all, fields(execution_id = tracing::field::Empty))]
    pub async fn execute(&self, options: ExecutionOptions) -> Result<ExecutionResult> {
        let (ctx, mut tracker) = self.prepare(options)?;
        tracing::Span::current().record("execution_id", tracing::field::display(&ctx.execution_id));

        let status = self.drive(&ctx, &mut tracker, None).await?;
        Ok(self.finish(ctx, tracker, status))
    }

    /// Same drive loop, but yields a [`StepEmission`] after every executed
    /// node instead of only the final result, plus one terminal item once
    /// the run ends. Pull-driven: the producer task only computes the next
    /// step once the consumer asks for it by polling the stream.
    pub fn stream(
        &self,
        options: ExecutionOptions,
    ) -> Result<impl Stream<Item = StepEmission> + Send + 'static> {
        let (ctx, mut tracker) = self.prepare(options)?;
        let executor = GraphExecutor { graph: self.graph.clone() };
        let (tx, rx) = mpsc::channel::<StepEmission>(32);

        tokio::spawn(async move {
            let status = executor.drive(&ctx, &mut tracker, Some(&tx)).await.unwrap_or(ExecutionStatus::Failed);
            let step = tracker.step_count;
            let _ = tx
                .send(StepEmission::terminal(step, String::new(), tracker.state.clone(), status))
                .await;
        });

        Ok(tokio_stream::wrappers::ReceiverStream::new(rx))
    }

    fn prepare(&self, options: ExecutionOptions) -> Result<(RunContext, Tracker)> {
        let execution_id = options
            .execution_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let state = self
            .graph
            .schema
            .initial_state_with(execution_id.clone(), options.initial_state)
            .map_err(|e| GraphError::Validation(format!("invalid initial state: {e}")))?;
        let ctx = RunContext {
            graph: self.graph.clone(),
            execution_id,
            abort: options.abort.unwrap_or_default(),
            parent_model: options.parent_model,
        };
        let tracker = Tracker {
            state,
            visited: Vec::new(),
            errors: Vec::new(),
            signals: Vec::new(),
            step_count: 0,
        };
        Ok((ctx, tracker))
    }

    async fn drive(
        &self,
        ctx: &RunContext,
        tracker: &mut Tracker,
        sink: Option<&StepSink>,
    ) -> Result<ExecutionStatus> {
        match run_until(ctx, tracker, ctx.graph.start.clone(), None, sink).await? {
            RunOutcome::Terminal(status) => Ok(status),
            RunOutcome::ReachedJoin => unreachable!("top-level run has no join target"),
        }
    }

    fn finish(&self, ctx: RunContext, tracker: Tracker, status: ExecutionStatus) -> ExecutionResult {
        let mut snapshot = ExecutionSnapshot::new(ctx.execution_id);
        snapshot.status = status;
        snapshot.current_node = tracker.visited.last().cloned();
        snapshot.visited_nodes = tracker.visited;
        snapshot.errors = tracker.errors;
        snapshot.signals = tracker.signals;
        snapshot.step_count = tracker.step_count;
        snapshot.updated_at = chrono::Utc::now();
        if status.is_terminal() {
            snapshot.completed_at = Some(snapshot.updated_at);
        }
        ExecutionResult {
            status,
            state: tracker.state,
            snapshot,
        }
    }
}

/// Drives `tracker` from `start` until it either reaches a terminal status
/// or (when `stop_before` is `Some`) is about to execute that node, in which
/// case it stops without executing it and returns [`RunOutcome::ReachedJoin`].
/// Used both for the top-level run (`stop_before = None`) and for one
/// parallel branch (`stop_before = Some(join_node)`).
async fn run_until(
    ctx: &RunContext,
    tracker: &mut Tracker,
    start: NodeId,
    stop_before: Option<&NodeId>,
    sink: Option<&StepSink>,
) -> Result<RunOutcome> {
    let mut current = start;
    loop {
        if let Some(stop) = stop_before {
            if &current == stop {
                return Ok(RunOutcome::ReachedJoin);
            }
        }

        if ctx.abort.is_cancelled() {
            return Ok(RunOutcome::Terminal(ExecutionStatus::Cancelled));
        }
        if tracker.step_count >= ctx.graph.config.max_steps {
            tracker.errors.push(ExecutionErrorEntry {
                node_id: current.clone(),
                error: GraphError::MaxStepsExceeded.to_string(),
                timestamp: chrono::Utc::now(),
                attempt: 0,
            });
            return Ok(RunOutcome::Terminal(ExecutionStatus::Failed));
        }

        let node = match ctx.graph.nodes.get(&current) {
            Some(node) => node.clone(),
            None => {
                tracker.errors.push(ExecutionErrorEntry {
                    node_id: current.clone(),
                    error: format!("goto target '{current}' does not exist"),
                    timestamp: chrono::Utc::now(),
                    attempt: 0,
                });
                return Ok(RunOutcome::Terminal(ExecutionStatus::Failed));
            }
        };

        tracker.step_count += 1;
        tracker.visited.push(current.clone());

        match step_once(ctx, tracker, &node, sink).await? {
            StepNext::Node(next) => current = next,
            StepNext::Terminal(status) => return Ok(RunOutcome::Terminal(status)),
        }
    }
}

/// Executes one node end to end: retry loop, `onError` hook, merge, signal
/// handling, checkpoint, `StepResult` emission, and next-node selection.
async fn step_once(
    ctx: &RunContext,
    tracker: &mut Tracker,
    node: &NodeDefinition,
    sink: Option<&StepSink>,
) -> Result<StepNext> {
    let model = resolve_model(ctx, node);
    let node_outputs: HashMap<NodeId, Value> = tracker
        .state
        .outputs
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let max_attempts = node.retry.as_ref().map(|p| p.max_attempts).unwrap_or(1).max(1);
    let started = Instant::now();

    let mut outcome: Option<(NodeResult, Vec<crate::node::CustomEvent>)> = None;
    let mut last_error: Option<GraphError> = None;

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            let delay = node
                .retry
                .as_ref()
                .map(|p| p.delay_for(attempt))
                .unwrap_or(Duration::ZERO);
            if !sleep_or_cancel(delay, &ctx.abort).await {
                return Ok(StepNext::Terminal(ExecutionStatus::Cancelled));
            }
        }

        match run_attempt(ctx, tracker, node, &model, &node_outputs).await {
            Ok(tuple) => {
                outcome = Some(tuple);
                break;
            }
            Err(err) => {
                tracker.errors.push(ExecutionErrorEntry {
                    node_id: node.id.clone(),
                    error: err.to_string(),
                    timestamp: chrono::Utc::now(),
                    attempt,
                });
                let retry_ok = node
                    .retry
                    .as_ref()
                    .map(|p| p.should_retry(attempt, &err))
                    .unwrap_or(false);
                last_error = Some(err);
                if !retry_ok {
                    break;
                }
            }
        }
    }

    let (mut node_result, custom_events) = match outcome {
        Some(tuple) => tuple,
        None => {
            let error = last_error.unwrap_or_else(|| GraphError::Custom("node failed".to_string()));
            return handle_exhausted(ctx, tracker, node, &model, &node_outputs, error, sink).await;
        }
    };

    if let NodeKind::Parallel(spec) = &node.kind {
        node_result.goto = Some(GotoTarget::Parallel(spec.branch_heads.clone()));
    }

    finish_step(ctx, tracker, node, &model, node_result, custom_events, 1, started, sink).await
}

/// One execution attempt: input validation, `execute`, output validation
/// (node-level and graph-level), and a tentative merge — none of it
/// committed to `tracker.state` unless every step here succeeds.
async fn run_attempt(
    ctx: &RunContext,
    tracker: &Tracker,
    node: &NodeDefinition,
    model: &str,
    node_outputs: &HashMap<NodeId, Value>,
) -> Result<(NodeResult, Vec<crate::node::CustomEvent>)> {
    let current_value = tracker.state.to_value();
    if let Some(schema) = &node.input_schema {
        StateValidator::validate_node_input(&node.id, schema, &current_value)?;
    }

    let exec_ctx = ExecutionContext::new(
        tracker.state.clone(),
        model.to_string(),
        ctx.abort.clone(),
        tracker.errors.clone(),
        node_outputs.clone(),
        ctx.graph.config.clone(),
        ctx.graph.config.runtime.clone(),
    );
    let emitted = exec_ctx.emitted_handle();
    let node_result = (node.execute)(exec_ctx).await?;
    let custom_events = std::mem::take(&mut *emitted.lock().unwrap());

    if let Some(update) = &node_result.update {
        let tentative = ctx
            .graph
            .schema
            .merge(&tracker.state, update)
            .map_err(|e| GraphError::Validation(format!("state merge failed: {e}")))?;
        let tentative_value = tentative.to_value();
        if let Some(schema) = &node.output_schema {
            StateValidator::validate_node_output(&node.id, schema, &tentative_value)?;
        }
        if let Some(schema) = &ctx.graph.config.output_schema {
            StateValidator::validate_graph_output(schema, &tentative_value)?;
        }
    }

    Ok((node_result, custom_events))
}

/// Every attempt (and the `onError` hook's own `retry`, if any) failed.
/// Consults `onError`, if set, and translates its [`ErrorAction`] into the
/// next step; otherwise the node fails the whole execution.
async fn handle_exhausted(
    ctx: &RunContext,
    tracker: &mut Tracker,
    node: &NodeDefinition,
    model: &str,
    node_outputs: &HashMap<NodeId, Value>,
    error: GraphError,
    sink: Option<&StepSink>,
) -> Result<StepNext> {
    let Some(hook) = &node.on_error else {
        return Ok(StepNext::Terminal(ExecutionStatus::Failed));
    };

    let hook_ctx = ExecutionContext::new(
        tracker.state.clone(),
        model.to_string(),
        ctx.abort.clone(),
        tracker.errors.clone(),
        node_outputs.clone(),
        ctx.graph.config.clone(),
        ctx.graph.config.runtime.clone(),
    );
    let action = hook(error.clone(), hook_ctx).await;

    match action {
        ErrorAction::Retry { delay_ms } => {
            if !sleep_or_cancel(Duration::from_millis(delay_ms), &ctx.abort).await {
                return Ok(StepNext::Terminal(ExecutionStatus::Cancelled));
            }
            let started = Instant::now();
            match run_attempt(ctx, tracker, node, model, node_outputs).await {
                Ok((mut node_result, custom_events)) => {
                    if let NodeKind::Parallel(spec) = &node.kind {
                        node_result.goto = Some(GotoTarget::Parallel(spec.branch_heads.clone()));
                    }
                    finish_step(ctx, tracker, node, model, node_result, custom_events, 2, started, sink).await
                }
                Err(err) => {
                    tracker.errors.push(ExecutionErrorEntry {
                        node_id: node.id.clone(),
                        error: err.to_string(),
                        timestamp: chrono::Utc::now(),
                        attempt: 2,
                    });
                    Ok(StepNext::Terminal(ExecutionStatus::Failed))
                }
            }
        }
        ErrorAction::Skip { fallback_state } => {
            if let Some(fallback) = fallback_state {
                tracker.state = ctx
                    .graph
                    .schema
                    .merge(&tracker.state, &fallback)
                    .map_err(|e| GraphError::Validation(format!("fallback merge failed: {e}")))?;
            }
            select_next(ctx, tracker, node, &NodeResult::new())
        }
        ErrorAction::Abort { error: override_error } => {
            tracker.errors.push(ExecutionErrorEntry {
                node_id: node.id.clone(),
                error: override_error.unwrap_or_else(|| error.to_string()),
                timestamp: chrono::Utc::now(),
                attempt: 0,
            });
            Ok(StepNext::Terminal(ExecutionStatus::Failed))
        }
        ErrorAction::Goto { node_id } => match ctx.graph.nodes.get(&node_id) {
            Some(target) if target.is_recovery_node => Ok(StepNext::Node(node_id)),
            _ => {
                let err = GraphError::missing_recovery(node_id);
                tracker.errors.push(ExecutionErrorEntry {
                    node_id: node.id.clone(),
                    error: err.to_string(),
                    timestamp: chrono::Utc::now(),
                    attempt: 0,
                });
                Ok(StepNext::Terminal(ExecutionStatus::Failed))
            }
        },
    }
}

/// Commits a successful attempt's state delta, handles its signals,
/// checkpoints, emits the `StepResult`, and selects the next node.
#[allow(clippy::too_many_arguments)]
async fn finish_step(
    ctx: &RunContext,
    tracker: &mut Tracker,
    node: &NodeDefinition,
    model: &str,
    node_result: NodeResult,
    custom_events: Vec<crate::node::CustomEvent>,
    attempt: u32,
    started: Instant,
    sink: Option<&StepSink>,
) -> Result<StepNext> {
    if let Some(update) = &node_result.update {
        tracker.state = ctx
            .graph
            .schema
            .merge(&tracker.state, update)
            .map_err(|e| GraphError::Validation(format!("state merge failed: {e}")))?;
    } else {
        // Even an empty delta refreshes `lastUpdated` per the merge contract.
        tracker.state = ctx
            .graph
            .schema
            .merge(&tracker.state, &Value::Null)
            .map_err(|e| GraphError::Validation(format!("state merge failed: {e}")))?;
    }

    let mut paused = false;
    for signal in &node_result.signals {
        tracker.signals.push(signal.clone());
        match signal {
            Signal::HumanInputRequired { .. } => paused = true,
            Signal::Checkpoint => {
                checkpoint(ctx, tracker, &format!("{}-signal", node.id)).await?;
            }
            _ => {}
        }
    }

    if ctx.graph.config.auto_checkpoint {
        checkpoint(ctx, tracker, &format!("{}-{}", node.id, tracker.step_count)).await?;
    }

    if let Some(sink) = sink {
        let emission = StepEmission {
            step: tracker.step_count,
            node: node.id.clone(),
            state: tracker.state.clone(),
            update: node_result.update.clone(),
            signals: node_result.signals.clone(),
            custom_events,
            model: Some(model.to_string()),
            attempt,
            duration_ms: started.elapsed().as_millis() as u64,
            errors: tracker.errors.clone(),
            terminal_status: None,
        };
        let _ = sink.send(emission).await;
    }

    if paused {
        return Ok(StepNext::Terminal(ExecutionStatus::Paused));
    }

    if let GotoTarget::Parallel(branch_ids) = node_result.goto.clone().unwrap_or(GotoTarget::Parallel(Vec::new())) {
        if !branch_ids.is_empty() {
            let spec = match &node.kind {
                NodeKind::Parallel(spec) => spec.clone(),
                _ => unreachable!("goto Parallel only set for Parallel nodes"),
            };
            return run_parallel(ctx, tracker, &spec, sink).await;
        }
    }

    select_next(ctx, tracker, node, &node_result)
}

fn select_next(
    ctx: &RunContext,
    tracker: &Tracker,
    node: &NodeDefinition,
    node_result: &NodeResult,
) -> Result<StepNext> {
    match &node_result.goto {
        Some(GotoTarget::Single(target)) => {
            if ctx.graph.nodes.contains_key(target) {
                Ok(StepNext::Node(target.clone()))
            } else {
                Ok(StepNext::Terminal(ExecutionStatus::Failed))
            }
        }
        Some(GotoTarget::Parallel(_)) | None => {
            let edges: Vec<&Edge> = ctx.graph.outgoing(&node.id);
            for edge in edges {
                if edge.matches(&tracker.state) {
                    return Ok(StepNext::Node(edge.to.clone()));
                }
            }
            if ctx.graph.is_terminal(&node.id) {
                Ok(StepNext::Terminal(ExecutionStatus::Completed))
            } else {
                Ok(StepNext::Terminal(ExecutionStatus::Failed))
            }
        }
    }
}

/// Fans `spec.branch_heads` out concurrently, each as an independent
/// traversal up to (not including) `spec.join_node`, then folds every
/// branch's final state through `spec.output_mapper` and continues at the
/// join node. Only `strategy: all` is implemented (enforced at compile
/// time): on any branch failure the whole block fails once every branch has
/// settled.
async fn run_parallel(
    ctx: &RunContext,
    tracker: &mut Tracker,
    spec: &ParallelSpec,
    sink: Option<&StepSink>,
) -> Result<StepNext> {
    let semaphore = Arc::new(tokio::sync::Semaphore::new(ctx.graph.config.max_concurrency.max(1)));
    let mut handles = Vec::with_capacity(spec.branch_heads.len());

    for branch_head in &spec.branch_heads {
        let ctx = ctx.clone();
        let branch_state = tracker.state.clone();
        let join = spec.join_node.clone();
        let branch_head = branch_head.clone();
        let sink = sink.cloned();
        let semaphore = semaphore.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let mut branch_tracker = Tracker {
                state: branch_state,
                visited: Vec::new(),
                errors: Vec::new(),
                signals: Vec::new(),
                step_count: 0,
            };
            let outcome = run_until(&ctx, &mut branch_tracker, branch_head.clone(), Some(&join), sink.as_ref()).await;
            (branch_head, outcome, branch_tracker)
        }));
    }

    let mut branch_states: HashMap<NodeId, State> = HashMap::new();
    let mut any_failed = false;

    for handle in handles {
        let (branch_id, outcome, branch_tracker) = handle
            .await
            .map_err(|e| GraphError::Custom(format!("parallel branch task panicked: {e}")))?;
        tracker.visited.extend(branch_tracker.visited);
        tracker.errors.extend(branch_tracker.errors);
        tracker.signals.extend(branch_tracker.signals);
        tracker.step_count += branch_tracker.step_count;

        match outcome {
            Ok(RunOutcome::ReachedJoin) => {
                branch_states.insert(branch_id, branch_tracker.state);
            }
            Ok(RunOutcome::Terminal(ExecutionStatus::Completed)) => {
                branch_states.insert(branch_id, branch_tracker.state);
            }
            Ok(RunOutcome::Terminal(_)) => any_failed = true,
            Err(err) => {
                tracker.errors.push(ExecutionErrorEntry {
                    node_id: branch_id,
                    error: err.to_string(),
                    timestamp: chrono::Utc::now(),
                    attempt: 0,
                });
                any_failed = true;
            }
        }
    }

    if any_failed {
        return Ok(StepNext::Terminal(ExecutionStatus::Failed));
    }

    let delta = (spec.output_mapper)(&branch_states)?;
    tracker.state = ctx
        .graph
        .schema
        .merge(&tracker.state, &delta)
        .map_err(|e| GraphError::Validation(format!("parallel merge failed: {e}")))?;

    Ok(StepNext::Node(spec.join_node.clone()))
}

async fn checkpoint(ctx: &RunContext, tracker: &Tracker, label: &str) -> Result<()> {
    if let Some(checkpointer) = &ctx.graph.config.checkpointer {
        checkpointer
            .save(&ctx.execution_id, tracker.state.to_value(), Some(label.to_string()))
            .await
            .map_err(|e| GraphError::Checkpoint(e.to_string()))?;
    }
    Ok(())
}

/// `node.model` unless `"inherit"`, else the parent context's model, else
/// the graph's `defaultModel`, else `"unknown"`.
fn resolve_model(ctx: &RunContext, node: &NodeDefinition) -> String {
    match &node.model {
        Some(model) if model != "inherit" => model.clone(),
        _ => ctx
            .parent_model
            .clone()
            .unwrap_or_else(|| ctx.graph.config.default_model.clone()),
    }
}

/// Sleeps for `delay`, bailing out early (returning `false`) if the abort
/// signal fires first. A zero delay returns `true` immediately without
/// yielding, matching `RetryPolicy::delay_for`'s "attempt 1 never waits".
async fn sleep_or_cancel(delay: Duration, abort: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !abort.is_cancelled();
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => !abort.is_cancelled(),
        _ = abort.cancelled() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use crate::node::{ExecutionContext as Ctx, NodeDefinition, NodeKind};
    use crate::retry::RetryPolicy;
    use crate::state::{reducers, Annotation, StateSchema};
    use futures::future::BoxFuture;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn schema_with_counter() -> StateSchema {
        let mut schema = StateSchema::new();
        schema.field("counter", Annotation::new(json!(0)).with_reducer(reducers::sum()));
        schema
    }

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

    // S1 — linear chain.
    #[tokio::test]
    async fn linear_chain_merges_both_nodes_outputs() {
        let graph = GraphBuilder::new(schema_with_counter())
            .node(set_fields("a", json!({"counter": 1, "outputs": {"a": "x"}})))
            .node(set_fields("b", json!({"counter": 1, "outputs": {"b": "y"}})))
            .start("a")
            .edge("a", "b")
            .end("b")
            .compile()
            .unwrap();

        let executor = GraphExecutor::new(Arc::new(graph));
        let result = executor.execute(ExecutionOptions::default()).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.state.fields["counter"], json!(2.0));
        assert_eq!(result.state.outputs["a"], json!("x"));
        assert_eq!(result.state.outputs["b"], json!("y"));
        assert_eq!(result.snapshot.visited_nodes, vec!["a".to_string(), "b".to_string()]);
    }

    // S2 — if/else.
    #[tokio::test]
    async fn if_else_picks_matching_branch() {
        let mut schema = StateSchema::new();
        schema.field("messages", Annotation::with_factory(|| json!([])).with_reducer(reducers::concat()));

        let cond: Arc<dyn Fn(&State) -> bool + Send + Sync> =
            Arc::new(|state: &State| state.fields.get("flag").and_then(|v| v.as_bool()).unwrap_or(false));

        let graph = GraphBuilder::new(schema)
            .node(set_fields("start", json!({"flag": true})))
            .node(set_fields("decision", json!({})))
            .node(set_fields("if_true", json!({"messages": ["if-branch"]})))
            .node(set_fields("if_false", json!({"messages": ["else-branch"]})))
            .node(set_fields("end", json!({"messages": ["end"]})))
            .start("start")
            .edge("start", "decision")
            .conditional_edge("decision", "if_true", "if-true", cond.clone())
            .conditional_edge("decision", "if_false", "if-false", Arc::new(move |s: &State| !cond(s)))
            .edge("if_true", "end")
            .edge("if_false", "end")
            .end("end")
            .compile()
            .unwrap();

        let executor = GraphExecutor::new(Arc::new(graph));
        let result = executor.execute(ExecutionOptions::default()).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.state.fields["messages"], json!(["if-branch", "end"]));
    }

    // S3 — retry exhaustion.
    #[tokio::test]
    async fn retry_exhaustion_fails_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let node = NodeDefinition::new(
            "always_fails",
            NodeKind::Agent,
            Arc::new(move |_ctx: Ctx| {
                let calls = calls_clone.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(GraphError::Custom("boom".to_string()))
                }) as BoxFuture<'static, Result<NodeResult>>
            }),
        )
        .with_retry(RetryPolicy::new(2).with_backoff(1, 1.0));

        let graph = GraphBuilder::new(StateSchema::new())
            .node(node)
            .start("always_fails")
            .compile()
            .unwrap();

        let executor = GraphExecutor::new(Arc::new(graph));
        let result = executor.execute(ExecutionOptions::default()).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.snapshot.errors.len(), 2);
    }

    // S4 — onError goto to a non-recovery node is rejected.
    #[tokio::test]
    async fn on_error_goto_to_non_recovery_node_fails() {
        let failing = NodeDefinition::new(
            "failing",
            NodeKind::Agent,
            Arc::new(|_ctx: Ctx| {
                Box::pin(async { Err(GraphError::Custom("boom".to_string())) }) as BoxFuture<'static, Result<NodeResult>>
            }),
        )
        .with_retry(RetryPolicy::new(1))
        .with_on_error(Arc::new(|_err: GraphError, _ctx: Ctx| {
            Box::pin(async { ErrorAction::Goto { node_id: "not_recovery".to_string() } })
                as futures::future::BoxFuture<'static, ErrorAction>
        }));

        let graph = GraphBuilder::new(StateSchema::new())
            .node(failing)
            .node(set_fields("not_recovery", json!({})))
            .start("failing")
            .compile()
            .unwrap();

        let executor = GraphExecutor::new(Arc::new(graph));
        let result = executor.execute(ExecutionOptions::default()).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result
            .snapshot
            .errors
            .iter()
            .any(|e| e.error.contains("must set isRecoveryNode: true")));
    }

    // S5 — parallel fan-out, all branches succeed.
    #[tokio::test]
    async fn parallel_fanout_merges_branch_outputs_order_insensitively() {
        let mut schema = StateSchema::new();
        schema.field("counter", Annotation::new(json!(0)).with_reducer(reducers::sum()));

        let mapper: crate::node::OutputMapper = Arc::new(|states: &HashMap<NodeId, State>| {
            let sum: f64 = states
                .values()
                .filter_map(|s| s.fields.get("local").and_then(|v| v.as_f64()))
                .sum();
            Ok(json!({"counter": sum}))
        });

        let graph = GraphBuilder::new(schema)
            .node(set_fields("join", json!({})))
            .node(set_fields("branch_a", json!({"local": 1})))
            .node(set_fields("branch_b", json!({"local": 2})))
            .node(set_fields("branch_c", json!({"local": 3})))
            .start("fanout")
            .parallel(
                "fanout",
                vec!["branch_a".to_string(), "branch_b".to_string(), "branch_c".to_string()],
                "join",
                mapper,
            )
            .end("join")
            .compile()
            .unwrap();

        let executor = GraphExecutor::new(Arc::new(graph));
        let result = executor.execute(ExecutionOptions::default()).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.state.fields["counter"], json!(6.0));
    }

    // Wait / human-input-required pauses rather than failing.
    #[tokio::test]
    async fn human_input_required_signal_pauses_execution() {
        let node = NodeDefinition::new(
            "wait_for_human",
            NodeKind::Wait,
            Arc::new(|_ctx: Ctx| {
                Box::pin(async {
                    Ok(NodeResult::new().with_signal(Signal::HumanInputRequired { payload: json!({"q": "continue?"}) }))
                }) as BoxFuture<'static, Result<NodeResult>>
            }),
        );
        let graph = GraphBuilder::new(StateSchema::new())
            .node(node)
            .start("wait_for_human")
            .compile()
            .unwrap();

        let executor = GraphExecutor::new(Arc::new(graph));
        let result = executor.execute(ExecutionOptions::default()).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Paused);
        assert_eq!(result.snapshot.signals.len(), 1);
    }

    #[tokio::test]
    async fn max_steps_exceeded_fails_with_error_entry() {
        let node = set_fields("loop_forever", json!({}));
        let mut builder = GraphBuilder::new(StateSchema::new()).node(node).start("loop_forever");
        builder = builder.loop_("loop_forever", "loop_forever", "loop_forever", Arc::new(|_s: &State| true));
        let graph = builder.with_max_steps(3).compile().unwrap();

        let executor = GraphExecutor::new(Arc::new(graph));
        let result = executor.execute(ExecutionOptions::default()).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.snapshot.errors.iter().any(|e| e.error.contains("maxSteps")));
    }

    #[tokio::test]
    async fn cancellation_before_start_yields_cancelled_status() {
        let token = CancellationToken::new();
        token.cancel();
        let graph = GraphBuilder::new(StateSchema::new())
            .node(set_fields("a", json!({})))
            .start("a")
            .compile()
            .unwrap();

        let executor = GraphExecutor::new(Arc::new(graph));
        let result = executor
            .execute(ExecutionOptions { abort: Some(token), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Cancelled);
    }
}
