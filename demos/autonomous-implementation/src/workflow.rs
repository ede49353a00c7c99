//! The three-phase workflow itself: a planner fans a goal out across a fixed
//! worker pool, a reviewer inspects the merged results, and a fixer loop
//! runs while the reviewer finds issues and `fix_attempts` hasn't hit
//! `max_fix_attempts`.
//!
//! ```text
//! planner -> fanout -+-> worker-1 -+-> review --(approved or out of
//!                    +-> worker-2 -+             attempts)--> (terminal)
//!                    +-> worker-3 -+
//!                                       review --(needs fix)--> fix -> review
//! ```

use agentgraph_core::builder::GraphBuilder;
use agentgraph_core::error::{GraphError, Result};
use agentgraph_core::node::{ExecutionContext, NodeExecutor, NodeResult, SpawnOptions};
use agentgraph_core::graph::CompiledGraph;
use agentgraph_core::state::{reducers, Annotation, StateSchema};
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::sync::Arc;

pub const WORKER_COUNT: usize = 3;
pub const DEFAULT_MAX_FIX_ATTEMPTS: u64 = 2;

fn schema() -> StateSchema {
    let mut schema = StateSchema::new();
    schema.field("goal", Annotation::new(json!("")));
    schema.field("tasks", Annotation::new(json!([])));
    schema.field(
        "worker_results",
        Annotation::new(json!([])).with_reducer(reducers::merge_by_id("agent_id")),
    );
    schema.field("review", Annotation::new(Value::Null));
    schema.field("fix_attempts", Annotation::new(json!(0)).with_reducer(reducers::sum()));
    schema.field("max_fix_attempts", Annotation::new(json!(DEFAULT_MAX_FIX_ATTEMPTS)));
    schema
}

fn worker_id(index: usize) -> String {
    format!("worker-{}", index + 1)
}

fn planner_executor() -> NodeExecutor {
    Arc::new(|ctx: ExecutionContext| {
        Box::pin(async move {
            let goal = ctx.state.get("goal").and_then(Value::as_str).unwrap_or("").to_string();
            let tasks: Vec<Value> = (0..WORKER_COUNT)
                .map(|i| json!(format!("{goal} — part {}/{}", i + 1, WORKER_COUNT)))
                .collect();
            Ok(NodeResult::new().with_update(json!({ "tasks": tasks })))
        })
    })
}

fn worker_executor(index: usize) -> NodeExecutor {
    Arc::new(move |ctx: ExecutionContext| {
        Box::pin(async move {
            let agent_id = worker_id(index);
            let task = ctx
                .state
                .get("tasks")
                .and_then(Value::as_array)
                .and_then(|tasks| tasks.get(index))
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();

            let runtime = ctx
                .runtime
                .clone()
                .ok_or_else(|| GraphError::MissingRuntimeDependency("sub-agent runtime".to_string()))?;

            let spawned = runtime
                .spawn_subagent(SpawnOptions::new(agent_id.clone(), "worker", task.clone()), ctx.abort.clone())
                .await;

            let entry = json!({
                "agent_id": agent_id,
                "task": task,
                "output": spawned.output,
                "success": spawned.success,
                "error": spawned.error,
            });
            Ok(NodeResult::new().with_update(json!({ "worker_results": [entry] })))
        })
    })
}

fn review_executor() -> NodeExecutor {
    Arc::new(|ctx: ExecutionContext| {
        Box::pin(async move {
            let results = ctx.state.get("worker_results").and_then(Value::as_array).cloned().unwrap_or_default();
            let issues: Vec<Value> = results
                .iter()
                .filter(|entry| !entry.get("success").and_then(Value::as_bool).unwrap_or(true))
                .map(|entry| json!({ "agent_id": entry.get("agent_id"), "error": entry.get("error") }))
                .collect();
            let approved = issues.is_empty();
            Ok(NodeResult::new().with_update(json!({ "review": { "approved": approved, "issues": issues } })))
        })
    })
}

fn fix_executor() -> NodeExecutor {
    Arc::new(|ctx: ExecutionContext| {
        Box::pin(async move {
            let results = ctx.state.get("worker_results").and_then(Value::as_array).cloned().unwrap_or_default();
            let failing: Vec<Value> = results
                .into_iter()
                .filter(|entry| !entry.get("success").and_then(Value::as_bool).unwrap_or(true))
                .collect();

            if failing.is_empty() {
                return Ok(NodeResult::new().with_update(json!({ "fix_attempts": 1 })));
            }

            let runtime = ctx
                .runtime
                .clone()
                .ok_or_else(|| GraphError::MissingRuntimeDependency("sub-agent runtime".to_string()))?;

            let issue_summary = failing
                .iter()
                .filter_map(|entry| entry.get("agent_id").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join(", ");
            let spawned = runtime
                .spawn_subagent(
                    SpawnOptions::new("fixer", "fixer", format!("address failures from: {issue_summary}")),
                    ctx.abort.clone(),
                )
                .await;

            let fixed: Vec<Value> = failing
                .into_iter()
                .map(|entry| {
                    json!({
                        "agent_id": entry.get("agent_id"),
                        "task": entry.get("task"),
                        "output": spawned.output,
                        "success": spawned.success,
                        "error": spawned.error,
                    })
                })
                .collect();

            Ok(NodeResult::new().with_update(json!({ "worker_results": fixed, "fix_attempts": 1 })))
        })
    })
}

/// Builds the compiled graph. Callers inject a [`crate::runtime_stub::StaticRuntime`]
/// (or a real `agentgraph_sdk::Runtime`) via `GraphBuilder::with_runtime`, so
/// this function takes none itself.
pub fn build_graph() -> Result<CompiledGraph> {
    let mut builder = GraphBuilder::new(schema())
        .agent("planner", planner_executor())
        .agent("review", review_executor())
        .agent("fix", fix_executor())
        .start("planner")
        .edge("planner", "fanout");

    for i in 0..WORKER_COUNT {
        builder = builder.agent(worker_id(i), worker_executor(i)).edge(worker_id(i), "review");
    }

    let branch_heads: Vec<String> = (0..WORKER_COUNT).map(worker_id).collect();
    builder = builder.parallel("fanout", branch_heads, "review", Arc::new(|branch_states| {
        let mut merged = Vec::new();
        for state in branch_states.values() {
            if let Some(entries) = state.get("worker_results").and_then(Value::as_array) {
                merged.extend(entries.iter().cloned());
            }
        }
        Ok(json!({ "worker_results": merged }))
    }));

    builder = builder
        .conditional_edge(
            "review",
            "fix",
            "needs-fix",
            Arc::new(|state| {
                let approved = state
                    .get("review")
                    .and_then(|review| review.get("approved"))
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                let attempts = state.get("fix_attempts").and_then(Value::as_f64).unwrap_or(0.0);
                let max_attempts = state.get("max_fix_attempts").and_then(Value::as_f64).unwrap_or(0.0);
                !approved && attempts < max_attempts
            }),
        )
        .end("review")
        .edge("fix", "review");

    builder.with_default_model("demo/stub-model").with_max_steps(50).compile()
}
