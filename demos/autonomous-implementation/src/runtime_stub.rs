//! A deterministic [`RuntimeDependencies`] stand-in for exercising the
//! workflow without a real model provider behind it.
//!
//! Responses are keyed by `SpawnOptions::agent_id`; an id with no configured
//! response gets a canned success echoing its task. This is the shape a real
//! `agentgraph_sdk::Runtime` fills in with an actual `ClientProvider` and
//! `SubagentBridge` — the demo only needs enough of `RuntimeDependencies` to
//! drive the graph deterministically in tests and docs.

use agentgraph_core::graph::CompiledGraph;
use agentgraph_core::node::{RuntimeDependencies, SpawnOptions, SpawnResult};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub enum CannedResponse {
    Success { output: String, tool_uses: u32 },
    Failure { message: String },
}

#[derive(Default)]
pub struct StaticRuntime {
    responses: HashMap<String, CannedResponse>,
}

impl StaticRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, agent_id: impl Into<String>, response: CannedResponse) -> Self {
        self.responses.insert(agent_id.into(), response);
        self
    }

    fn resolve(&self, opts: &SpawnOptions) -> SpawnResult {
        match self.responses.get(&opts.agent_id) {
            Some(CannedResponse::Success { output, tool_uses }) => SpawnResult {
                agent_id: opts.agent_id.clone(),
                success: true,
                output: output.clone(),
                error: None,
                tool_uses: *tool_uses,
                duration_ms: 0,
            },
            Some(CannedResponse::Failure { message }) => SpawnResult {
                agent_id: opts.agent_id.clone(),
                success: false,
                output: String::new(),
                error: Some(message.clone()),
                tool_uses: 0,
                duration_ms: 0,
            },
            None => SpawnResult {
                agent_id: opts.agent_id.clone(),
                success: true,
                output: format!("done: {}", opts.task),
                error: None,
                tool_uses: 0,
                duration_ms: 0,
            },
        }
    }
}

impl RuntimeDependencies for StaticRuntime {
    fn client_provider(&self, _agent_type: &str) -> Option<Arc<dyn std::any::Any + Send + Sync>> {
        None
    }

    fn workflow_resolver(&self, _name: &str) -> Option<Arc<CompiledGraph>> {
        None
    }

    fn spawn_subagent(&self, opts: SpawnOptions, _abort: CancellationToken) -> BoxFuture<'static, SpawnResult> {
        let result = self.resolve(&opts);
        Box::pin(async move { result })
    }

    fn spawn_subagent_parallel(&self, opts: Vec<SpawnOptions>, _abort: CancellationToken) -> BoxFuture<'static, Vec<SpawnResult>> {
        let results: Vec<SpawnResult> = opts.iter().map(|o| self.resolve(o)).collect();
        Box::pin(async move { results })
    }
}
