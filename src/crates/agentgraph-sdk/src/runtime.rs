//! The runtime facade (C8): a provider registry, the sub-agent bridge, a
//! workflow resolver for nested graphs, and the `execute`/`stream` entry
//! points a host application actually calls. `Runtime` is the one concrete
//! implementation of [`agentgraph_core::node::RuntimeDependencies`] this
//! crate ships — everything a node reaches through `ExecutionContext.runtime`
//! ultimately bottoms out here.

use agentgraph_core::error::{GraphError, Result as GraphResult};
use agentgraph_core::executor::{ExecutionOptions, ExecutionResult, GraphExecutor};
use agentgraph_core::graph::{CompiledGraph, GraphConfig};
use agentgraph_core::node::{RuntimeDependencies, SpawnOptions, SpawnResult, SubagentMetadata};
use futures::future::BoxFuture;
use futures::stream::Stream;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SdkError};
use crate::subagent::SubagentBridge;

/// One exchange with a provider session: either accumulated text or a tool
/// invocation, per spec §6's message tagging.
#[derive(Debug, Clone)]
pub enum ProviderMessage {
    Text { content: String },
    ToolUse { name: String, input: serde_json::Value },
}

/// Token accounting for a provider session, used to drive
/// `ContextWindowWarning` signals.
#[derive(Debug, Clone, Copy)]
pub struct ContextUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub max_tokens: u64,
}

impl ContextUsage {
    pub fn usage_percentage(&self) -> f64 {
        if self.max_tokens == 0 {
            return 0.0;
        }
        (self.input_tokens + self.output_tokens) as f64 / self.max_tokens as f64 * 100.0
    }
}

/// A live conversation with a model, created by a [`ClientProvider`]. Kept
/// deliberately thin — this crate defines the seam, not a transport.
pub trait ProviderSession: Send + Sync {
    fn send(&self, message: String) -> BoxFuture<'static, Result<ProviderMessage>>;
    fn stream(&self, message: String) -> BoxFuture<'static, Result<Box<dyn Stream<Item = ProviderMessage> + Send + Unpin>>>;
    fn summarize(&self) -> BoxFuture<'static, Result<String>>;
    fn get_context_usage(&self) -> BoxFuture<'static, Result<ContextUsage>>;
    fn destroy(&self) -> BoxFuture<'static, ()>;
}

/// A named model backend: creates sessions, reports which models it serves.
/// Nodes never see this trait directly — they go through
/// `ExecutionContext.runtime.client_provider(agent_type)`, which hands back
/// a type-erased `Arc<dyn Any>` a caller downcasts via [`downcast_provider`].
pub trait ClientProvider: Send + Sync {
    fn name(&self) -> &str;
    fn create_session(&self, config: serde_json::Value) -> Result<Arc<dyn ProviderSession>>;
    fn supported_models(&self) -> Vec<String>;
}

/// Downcasts the type-erased handle `RuntimeDependencies::client_provider`
/// returns back into a concrete `Arc<dyn ClientProvider>`.
pub fn downcast_provider(erased: Arc<dyn Any + Send + Sync>) -> Option<Arc<dyn ClientProvider>> {
    erased.downcast::<Arc<dyn ClientProvider>>().ok().map(|b| (*b).clone())
}

/// Resolves providers by name, with no ordering guarantee beyond
/// registration order (used as the last-resort pick in
/// [`Runtime::pick_subagent_provider`]).
#[derive(Default)]
pub struct ProviderRegistry {
    order: Vec<String>,
    providers: HashMap<String, Arc<dyn ClientProvider>>,
}

impl ProviderRegistry {
    pub fn register(&mut self, provider: Arc<dyn ClientProvider>) {
        let name = provider.name().to_string();
        if !self.providers.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.providers.insert(name, provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ClientProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn first(&self) -> Option<Arc<dyn ClientProvider>> {
        self.order.first().and_then(|name| self.providers.get(name)).cloned()
    }
}

/// Graph-agnostic defaults the facade fills in when a compiled graph's own
/// [`GraphConfig`] leaves them unset.
#[derive(Clone, Default)]
pub struct RuntimeConfig {
    pub default_model: Option<String>,
    pub checkpointer: Option<Arc<dyn agentgraph_checkpoint::Checkpointer>>,
    pub max_steps: Option<u64>,
    pub validate_schemas: Option<bool>,
    /// Explicit provider name to use for sub-agent spawns. When unset, the
    /// facade tries the `provider/` prefix of `default_model`, then falls
    /// back to the first registered provider.
    pub subagent_provider: Option<String>,
}

pub struct Runtime {
    providers: ProviderRegistry,
    bridge: Arc<SubagentBridge>,
    subagents: HashMap<String, SubagentMetadata>,
    workflows: HashMap<String, Arc<CompiledGraph>>,
    config: RuntimeConfig,
}

impl Runtime {
    pub fn builder(bridge: Arc<SubagentBridge>) -> RuntimeBuilder {
        RuntimeBuilder {
            providers: ProviderRegistry::default(),
            bridge,
            subagents: HashMap::new(),
            workflows: HashMap::new(),
            config: RuntimeConfig::default(),
        }
    }

    /// Runs `graph` to completion, injecting this runtime and the facade's
    /// defaults into its config unless the graph already carries its own.
    pub async fn execute(self: &Arc<Self>, graph: Arc<CompiledGraph>, options: ExecutionOptions) -> GraphResult<ExecutionResult> {
        let graph = self.prepare_graph(graph);
        GraphExecutor::new(graph).execute(options).await
    }

    /// Same as [`Self::execute`] but streams `StepEmission`s as the graph
    /// runs.
    pub fn stream(
        self: &Arc<Self>,
        graph: Arc<CompiledGraph>,
        options: ExecutionOptions,
    ) -> GraphResult<impl Stream<Item = agentgraph_core::stream::StepEmission> + Send + 'static> {
        let graph = self.prepare_graph(graph);
        GraphExecutor::new(graph).stream(options)
    }

    /// Returns a copy of `graph` with this runtime and any unset
    /// `RuntimeConfig` defaults applied to its `GraphConfig`. The compiled
    /// graph's nodes/edges/schema are shared (`Arc`), only the config is
    /// cloned and amended.
    fn prepare_graph(self: &Arc<Self>, graph: Arc<CompiledGraph>) -> Arc<CompiledGraph> {
        let mut config: GraphConfig = (*graph.config).clone();
        if config.runtime.is_none() {
            config.runtime = Some(self.clone() as Arc<dyn RuntimeDependencies>);
        }
        if let Some(model) = &self.config.default_model {
            if config.default_model == GraphConfig::default().default_model {
                config.default_model = model.clone();
            }
        }
        if config.checkpointer.is_none() {
            config.checkpointer = self.config.checkpointer.clone();
        }
        if let Some(max_steps) = self.config.max_steps {
            if config.max_steps == GraphConfig::default().max_steps {
                config.max_steps = max_steps;
            }
        }
        if let Some(validate) = self.config.validate_schemas {
            config.validate_schemas = validate;
        }

        let mut graph = (*graph).clone();
        graph.config = Arc::new(config);
        Arc::new(graph)
    }

    /// Picks which registered provider a bare sub-agent spawn (one with no
    /// explicit model) should use: the configured `subagent_provider`, else
    /// the `provider/` prefix of `default_model`, else the first registered
    /// provider.
    fn pick_subagent_provider(&self) -> Result<Arc<dyn ClientProvider>> {
        if let Some(name) = &self.config.subagent_provider {
            return self
                .providers
                .get(name)
                .ok_or_else(|| SdkError::UnknownProvider(name.clone()));
        }
        if let Some(model) = &self.config.default_model {
            if let Some((prefix, _)) = model.split_once('/') {
                if let Some(provider) = self.providers.get(prefix) {
                    return Ok(provider);
                }
            }
        }
        self.providers
            .first()
            .ok_or_else(|| SdkError::UnknownProvider("<none registered>".to_string()))
    }
}

impl RuntimeDependencies for Runtime {
    fn client_provider(&self, agent_type: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.providers
            .get(agent_type)
            .map(|provider| Arc::new(provider) as Arc<dyn Any + Send + Sync>)
    }

    fn workflow_resolver(&self, name: &str) -> Option<Arc<CompiledGraph>> {
        self.workflows.get(name).cloned()
    }

    fn spawn_subagent(&self, opts: SpawnOptions, abort: CancellationToken) -> BoxFuture<'static, SpawnResult> {
        let bridge = self.bridge.clone();
        Box::pin(async move { bridge.spawn(opts, Some(abort)).await })
    }

    fn spawn_subagent_parallel(&self, opts: Vec<SpawnOptions>, abort: CancellationToken) -> BoxFuture<'static, Vec<SpawnResult>> {
        let bridge = self.bridge.clone();
        Box::pin(async move { bridge.spawn_parallel(opts, Some(abort)).await })
    }

    fn subagent_registry_get(&self, name: &str) -> Option<SubagentMetadata> {
        self.subagents.get(name).cloned()
    }

    fn subagent_registry_get_all(&self) -> Vec<SubagentMetadata> {
        self.subagents.values().cloned().collect()
    }

    fn notify_task_status_change(&self, task_ids: &[String], new_status: &str, snapshot: &serde_json::Value) {
        tracing::debug!(?task_ids, new_status, %snapshot, "task status changed");
    }
}

pub struct RuntimeBuilder {
    providers: ProviderRegistry,
    bridge: Arc<SubagentBridge>,
    subagents: HashMap<String, SubagentMetadata>,
    workflows: HashMap<String, Arc<CompiledGraph>>,
    config: RuntimeConfig,
}

impl RuntimeBuilder {
    pub fn with_provider(mut self, provider: Arc<dyn ClientProvider>) -> Self {
        self.providers.register(provider);
        self
    }

    pub fn with_subagent(mut self, metadata: SubagentMetadata) -> Self {
        self.subagents.insert(metadata.name.clone(), metadata);
        self
    }

    pub fn with_workflow(mut self, name: impl Into<String>, graph: Arc<CompiledGraph>) -> Self {
        self.workflows.insert(name.into(), graph);
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.config.default_model = Some(model.into());
        self
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn agentgraph_checkpoint::Checkpointer>) -> Self {
        self.config.checkpointer = Some(checkpointer);
        self
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.config.max_steps = Some(max_steps);
        self
    }

    pub fn with_subagent_provider(mut self, name: impl Into<String>) -> Self {
        self.config.subagent_provider = Some(name.into());
        self
    }

    /// Folds `crate::config::EngineConfig::from_env(prefix)` into this
    /// builder's defaults, letting explicit `with_*` calls made before or
    /// after this one win — this only fills in fields still unset.
    pub fn with_env_defaults(mut self, prefix: &str) -> agentgraph_core::error::Result<Self> {
        use tooling::config::ConfigBuilder;
        let env_config = crate::config::EngineConfig::from_env(prefix)
            .map_err(|e| agentgraph_core::error::GraphError::Configuration(e.to_string()))?;
        if self.config.default_model.is_none() {
            self.config.default_model = env_config.default_model;
        }
        if self.config.max_steps.is_none() {
            self.config.max_steps = env_config.max_steps;
        }
        if self.config.validate_schemas.is_none() {
            self.config.validate_schemas = env_config.validate_schemas;
        }
        if self.config.subagent_provider.is_none() {
            self.config.subagent_provider = env_config.subagent_provider;
        }
        Ok(self)
    }

    pub fn build(self) -> Arc<Runtime> {
        Arc::new(Runtime {
            providers: self.providers,
            bridge: self.bridge,
            subagents: self.subagents,
            workflows: self.workflows,
            config: self.config,
        })
    }
}

impl From<GraphError> for SdkError {
    fn from(err: GraphError) -> Self {
        SdkError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProvider {
        name: String,
        models: Vec<String>,
    }

    impl ClientProvider for FakeProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn create_session(&self, _config: serde_json::Value) -> Result<Arc<dyn ProviderSession>> {
            Err(SdkError::SessionCreation("not implemented in test double".to_string()))
        }

        fn supported_models(&self) -> Vec<String> {
            self.models.clone()
        }
    }

    fn bridge() -> Arc<SubagentBridge> {
        struct NoopFactory;
        impl crate::subagent::SessionFactory for NoopFactory {
            fn create(&self, _opts: &SpawnOptions) -> BoxFuture<'static, Result<Arc<dyn crate::subagent::SpawnedSession>>> {
                Box::pin(async { Err(SdkError::SessionCreation("unused in this test".to_string())) })
            }
        }
        Arc::new(SubagentBridge::new(Arc::new(NoopFactory)))
    }

    #[test]
    fn pick_subagent_provider_prefers_explicit_setting() {
        let runtime = Runtime::builder(bridge())
            .with_provider(Arc::new(FakeProvider { name: "anthropic".into(), models: vec![] }))
            .with_provider(Arc::new(FakeProvider { name: "openai".into(), models: vec![] }))
            .with_subagent_provider("openai")
            .build();
        let picked = runtime.pick_subagent_provider().unwrap();
        assert_eq!(picked.name(), "openai");
    }

    #[test]
    fn pick_subagent_provider_falls_back_to_default_model_prefix() {
        let runtime = Runtime::builder(bridge())
            .with_provider(Arc::new(FakeProvider { name: "anthropic".into(), models: vec![] }))
            .with_default_model("anthropic/claude-sonnet")
            .build();
        let picked = runtime.pick_subagent_provider().unwrap();
        assert_eq!(picked.name(), "anthropic");
    }

    #[test]
    fn pick_subagent_provider_falls_back_to_first_registered() {
        let runtime = Runtime::builder(bridge())
            .with_provider(Arc::new(FakeProvider { name: "only".into(), models: vec![] }))
            .build();
        let picked = runtime.pick_subagent_provider().unwrap();
        assert_eq!(picked.name(), "only");
    }

    #[test]
    fn pick_subagent_provider_errors_when_none_registered() {
        let runtime = Runtime::builder(bridge()).build();
        assert!(runtime.pick_subagent_provider().is_err());
    }
}
