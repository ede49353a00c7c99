//! Environment-driven defaults for [`crate::runtime::RuntimeConfig`].
//!
//! `agentgraph-core` never reads the environment itself — checkpoint root,
//! default model, and `max_steps` overrides belong to the facade, not the
//! engine. This wraps `tooling::config::ConfigBuilder` the way the teacher's
//! own service configs do: a prefixed `from_env`, a `merge` that lets
//! programmatic settings win over env-sourced ones, and `validate` for the
//! handful of constraints that aren't just "parse the string".

use tooling::config::{get_env_bool, get_env_or, get_env_parse, ConfigBuilder};
use tooling::{Result as ToolingResult, ToolingError};

/// Settings `RuntimeBuilder::with_env_defaults` folds into a
/// [`crate::runtime::RuntimeConfig`]. Every field is optional: an unset one
/// leaves the runtime's own default (or the compiled graph's) untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    pub default_model: Option<String>,
    pub max_steps: Option<u64>,
    pub validate_schemas: Option<bool>,
    pub subagent_provider: Option<String>,
    /// Root directory a file-based `Checkpointer` should use, e.g.
    /// `AGENTGRAPH_CHECKPOINT_DIR`. Not itself a `Checkpointer` — callers
    /// still construct `agentgraph_checkpoint::FileCheckpointer::new(dir)`.
    pub checkpoint_dir: Option<String>,
}

impl ConfigBuilder for EngineConfig {
    fn validate(&self) -> ToolingResult<()> {
        if let Some(max_steps) = self.max_steps {
            if max_steps == 0 {
                return Err(ToolingError::General("max_steps must be non-zero".to_string()));
            }
        }
        Ok(())
    }

    fn from_env(prefix: &str) -> ToolingResult<Self> {
        let max_steps: Option<u64> = get_env_parse(&format!("{prefix}MAX_STEPS"))?;
        let validate_schemas = get_env_bool(&format!("{prefix}VALIDATE_SCHEMAS"))?;
        let default_model = get_env_or(&format!("{prefix}DEFAULT_MODEL"), "").ok().filter(|s| !s.is_empty());
        let subagent_provider =
            get_env_or(&format!("{prefix}SUBAGENT_PROVIDER"), "").ok().filter(|s| !s.is_empty());
        let checkpoint_dir =
            get_env_or(&format!("{prefix}CHECKPOINT_DIR"), "").ok().filter(|s| !s.is_empty());

        Ok(Self {
            default_model,
            max_steps,
            validate_schemas,
            subagent_provider,
            checkpoint_dir,
        })
    }

    fn merge(&mut self, other: Self) -> &mut Self {
        if other.default_model.is_some() {
            self.default_model = other.default_model;
        }
        if other.max_steps.is_some() {
            self.max_steps = other.max_steps;
        }
        if other.validate_schemas.is_some() {
            self.validate_schemas = other.validate_schemas;
        }
        if other.subagent_provider.is_some() {
            self.subagent_provider = other.subagent_provider;
        }
        if other.checkpoint_dir.is_some() {
            self.checkpoint_dir = other.checkpoint_dir;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // `std::env` is process-global; serialize the handful of tests that
    // mutate it so they can't interleave.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn from_env_reads_prefixed_variables() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("AGENTGRAPH_TEST_MAX_STEPS", "250");
        env::set_var("AGENTGRAPH_TEST_DEFAULT_MODEL", "anthropic/claude-sonnet");
        env::set_var("AGENTGRAPH_TEST_VALIDATE_SCHEMAS", "false");

        let config = EngineConfig::from_env("AGENTGRAPH_TEST_").unwrap();

        assert_eq!(config.max_steps, Some(250));
        assert_eq!(config.default_model.as_deref(), Some("anthropic/claude-sonnet"));
        assert_eq!(config.validate_schemas, Some(false));

        env::remove_var("AGENTGRAPH_TEST_MAX_STEPS");
        env::remove_var("AGENTGRAPH_TEST_DEFAULT_MODEL");
        env::remove_var("AGENTGRAPH_TEST_VALIDATE_SCHEMAS");
    }

    #[test]
    fn from_env_with_no_variables_set_is_all_none() {
        let _guard = ENV_LOCK.lock().unwrap();
        let config = EngineConfig::from_env("AGENTGRAPH_UNSET_PREFIX_").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn merge_prefers_other_when_present() {
        let mut base = EngineConfig { max_steps: Some(10), ..Default::default() };
        let override_config = EngineConfig { max_steps: Some(20), default_model: Some("m".to_string()), ..Default::default() };
        base.merge(override_config);
        assert_eq!(base.max_steps, Some(20));
        assert_eq!(base.default_model.as_deref(), Some("m"));
    }

    #[test]
    fn validate_rejects_zero_max_steps() {
        let config = EngineConfig { max_steps: Some(0), ..Default::default() };
        assert!(config.validate().is_err());
    }
}
