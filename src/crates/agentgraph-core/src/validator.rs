//! JSON Schema validation at graph and node boundaries.
//!
//! Full validation requires the `json-validation` feature (pulls in
//! [`jsonschema`]). Without it, [`StateValidator`] only checks that the value
//! being validated is a JSON object and logs that schema checking was
//! skipped — callers that need enforcement in production should enable the
//! feature.

use crate::error::GraphError;
use serde_json::Value;

/// Validates state against a node's `input_schema`/`output_schema` or the
/// graph's top-level `output_schema`.
pub struct StateValidator;

impl StateValidator {
    /// `"Node \"<id>\" input validation failed: <path>: <message>; ..."`
    pub fn validate_node_input(node_id: &str, schema: &Value, state: &Value) -> Result<(), GraphError> {
        Self::validate(state, schema)
            .map_err(|messages| GraphError::StateValidation(format!(
                "Node \"{node_id}\" input validation failed: {}",
                messages.join("; ")
            )))
    }

    /// `"Node \"<id>\" output validation failed: <path>: <message>; ..."`
    pub fn validate_node_output(node_id: &str, schema: &Value, state: &Value) -> Result<(), GraphError> {
        Self::validate(state, schema)
            .map_err(|messages| GraphError::StateValidation(format!(
                "Node \"{node_id}\" output validation failed: {}",
                messages.join("; ")
            )))
    }

    /// `"State validation failed: <path>: <message>; ..."`
    pub fn validate_graph_output(schema: &Value, state: &Value) -> Result<(), GraphError> {
        Self::validate(state, schema)
            .map_err(|messages| GraphError::StateValidation(format!(
                "State validation failed: {}",
                messages.join("; ")
            )))
    }

    #[cfg(feature = "json-validation")]
    fn validate(state: &Value, schema: &Value) -> Result<(), Vec<String>> {
        use jsonschema::JSONSchema;

        let compiled = JSONSchema::compile(schema)
            .map_err(|e| vec![format!("<schema>: invalid schema: {e}")])?;

        let messages: Vec<String> = match compiled.validate(state) {
            Ok(()) => return Ok(()),
            Err(errors) => errors
                .map(|e| format!("{}: {}", e.instance_path, e))
                .collect(),
        };
        Err(messages)
    }

    #[cfg(not(feature = "json-validation"))]
    fn validate(state: &Value, _schema: &Value) -> Result<(), Vec<String>> {
        if !state.is_object() {
            return Err(vec!["<root>: expected an object".to_string()]);
        }
        tracing::warn!(
            "schema validation skipped (enable the `json-validation` feature for full enforcement)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[cfg(feature = "json-validation")]
    #[test]
    fn node_input_failure_names_the_node_and_path() {
        let schema = json!({
            "type": "object",
            "required": ["taskId"],
            "properties": {"taskId": {"type": "string"}}
        });
        let err = StateValidator::validate_node_input("plan", &schema, &json!({})).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Node \"plan\" input validation failed"));
    }

    #[cfg(feature = "json-validation")]
    #[test]
    fn valid_state_passes() {
        let schema = json!({"type": "object"});
        assert!(StateValidator::validate_node_input("plan", &schema, &json!({})).is_ok());
    }

    #[cfg(not(feature = "json-validation"))]
    #[test]
    fn without_feature_only_checks_object_shape() {
        let schema = json!({"type": "object"});
        assert!(StateValidator::validate_node_input("plan", &schema, &json!({})).is_ok());
        assert!(StateValidator::validate_node_input("plan", &schema, &json!(42)).is_err());
    }
}
