//! Typed state with per-field reducers.
//!
//! State is represented as a JSON object (`serde_json::Value::Object`) with
//! three always-present fields — `executionId`, `lastUpdated`, `outputs` —
//! plus whatever domain fields a workflow author adds. Every field has an
//! [`Annotation`]: a default value and a [`Reducer`] describing how a partial
//! update merges into the current value. Fields outside the declared
//! [`StateSchema`] fall back to replace semantics.
//!
//! ```
//! use agentgraph_core::state::{StateSchema, Annotation, reducers};
//! use serde_json::json;
//!
//! let mut schema = StateSchema::new();
//! schema.field("messages", Annotation::new(json!([])).with_reducer(reducers::concat()));
//! schema.field("counter", Annotation::new(json!(0)).with_reducer(reducers::sum()));
//!
//! let base = schema.initial_state("exec-1");
//! let delta = json!({"messages": ["hello"], "counter": 1});
//! let merged = schema.merge(&base, &delta).unwrap();
//! assert_eq!(merged.fields["counter"], json!(1));
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Error raised while merging or validating state. Kept separate from
/// [`crate::error::GraphError`] so reducers stay independent of the executor.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StateError {
    #[error("reducer error on field '{field}': {message}")]
    Reducer { field: String, message: String },
    #[error("state is not a JSON object")]
    NotAnObject,
}

/// A pure binary merge function for a single state field.
///
/// Implementations must be deterministic: merging the same `update` into the
/// same `current` twice must yield the same result, and reducers must not
/// observe fields other than the one they are registered for.
pub trait Reducer: Send + Sync {
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value, StateError>;
}

impl<F> Reducer for F
where
    F: Fn(&Value, &Value) -> Result<Value, StateError> + Send + Sync,
{
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value, StateError> {
        self(current, update)
    }
}

/// Built-in reducers: `replace`, `concat`, `merge`,
/// `merge_by_id`, `max`, `min`, `sum`, `or`, `and`, `if_defined`.
pub mod reducers {
    use super::*;

    struct Replace;
    impl Reducer for Replace {
        fn reduce(&self, _current: &Value, update: &Value) -> Result<Value, StateError> {
            Ok(update.clone())
        }
    }

    /// Last write wins. The default reducer for any field without an
    /// explicit annotation.
    pub fn replace() -> Arc<dyn Reducer> {
        Arc::new(Replace)
    }

    struct Concat;
    impl Reducer for Concat {
        fn reduce(&self, current: &Value, update: &Value) -> Result<Value, StateError> {
            let mut out = current.as_array().cloned().unwrap_or_default();
            match update {
                Value::Array(items) => out.extend(items.iter().cloned()),
                Value::Null => {}
                other => out.push(other.clone()),
            }
            Ok(Value::Array(out))
        }
    }

    /// Concatenates arrays; a non-array update is appended as a single item.
    pub fn concat() -> Arc<dyn Reducer> {
        Arc::new(Concat)
    }

    struct Merge;
    impl Reducer for Merge {
        fn reduce(&self, current: &Value, update: &Value) -> Result<Value, StateError> {
            let mut base = current.as_object().cloned().unwrap_or_default();
            let patch = update
                .as_object()
                .ok_or(StateError::NotAnObject)?;
            for (k, v) in patch {
                base.insert(k.clone(), v.clone());
            }
            Ok(Value::Object(base))
        }
    }

    /// Shallow object merge: keys in `update` overwrite matching keys in
    /// `current`, others are preserved.
    pub fn merge() -> Arc<dyn Reducer> {
        Arc::new(Merge)
    }

    struct MergeById {
        id_field: String,
    }
    impl Reducer for MergeById {
        fn reduce(&self, current: &Value, update: &Value) -> Result<Value, StateError> {
            let mut items: Vec<Value> = current.as_array().cloned().unwrap_or_default();
            let updates = match update {
                Value::Array(items) => items.clone(),
                Value::Null => Vec::new(),
                other => vec![other.clone()],
            };
            for incoming in updates {
                let incoming_id = incoming.get(&self.id_field).cloned();
                let existing = incoming_id.as_ref().and_then(|id| {
                    items
                        .iter()
                        .position(|item| item.get(&self.id_field) == Some(id))
                });
                match existing {
                    Some(idx) => items[idx] = incoming,
                    None => items.push(incoming),
                }
            }
            Ok(Value::Array(items))
        }
    }

    /// Identity-keyed upsert by `id_field`, preserving insertion order of
    /// first appearance.
    pub fn merge_by_id(id_field: impl Into<String>) -> Arc<dyn Reducer> {
        Arc::new(MergeById {
            id_field: id_field.into(),
        })
    }

    fn as_f64(v: &Value) -> f64 {
        v.as_f64().unwrap_or(0.0)
    }

    struct Max;
    impl Reducer for Max {
        fn reduce(&self, current: &Value, update: &Value) -> Result<Value, StateError> {
            Ok(if as_f64(update) > as_f64(current) {
                update.clone()
            } else {
                current.clone()
            })
        }
    }
    pub fn max() -> Arc<dyn Reducer> {
        Arc::new(Max)
    }

    struct Min;
    impl Reducer for Min {
        fn reduce(&self, current: &Value, update: &Value) -> Result<Value, StateError> {
            Ok(if as_f64(update) < as_f64(current) {
                update.clone()
            } else {
                current.clone()
            })
        }
    }
    pub fn min() -> Arc<dyn Reducer> {
        Arc::new(Min)
    }

    struct Sum;
    impl Reducer for Sum {
        fn reduce(&self, current: &Value, update: &Value) -> Result<Value, StateError> {
            Ok(serde_json::json!(as_f64(current) + as_f64(update)))
        }
    }
    /// Adds numeric values. Non-numbers are treated as `0`. Always widens to
    /// `f64` — callers reading a `sum`-reduced field back must use
    /// `Value::as_f64`, not `as_u64`/`as_i64`.
    pub fn sum() -> Arc<dyn Reducer> {
        Arc::new(Sum)
    }

    struct Or;
    impl Reducer for Or {
        fn reduce(&self, current: &Value, update: &Value) -> Result<Value, StateError> {
            let a = current.as_bool().unwrap_or(false);
            let b = update.as_bool().unwrap_or(false);
            Ok(Value::Bool(a || b))
        }
    }
    pub fn or() -> Arc<dyn Reducer> {
        Arc::new(Or)
    }

    struct And;
    impl Reducer for And {
        fn reduce(&self, current: &Value, update: &Value) -> Result<Value, StateError> {
            let a = current.as_bool().unwrap_or(false);
            let b = update.as_bool().unwrap_or(false);
            Ok(Value::Bool(a && b))
        }
    }
    pub fn and() -> Arc<dyn Reducer> {
        Arc::new(And)
    }

    struct IfDefined;
    impl Reducer for IfDefined {
        fn reduce(&self, current: &Value, update: &Value) -> Result<Value, StateError> {
            Ok(if update.is_null() {
                current.clone()
            } else {
                update.clone()
            })
        }
    }
    /// Keeps `current` unless `update` is non-null.
    pub fn if_defined() -> Arc<dyn Reducer> {
        Arc::new(IfDefined)
    }
}

/// Default value plus reducer for one state field.
#[derive(Clone)]
pub struct Annotation {
    default_factory: Arc<dyn Fn() -> Value + Send + Sync>,
    pub reducer: Arc<dyn Reducer>,
}

impl fmt::Debug for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Annotation")
            .field("default", &(self.default_factory)())
            .finish()
    }
}

impl Annotation {
    /// An annotation with a fixed default value and the `replace` reducer.
    pub fn new(default: Value) -> Self {
        Self {
            default_factory: Arc::new(move || default.clone()),
            reducer: reducers::replace(),
        }
    }

    /// An annotation whose default is produced fresh per execution (e.g. a
    /// new empty array per run rather than a shared clone).
    pub fn with_factory(factory: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        Self {
            default_factory: Arc::new(factory),
            reducer: reducers::replace(),
        }
    }

    pub fn with_reducer(mut self, reducer: Arc<dyn Reducer>) -> Self {
        self.reducer = reducer;
        self
    }

    pub fn default_value(&self) -> Value {
        (self.default_factory)()
    }
}

/// Declares, per field, the default value and merge reducer. Fields not
/// registered here use a fixed `replace` reducer with `null` default.
#[derive(Clone, Default)]
pub struct StateSchema {
    fields: HashMap<String, Annotation>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self {
            fields: HashMap::new(),
        }
    }

    pub fn field(&mut self, name: impl Into<String>, annotation: Annotation) -> &mut Self {
        self.fields.insert(name.into(), annotation);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Annotation> {
        self.fields.get(name)
    }

    /// Builds the initial `State` for a new execution: every annotated
    /// field's default, plus the always-present fields.
    pub fn initial_state(&self, execution_id: impl Into<String>) -> State {
        let mut fields = Map::new();
        for (name, annotation) in &self.fields {
            fields.insert(name.clone(), annotation.default_value());
        }
        State {
            execution_id: execution_id.into(),
            last_updated: Utc::now(),
            outputs: Map::new(),
            fields,
        }
    }

    /// Builds the initial state, then merges `initial` into it through
    /// [`StateSchema::merge`] so a caller-supplied partial initial state goes
    /// through the same reducers a mid-execution update would use.
    /// `executionId` inside `initial` is ignored, per `merge`'s own invariant.
    pub fn initial_state_with(
        &self,
        execution_id: impl Into<String>,
        initial: Option<Value>,
    ) -> Result<State, StateError> {
        let base = self.initial_state(execution_id);
        match initial {
            Some(value) if !value.is_null() => self.merge(&base, &value),
            _ => Ok(base),
        }
    }

    /// Applies a partial update to `base` per §4.1: schema-declared fields
    /// use their reducer, unknown fields replace, `outputs` merges
    /// shallowly by node id unless overridden, `executionId` is preserved,
    /// and `lastUpdated` always advances. An empty delta is valid and only
    /// refreshes the timestamp.
    pub fn merge(&self, base: &State, delta: &Value) -> Result<State, StateError> {
        let delta_obj = match delta {
            Value::Null => Map::new(),
            Value::Object(map) => map.clone(),
            _ => return Err(StateError::NotAnObject),
        };

        let mut fields = base.fields.clone();
        let mut outputs = base.outputs.clone();

        for (key, update_value) in &delta_obj {
            if key == "executionId" || key == "lastUpdated" {
                continue;
            }
            if key == "outputs" {
                let has_custom_reducer = self.fields.get("outputs").is_some();
                if has_custom_reducer {
                    let annotation = self.fields.get("outputs").unwrap();
                    let current = Value::Object(outputs.clone());
                    let merged = annotation
                        .reducer
                        .reduce(&current, update_value)
                        .map_err(|e| wrap(key, e))?;
                    outputs = merged.as_object().cloned().unwrap_or_default();
                } else if let Some(patch) = update_value.as_object() {
                    for (k, v) in patch {
                        outputs.insert(k.clone(), v.clone());
                    }
                }
                continue;
            }

            let current = fields.get(key).cloned().unwrap_or(Value::Null);
            let merged = match self.fields.get(key) {
                Some(annotation) => annotation
                    .reducer
                    .reduce(&current, update_value)
                    .map_err(|e| wrap(key, e))?,
                None => update_value.clone(),
            };
            fields.insert(key.clone(), merged);
        }

        Ok(State {
            execution_id: base.execution_id.clone(),
            last_updated: Utc::now(),
            outputs,
            fields,
        })
    }
}

fn wrap(field: &str, err: StateError) -> StateError {
    match err {
        StateError::Reducer { message, .. } => StateError::Reducer {
            field: field.to_string(),
            message,
        },
        other => other,
    }
}

/// The execution's current state: the always-present fields plus whatever
/// domain fields the workflow has written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct State {
    #[serde(rename = "executionId")]
    pub execution_id: String,
    #[serde(rename = "lastUpdated")]
    pub last_updated: chrono::DateTime<Utc>,
    pub outputs: Map<String, Value>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl State {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Renders the state as a single JSON object, with `executionId`,
    /// `lastUpdated`, and `outputs` alongside the domain fields.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("State always serializes to a JSON object")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_delta_only_refreshes_timestamp() {
        let schema = StateSchema::new();
        let base = schema.initial_state("exec-1");
        std::thread::sleep(std::time::Duration::from_millis(2));
        let merged = schema.merge(&base, &json!({})).unwrap();
        assert_eq!(merged.execution_id, "exec-1");
        assert!(merged.last_updated >= base.last_updated);
    }

    #[test]
    fn execution_id_never_overwritten() {
        let schema = StateSchema::new();
        let base = schema.initial_state("exec-1");
        let merged = schema
            .merge(&base, &json!({"executionId": "hijacked"}))
            .unwrap();
        assert_eq!(merged.execution_id, "exec-1");
    }

    #[test]
    fn outputs_merge_shallow_by_default() {
        let schema = StateSchema::new();
        let base = schema.initial_state("exec-1");
        let s1 = schema.merge(&base, &json!({"outputs": {"a": "x"}})).unwrap();
        let s2 = schema.merge(&s1, &json!({"outputs": {"b": "y"}})).unwrap();
        assert_eq!(s2.outputs.get("a").unwrap(), "x");
        assert_eq!(s2.outputs.get("b").unwrap(), "y");
    }

    #[test]
    fn reducer_determinism_concat() {
        let mut schema = StateSchema::new();
        schema.field(
            "messages",
            Annotation::with_factory(|| json!([])).with_reducer(reducers::concat()),
        );
        let base = schema.initial_state("exec-1");
        let delta = json!({"messages": ["a"]});
        let once = schema.merge(&base, &delta).unwrap();
        let twice = schema.merge(&schema.merge(&base, &delta).unwrap(), &Value::Null).unwrap();
        assert_eq!(once.fields["messages"], json!(["a"]));
        assert_eq!(twice.fields["messages"], json!(["a"]));
    }

    #[test]
    fn sum_and_max_reducers() {
        let mut schema = StateSchema::new();
        schema.field("counter", Annotation::new(json!(0)).with_reducer(reducers::sum()));
        schema.field("high", Annotation::new(json!(0)).with_reducer(reducers::max()));
        let base = schema.initial_state("exec-1");
        let merged = schema
            .merge(&base, &json!({"counter": 2, "high": 5}))
            .unwrap();
        let merged = schema
            .merge(&merged, &json!({"counter": 3, "high": 1}))
            .unwrap();
        assert_eq!(merged.fields["counter"], json!(5.0));
        assert_eq!(merged.fields["high"], json!(5.0));
    }

    #[test]
    fn merge_by_id_upserts() {
        let mut schema = StateSchema::new();
        schema.field(
            "tasks",
            Annotation::with_factory(|| json!([])).with_reducer(reducers::merge_by_id("id")),
        );
        let base = schema.initial_state("exec-1");
        let s1 = schema
            .merge(&base, &json!({"tasks": [{"id": 1, "status": "pending"}]}))
            .unwrap();
        let s2 = schema
            .merge(&s1, &json!({"tasks": [{"id": 1, "status": "done"}, {"id": 2, "status": "pending"}]}))
            .unwrap();
        let tasks = s2.fields["tasks"].as_array().unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0]["status"], "done");
    }

    #[test]
    fn unannotated_field_replaces() {
        let schema = StateSchema::new();
        let base = schema.initial_state("exec-1");
        let s1 = schema.merge(&base, &json!({"flag": true})).unwrap();
        let s2 = schema.merge(&s1, &json!({"flag": false})).unwrap();
        assert_eq!(s2.fields["flag"], json!(false));
    }

    #[test]
    fn initial_state_with_merges_caller_supplied_partial_state() {
        let mut schema = StateSchema::new();
        schema.field("retries", Annotation::new(json!(0)));
        let state = schema
            .initial_state_with("exec-1", Some(json!({"retries": 2, "topic": "rust"})))
            .unwrap();
        assert_eq!(state.execution_id, "exec-1");
        assert_eq!(state.fields["retries"], json!(2));
        assert_eq!(state.fields["topic"], json!("rust"));
    }

    #[test]
    fn initial_state_with_ignores_execution_id_override() {
        let schema = StateSchema::new();
        let state = schema
            .initial_state_with("exec-1", Some(json!({"executionId": "hijacked"})))
            .unwrap();
        assert_eq!(state.execution_id, "exec-1");
    }

    #[test]
    fn initial_state_with_none_is_same_as_initial_state() {
        let schema = StateSchema::new();
        let state = schema.initial_state_with("exec-1", None).unwrap();
        assert_eq!(state.execution_id, "exec-1");
        assert!(state.fields.is_empty());
    }
}
