//! State schema and reducer system for graph sessions
//!
//! A session's state is a JSON object whose keys are exactly the fields
//! declared in a [`StateSchema`]. Every field carries one [`Reducer`] fixed when
//! the graph is built, which decides how a node's partial update lands on the
//! current value.
//!
//! # Reducers
//!
//! | Reducer | Behavior | Accumulator | Default |
//! |---------|----------|-------------|---------|
//! | [`OverwriteReducer`] | Last write wins | no | `null` |
//! | [`AppendReducer`] | Concatenate arrays | yes | `[]` |
//! | [`SumReducer`] | Add numeric values | yes | `0` |
//! | [`MergeReducer`] | Shallow object merge | yes | `{}` |
//!
//! Accumulator fields are the ones fan-out branches hand back to their parent.
//! Their [`Reducer::combine`] is associative, so combining branch results in
//! branch order gives the same state regardless of which branch finished
//! first:
//!
//! ```text
//! merge(merge(s, d1), d2) == merge(s, combine(d1, d2))
//! ```
//!
//! # Example
//!
//! ```rust
//! use stategraph_core::state::{AppendReducer, OverwriteReducer, StateSchema};
//! use serde_json::json;
//!
//! let schema = StateSchema::new()
//!     .with_field("topic", Box::new(OverwriteReducer))
//!     .with_field("sections", Box::new(AppendReducer));
//!
//! let state = schema.instantiate(&json!({"topic": "rust"})).unwrap();
//! assert_eq!(state, json!({"topic": "rust", "sections": []}));
//!
//! let state = schema.merge(&state, &json!({"sections": ["intro"]})).unwrap();
//! assert_eq!(state["sections"], json!(["intro"]));
//!
//! // Undeclared fields are rejected, never silently stored.
//! assert!(schema.merge(&state, &json!({"summary": "x"})).is_err());
//! ```

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during state operations
///
/// ```rust
/// use stategraph_core::state::{AppendReducer, Reducer, StateError};
/// use serde_json::json;
///
/// let reducer = AppendReducer;
/// let result = reducer.reduce(&json!(42), &json!("not an array"));
///
/// assert!(matches!(result, Err(StateError::ReducerError(_))));
/// ```
#[derive(Debug, Error)]
pub enum StateError {
    /// State structure is invalid (e.g., not an object when expected)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Reducer encountered incompatible types or failed to merge
    #[error("Reducer error: {0}")]
    ReducerError(String),

    /// Update or input references a field the schema does not declare
    #[error("Unknown state field: {0}")]
    UnknownField(String),
}

pub type Result<T> = std::result::Result<T, StateError>;

/// Trait for reducing/merging state values
///
/// Reducers define how a write to a state field is combined with the value
/// already there. Implement it for custom merge policies; keep `combine`
/// associative if the field is reported as an accumulator.
pub trait Reducer: Send + Sync {
    /// Apply an update to the current value
    ///
    /// `current` may be null for a field that has never been written.
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value>;

    /// Fold two successive updates into one with the same effect
    fn combine(&self, earlier: &Value, later: &Value) -> Result<Value> {
        self.reduce(earlier, later)
    }

    /// Whether parallel writes to this field accumulate
    fn is_accumulator(&self) -> bool {
        false
    }

    /// Value a fresh state holds for this field
    fn default_value(&self) -> Value {
        Value::Null
    }

    /// Get a human-readable name for this reducer
    fn name(&self) -> &str;
}

/// Overwrite reducer - replaces the current value with the update
///
/// ```rust
/// use stategraph_core::state::{OverwriteReducer, Reducer};
/// use serde_json::json;
///
/// let result = OverwriteReducer.reduce(&json!("analyze"), &json!("execute")).unwrap();
/// assert_eq!(result, json!("execute"));
/// ```
#[derive(Debug, Clone)]
pub struct OverwriteReducer;

impl Reducer for OverwriteReducer {
    fn reduce(&self, _current: &Value, update: &Value) -> Result<Value> {
        Ok(update.clone())
    }

    fn name(&self) -> &str {
        "overwrite"
    }
}

/// Append reducer - appends update to current array
///
/// # Behavior
///
/// - **Array + Array**: Concatenates both arrays
/// - **Array + Scalar**: Appends scalar as single element
/// - **Null + Array**: Initializes with the array
/// - **Null + Scalar**: Creates array with single element
///
/// ```rust
/// use stategraph_core::state::{AppendReducer, Reducer};
/// use serde_json::json;
///
/// let result = AppendReducer.reduce(&json!(["User: Hello"]), &json!(["AI: Hi"])).unwrap();
/// assert_eq!(result, json!(["User: Hello", "AI: Hi"]));
/// ```
#[derive(Debug, Clone)]
pub struct AppendReducer;

impl AppendReducer {
    fn into_items(value: &Value) -> Vec<Value> {
        match value {
            Value::Array(items) => items.clone(),
            single => vec![single.clone()],
        }
    }
}

impl Reducer for AppendReducer {
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value> {
        match (current, update) {
            (Value::Array(curr_arr), Value::Array(upd_arr)) => {
                let mut result = curr_arr.clone();
                result.extend_from_slice(upd_arr);
                Ok(Value::Array(result))
            }
            (Value::Null, Value::Array(upd_arr)) => Ok(Value::Array(upd_arr.clone())),
            (Value::Array(curr_arr), single_value) => {
                let mut result = curr_arr.clone();
                result.push(single_value.clone());
                Ok(Value::Array(result))
            }
            (Value::Null, single_value) => Ok(Value::Array(vec![single_value.clone()])),
            _ => Err(StateError::ReducerError(
                "AppendReducer requires array values".to_string(),
            )),
        }
    }

    // Updates may be scalars; both sides are normalized to element lists.
    fn combine(&self, earlier: &Value, later: &Value) -> Result<Value> {
        let mut items = Self::into_items(earlier);
        items.extend(Self::into_items(later));
        Ok(Value::Array(items))
    }

    fn is_accumulator(&self) -> bool {
        true
    }

    fn default_value(&self) -> Value {
        Value::Array(Vec::new())
    }

    fn name(&self) -> &str {
        "append"
    }
}

/// Merge reducer - shallow merges objects, update keys win
///
/// ```rust
/// use stategraph_core::state::{MergeReducer, Reducer};
/// use serde_json::json;
///
/// let result = MergeReducer
///     .reduce(&json!({"name": "Alice", "age": 30}), &json!({"age": 31}))
///     .unwrap();
/// assert_eq!(result, json!({"name": "Alice", "age": 31}));
/// ```
#[derive(Debug, Clone)]
pub struct MergeReducer;

impl Reducer for MergeReducer {
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value> {
        match (current, update) {
            (Value::Object(curr_obj), Value::Object(upd_obj)) => {
                let mut result = curr_obj.clone();
                for (key, value) in upd_obj {
                    result.insert(key.clone(), value.clone());
                }
                Ok(Value::Object(result))
            }
            (Value::Null, Value::Object(upd_obj)) => Ok(Value::Object(upd_obj.clone())),
            _ => Err(StateError::ReducerError(
                "MergeReducer requires object values".to_string(),
            )),
        }
    }

    fn is_accumulator(&self) -> bool {
        true
    }

    fn default_value(&self) -> Value {
        Value::Object(Map::new())
    }

    fn name(&self) -> &str {
        "merge"
    }
}

/// Sum reducer - adds numeric values
///
/// Integers stay integers; any float operand makes the result a float.
#[derive(Debug, Clone)]
pub struct SumReducer;

impl Reducer for SumReducer {
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value> {
        match (current, update) {
            (Value::Number(a), Value::Number(b)) => {
                if let (Some(a_i64), Some(b_i64)) = (a.as_i64(), b.as_i64()) {
                    a_i64
                        .checked_add(b_i64)
                        .map(|sum| Value::Number(sum.into()))
                        .ok_or_else(|| StateError::ReducerError("integer overflow".to_string()))
                } else if let (Some(a_f64), Some(b_f64)) = (a.as_f64(), b.as_f64()) {
                    serde_json::Number::from_f64(a_f64 + b_f64)
                        .map(Value::Number)
                        .ok_or_else(|| {
                            StateError::ReducerError("sum is not a finite number".to_string())
                        })
                } else {
                    Err(StateError::ReducerError(
                        "Cannot add non-numeric values".to_string(),
                    ))
                }
            }
            (Value::Null, Value::Number(_)) => Ok(update.clone()),
            _ => Err(StateError::ReducerError(
                "SumReducer requires numeric values".to_string(),
            )),
        }
    }

    fn is_accumulator(&self) -> bool {
        true
    }

    fn default_value(&self) -> Value {
        Value::Number(0.into())
    }

    fn name(&self) -> &str {
        "sum"
    }
}

/// A declared state field
#[derive(Clone)]
struct FieldSpec {
    reducer: Arc<dyn Reducer>,
    default: Value,
}

/// State schema defining fields, their reducers and defaults
///
/// Cloning is cheap: reducers are shared.
#[derive(Clone, Default)]
pub struct StateSchema {
    fields: BTreeMap<String, FieldSpec>,
}

impl fmt::Debug for StateSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, spec) in &self.fields {
            map.entry(name, &spec.reducer.name());
        }
        map.finish()
    }
}

impl StateSchema {
    /// Create a new empty state schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field with a specific reducer and the reducer's default value
    pub fn add_field(&mut self, field_name: impl Into<String>, reducer: Box<dyn Reducer>) {
        let default = reducer.default_value();
        self.add_field_with_default(field_name, reducer, default);
    }

    /// Add a field with an explicit initial value
    pub fn add_field_with_default(
        &mut self,
        field_name: impl Into<String>,
        reducer: Box<dyn Reducer>,
        default: Value,
    ) {
        self.fields.insert(
            field_name.into(),
            FieldSpec {
                reducer: Arc::from(reducer),
                default,
            },
        );
    }

    /// Builder form of [`add_field`](Self::add_field)
    pub fn with_field(mut self, field_name: impl Into<String>, reducer: Box<dyn Reducer>) -> Self {
        self.add_field(field_name, reducer);
        self
    }

    /// Builder form of [`add_field_with_default`](Self::add_field_with_default)
    pub fn with_field_default(
        mut self,
        field_name: impl Into<String>,
        reducer: Box<dyn Reducer>,
        default: Value,
    ) -> Self {
        self.add_field_with_default(field_name, reducer, default);
        self
    }

    /// Get the list of fields in this schema, sorted
    pub fn fields(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    pub fn contains(&self, field_name: &str) -> bool {
        self.fields.contains_key(field_name)
    }

    pub fn reducer(&self, field_name: &str) -> Option<&dyn Reducer> {
        self.fields.get(field_name).map(|spec| spec.reducer.as_ref())
    }

    fn spec(&self, field_name: &str) -> Result<&FieldSpec> {
        self.fields
            .get(field_name)
            .ok_or_else(|| StateError::UnknownField(field_name.to_string()))
    }

    /// Treat `null` as the empty update; anything else must be an object
    fn as_update<'a>(value: &'a Value, what: &str) -> Result<Option<&'a Map<String, Value>>> {
        match value {
            Value::Null => Ok(None),
            Value::Object(obj) => Ok(Some(obj)),
            other => Err(StateError::InvalidState(format!(
                "{} must be an object, got {}",
                what, other
            ))),
        }
    }

    /// First undeclared key of an update, if any
    fn check_known(&self, obj: &Map<String, Value>) -> Result<()> {
        match obj.keys().find(|key| !self.fields.contains_key(*key)) {
            Some(unknown) => Err(StateError::UnknownField(unknown.clone())),
            None => Ok(()),
        }
    }

    /// Build a full state: defaults for every field, then `input` written verbatim
    pub fn instantiate(&self, input: &Value) -> Result<Value> {
        let mut state: Map<String, Value> = self
            .fields
            .iter()
            .map(|(name, spec)| (name.clone(), spec.default.clone()))
            .collect();

        if let Some(obj) = Self::as_update(input, "Input")? {
            self.check_known(obj)?;
            for (key, value) in obj {
                state.insert(key.clone(), value.clone());
            }
        }
        Ok(Value::Object(state))
    }

    /// Apply an update to state according to schema reducers
    ///
    /// The update is checked for undeclared fields before anything is written,
    /// so a rejected update leaves `state` untouched.
    pub fn apply(&self, state: &mut Value, update: &Value) -> Result<()> {
        let Some(update_obj) = Self::as_update(update, "Update")? else {
            return Ok(());
        };
        self.check_known(update_obj)?;

        let state_obj = state
            .as_object_mut()
            .ok_or_else(|| StateError::InvalidState("State must be an object".to_string()))?;

        let mut reduced = Vec::with_capacity(update_obj.len());
        for (field_name, update_value) in update_obj {
            let spec = self.spec(field_name)?;
            let value = spec
                .reducer
                .reduce(state_obj.get(field_name).unwrap_or(&Value::Null), update_value)?;
            reduced.push((field_name.clone(), value));
        }
        state_obj.extend(reduced);

        Ok(())
    }

    /// Pure form of [`apply`](Self::apply)
    pub fn merge(&self, base: &Value, update: &Value) -> Result<Value> {
        let mut state = base.clone();
        self.apply(&mut state, update)?;
        Ok(state)
    }

    /// Combine two updates so that applying the result equals applying both in order
    pub fn combine(&self, first: &Value, second: &Value) -> Result<Value> {
        let first_obj = Self::as_update(first, "Update")?;
        let second_obj = Self::as_update(second, "Update")?;

        let mut combined = first_obj.cloned().unwrap_or_default();
        if let Some(obj) = first_obj {
            self.check_known(obj)?;
        }
        if let Some(obj) = second_obj {
            self.check_known(obj)?;
            for (key, later) in obj {
                let value = match combined.get(key) {
                    Some(earlier) => self.spec(key)?.reducer.combine(earlier, later)?,
                    None => later.clone(),
                };
                combined.insert(key.clone(), value);
            }
        }
        Ok(Value::Object(combined))
    }

    /// Keep only the accumulator fields of an update
    pub fn accumulator_delta(&self, update: &Value) -> Result<Value> {
        let mut out = Map::new();
        if let Some(obj) = Self::as_update(update, "Update")? {
            self.check_known(obj)?;
            for (key, value) in obj {
                if self.spec(key)?.reducer.is_accumulator() {
                    out.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(Value::Object(out))
    }

    /// Keep only the keys of `value` this schema declares
    pub fn project(&self, value: &Value) -> Value {
        match value {
            Value::Object(obj) => Value::Object(
                obj.iter()
                    .filter(|(key, _)| self.fields.contains_key(*key))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
            ),
            _ => Value::Object(Map::new()),
        }
    }

    /// Validate that state is an object holding only declared fields
    pub fn validate(&self, state: &Value) -> Result<()> {
        let obj = state
            .as_object()
            .ok_or_else(|| StateError::InvalidState("State must be an object".to_string()))?;
        self.check_known(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn research_schema() -> StateSchema {
        StateSchema::new()
            .with_field("topic", Box::new(OverwriteReducer))
            .with_field("sections", Box::new(AppendReducer))
            .with_field("tokens", Box::new(SumReducer))
            .with_field("meta", Box::new(MergeReducer))
    }

    #[test]
    fn test_overwrite_reducer() {
        let result = OverwriteReducer
            .reduce(&json!({"old": "value"}), &json!({"new": "value"}))
            .unwrap();
        assert_eq!(result, json!({"new": "value"}));
    }

    #[test]
    fn test_append_reducer_variants() {
        let reducer = AppendReducer;
        assert_eq!(
            reducer.reduce(&json!([1, 2, 3]), &json!([4, 5])).unwrap(),
            json!([1, 2, 3, 4, 5])
        );
        assert_eq!(reducer.reduce(&Value::Null, &json!([1, 2])).unwrap(), json!([1, 2]));
        assert_eq!(reducer.reduce(&json!([1, 2]), &json!(3)).unwrap(), json!([1, 2, 3]));
        assert_eq!(reducer.combine(&json!(1), &json!([2, 3])).unwrap(), json!([1, 2, 3]));
    }

    #[test]
    fn test_merge_and_sum_reducers() {
        assert_eq!(
            MergeReducer
                .reduce(&json!({"a": 1, "b": 2}), &json!({"b": 3, "c": 4}))
                .unwrap(),
            json!({"a": 1, "b": 3, "c": 4})
        );
        assert_eq!(SumReducer.reduce(&json!(5), &json!(3)).unwrap(), json!(8));
        assert_eq!(SumReducer.reduce(&json!(2.5), &json!(3.5)).unwrap(), json!(6.0));
        assert!(SumReducer.reduce(&json!(i64::MAX), &json!(1)).is_err());
    }

    #[test]
    fn test_instantiate_fills_defaults() {
        let schema = research_schema();
        let state = schema.instantiate(&json!({"topic": "rust"})).unwrap();
        assert_eq!(
            state,
            json!({"topic": "rust", "sections": [], "tokens": 0, "meta": {}})
        );

        let empty = schema.instantiate(&Value::Null).unwrap();
        assert_eq!(empty["topic"], Value::Null);
    }

    #[test]
    fn test_explicit_default() {
        let schema = StateSchema::new().with_field_default(
            "max_analysts",
            Box::new(OverwriteReducer),
            json!(3),
        );
        assert_eq!(schema.instantiate(&json!({})).unwrap(), json!({"max_analysts": 3}));
    }

    #[test]
    fn test_unknown_field_rejected_atomically() {
        let schema = research_schema();
        let mut state = schema.instantiate(&json!({"topic": "t"})).unwrap();
        let before = state.clone();

        let err = schema
            .apply(&mut state, &json!({"sections": ["x"], "summary": "nope"}))
            .unwrap_err();
        assert!(matches!(err, StateError::UnknownField(ref f) if f == "summary"));
        assert_eq!(state, before);

        assert!(matches!(
            schema.instantiate(&json!({"bogus": 1})),
            Err(StateError::UnknownField(_))
        ));
    }

    #[test]
    fn test_null_update_is_empty() {
        let schema = research_schema();
        let state = schema.instantiate(&json!({})).unwrap();
        assert_eq!(schema.merge(&state, &Value::Null).unwrap(), state);
        assert!(matches!(
            schema.merge(&state, &json!("text")),
            Err(StateError::InvalidState(_))
        ));
    }

    #[test]
    fn test_accumulator_delta_and_project() {
        let schema = research_schema();
        let delta = json!({"topic": "t", "sections": ["s"], "tokens": 4});
        assert_eq!(
            schema.accumulator_delta(&delta).unwrap(),
            json!({"sections": ["s"], "tokens": 4})
        );
        assert_eq!(
            schema.project(&json!({"topic": "t", "other": 1})),
            json!({"topic": "t"})
        );
    }

    #[test]
    fn test_reducer_names() {
        assert_eq!(OverwriteReducer.name(), "overwrite");
        assert_eq!(AppendReducer.name(), "append");
        assert_eq!(MergeReducer.name(), "merge");
        assert_eq!(SumReducer.name(), "sum");
    }

    fn small_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i32>().prop_map(|n| json!(n)),
            "[a-z]{0,4}".prop_map(Value::String),
            prop::collection::vec(any::<i16>(), 0..4).prop_map(|v| json!(v)),
        ]
    }

    fn delta() -> impl Strategy<Value = Value> {
        (
            prop::option::of(small_value()),
            prop::option::of(small_value()),
            prop::option::of(any::<i32>()),
            prop::option::of(prop::collection::btree_map("[a-c]", any::<i8>(), 0..3)),
        )
            .prop_map(|(topic, sections, tokens, meta)| {
                let mut obj = Map::new();
                if let Some(v) = topic {
                    obj.insert("topic".into(), v);
                }
                if let Some(v) = sections {
                    obj.insert("sections".into(), v);
                }
                if let Some(v) = tokens {
                    obj.insert("tokens".into(), json!(v));
                }
                if let Some(m) = meta {
                    obj.insert("meta".into(), json!(m));
                }
                Value::Object(obj)
            })
    }

    proptest! {
        #[test]
        fn prop_combine_matches_sequential_merge(d1 in delta(), d2 in delta()) {
            let schema = research_schema();
            let state = schema.instantiate(&json!({"topic": "seed"})).unwrap();

            let sequential = schema.merge(&schema.merge(&state, &d1).unwrap(), &d2).unwrap();
            let combined = schema.merge(&state, &schema.combine(&d1, &d2).unwrap()).unwrap();

            prop_assert_eq!(sequential, combined);
        }

        #[test]
        fn prop_combine_is_associative(d1 in delta(), d2 in delta(), d3 in delta()) {
            let schema = research_schema();
            let left = schema.combine(&schema.combine(&d1, &d2).unwrap(), &d3).unwrap();
            let right = schema.combine(&d1, &schema.combine(&d2, &d3).unwrap()).unwrap();
            prop_assert_eq!(left, right);
        }
    }
}
