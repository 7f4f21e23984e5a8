//! Named query parameters and the values bound to them.

use crate::constants::GENERATED_PARAMETER_PREFIX;
use crate::error::{CriteriaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A value bound to a query parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Parameters of one main query and all of its nested builders.
///
/// A parameter is registered when an expression referencing it is added; it
/// stays unbound until [`ParameterManager::set`] gives it a value. Values passed
/// inline to restriction builders become generated `param_N` parameters.
#[derive(Debug, Clone, Default)]
pub struct ParameterManager {
    parameters: BTreeMap<String, Option<Value>>,
    order: Vec<String>,
    generated: usize,
}

impl ParameterManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str) {
        if !self.parameters.contains_key(name) {
            self.parameters.insert(name.to_string(), None);
            self.order.push(name.to_string());
        }
    }

    /// Registers a generated parameter already bound to `value`.
    pub fn add_generated(&mut self, value: Value) -> String {
        let name = format!("{GENERATED_PARAMETER_PREFIX}{}", self.generated);
        self.generated += 1;
        self.parameters.insert(name.clone(), Some(value));
        self.order.push(name.clone());
        name
    }

    pub fn set(&mut self, name: &str, value: Value) -> Result<()> {
        match self.parameters.get_mut(name) {
            Some(slot) => {
                *slot = Some(value);
                Ok(())
            }
            None => Err(CriteriaError::IllegalArgument(format!(
                "Parameter '{name}' does not exist in the query"
            ))),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.parameters.contains_key(name)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name).and_then(Option::as_ref)
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.value(name).is_some()
    }

    /// Names in registration order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn unbound(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|name| !self.is_bound(name))
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}
