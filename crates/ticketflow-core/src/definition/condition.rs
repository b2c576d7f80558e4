//! `Condition` / `ConditionGroup`: a small recursive value type evaluated
//! against `FormValues`, used for conditional field requirements,
//! conditional approver routing, and conditional transitions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A mapping from field key to value, shared across all form and task
/// steps on a ticket. Repeating sections are represented as arrays of
/// row-maps keyed by `row_id`.
pub type FormValues = HashMap<String, Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterThanOrEquals,
    LessThanOrEquals,
    Contains,
    NotContains,
    In,
    NotIn,
    IsEmpty,
    IsNotEmpty,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicOp {
    And,
    Or,
}

/// A single comparison: `field` references a form value key produced
/// earlier in the ticket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    pub fn evaluate(&self, form_values: &FormValues) -> bool {
        let actual = form_values.get(&self.field);

        match self.operator {
            Operator::IsEmpty => is_empty(actual),
            Operator::IsNotEmpty => !is_empty(actual),
            Operator::Equals => actual.is_some_and(|a| values_equal(a, &self.value)),
            Operator::NotEquals => !actual.is_some_and(|a| values_equal(a, &self.value)),
            Operator::GreaterThan => compare_numeric(actual, &self.value, |a, b| a > b),
            Operator::LessThan => compare_numeric(actual, &self.value, |a, b| a < b),
            Operator::GreaterThanOrEquals => compare_numeric(actual, &self.value, |a, b| a >= b),
            Operator::LessThanOrEquals => compare_numeric(actual, &self.value, |a, b| a <= b),
            Operator::Contains => contains(actual, &self.value),
            Operator::NotContains => !contains(actual, &self.value),
            Operator::In => in_list(actual, &self.value),
            Operator::NotIn => !in_list(actual, &self.value),
        }
    }
}

fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        Some(_) => false,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
        return a == b;
    }
    a == b
}

fn compare_numeric(actual: Option<&Value>, expected: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (actual.and_then(Value::as_f64), expected.as_f64()) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

fn contains(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        Some(Value::String(s)) => expected.as_str().is_some_and(|needle| s.contains(needle)),
        Some(Value::Array(items)) => items.iter().any(|item| values_equal(item, expected)),
        _ => false,
    }
}

fn in_list(actual: Option<&Value>, list: &Value) -> bool {
    match (actual, list.as_array()) {
        (Some(actual), Some(items)) => items.iter().any(|item| values_equal(item, actual)),
        _ => false,
    }
}

/// A group of conditions combined with `AND`/`OR` logic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionGroup {
    pub logic: LogicOp,
    pub conditions: Vec<Condition>,
}

impl ConditionGroup {
    pub fn evaluate(&self, form_values: &FormValues) -> bool {
        match self.logic {
            LogicOp::And => self.conditions.iter().all(|c| c.evaluate(form_values)),
            LogicOp::Or => self.conditions.iter().any(|c| c.evaluate(form_values)),
        }
    }

    /// Field keys this group references, used by the validator to check
    /// that conditions reference known field keys.
    pub fn referenced_fields(&self) -> impl Iterator<Item = &str> {
        self.conditions.iter().map(|c| c.field.as_str())
    }
}
