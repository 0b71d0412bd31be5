// Automation Conditions - Conditional logic evaluated against event data

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::value::{loosely_equal, resolve_field, stringify, to_f64, EventData};

/// A single condition to evaluate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Field name to evaluate (supports dot notation for nested fields)
    pub field: String,
    /// Operator name; unrecognized operators never match
    #[serde(alias = "op")]
    pub operator: String,
    /// Value to compare against
    #[serde(default)]
    pub value: Value,
}

/// Condition operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOperator {
    // Equality
    Equals,
    NotEquals,

    // Membership
    In,
    NotIn,

    // Numeric comparisons
    GreaterThan,
    GreaterThanOrEquals,
    LessThan,
    LessThanOrEquals,

    // String operations
    Contains,
    NotContains,
    StartsWith,
}

impl ConditionOperator {
    pub fn parse(name: &str) -> Option<Self> {
        let op = match name {
            "eq" => Self::Equals,
            "neq" => Self::NotEquals,
            "in" => Self::In,
            "not_in" => Self::NotIn,
            "gt" => Self::GreaterThan,
            "gte" => Self::GreaterThanOrEquals,
            "lt" => Self::LessThan,
            "lte" => Self::LessThanOrEquals,
            "contains" => Self::Contains,
            "not_contains" => Self::NotContains,
            "starts_with" => Self::StartsWith,
            _ => return None,
        };
        Some(op)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "eq",
            Self::NotEquals => "neq",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::GreaterThan => "gt",
            Self::GreaterThanOrEquals => "gte",
            Self::LessThan => "lt",
            Self::LessThanOrEquals => "lte",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::StartsWith => "starts_with",
        }
    }
}

/// Per-condition detail reported by a dry run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionResult {
    pub field: String,
    pub operator: String,
    pub expected: Value,
    pub actual: Value,
    pub matched: bool,
}

impl Condition {
    pub fn new(field: &str, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.to_string(),
            operator: operator.as_str().to_string(),
            value,
        }
    }

    pub fn equals(field: &str, value: Value) -> Self {
        Self::new(field, ConditionOperator::Equals, value)
    }

    pub fn not_equals(field: &str, value: Value) -> Self {
        Self::new(field, ConditionOperator::NotEquals, value)
    }

    pub fn in_list(field: &str, values: Vec<Value>) -> Self {
        Self::new(field, ConditionOperator::In, Value::Array(values))
    }

    pub fn greater_than(field: &str, value: f64) -> Self {
        Self::new(field, ConditionOperator::GreaterThan, serde_json::json!(value))
    }

    pub fn less_than(field: &str, value: f64) -> Self {
        Self::new(field, ConditionOperator::LessThan, serde_json::json!(value))
    }

    pub fn contains(field: &str, value: &str) -> Self {
        Self::new(field, ConditionOperator::Contains, Value::String(value.to_string()))
    }

    pub fn starts_with(field: &str, value: &str) -> Self {
        Self::new(field, ConditionOperator::StartsWith, Value::String(value.to_string()))
    }

    /// Evaluate against event data. Unknown operators evaluate to `false`.
    pub fn matches(&self, data: &EventData) -> bool {
        let Some(op) = ConditionOperator::parse(&self.operator) else {
            return false;
        };
        let actual = resolve_field(&self.field, data);

        match op {
            ConditionOperator::Equals => loosely_equal(actual, &self.value),
            ConditionOperator::NotEquals => !loosely_equal(actual, &self.value),
            ConditionOperator::In => contained_in(actual, &self.value),
            ConditionOperator::NotIn => !contained_in(actual, &self.value),
            ConditionOperator::GreaterThan => to_f64(actual) > to_f64(Some(&self.value)),
            ConditionOperator::GreaterThanOrEquals => to_f64(actual) >= to_f64(Some(&self.value)),
            ConditionOperator::LessThan => to_f64(actual) < to_f64(Some(&self.value)),
            ConditionOperator::LessThanOrEquals => to_f64(actual) <= to_f64(Some(&self.value)),
            ConditionOperator::Contains => field_text(actual).contains(&stringify(&self.value)),
            ConditionOperator::NotContains => !field_text(actual).contains(&stringify(&self.value)),
            ConditionOperator::StartsWith => field_text(actual).starts_with(&stringify(&self.value)),
        }
    }

    pub fn explain(&self, data: &EventData) -> ConditionResult {
        ConditionResult {
            field: self.field.clone(),
            operator: self.operator.clone(),
            expected: self.value.clone(),
            actual: resolve_field(&self.field, data).cloned().unwrap_or(Value::Null),
            matched: self.matches(data),
        }
    }
}

fn field_text(actual: Option<&Value>) -> String {
    actual.map(stringify).unwrap_or_default()
}

// A non-list right-hand side degrades to plain equality.
fn contained_in(actual: Option<&Value>, candidates: &Value) -> bool {
    match candidates {
        Value::Array(items) => items.iter().any(|item| loosely_equal(actual, item)),
        other => loosely_equal(actual, other),
    }
}

/// AND of all conditions; an empty list matches vacuously.
pub fn evaluate_conditions(conditions: &[Condition], data: &EventData) -> bool {
    conditions.iter().all(|c| c.matches(data))
}

/// Common condition presets for order workflows
pub mod presets {
    use super::*;

    pub fn status(status: &str) -> Condition {
        Condition::equals("status", serde_json::json!(status))
    }

    pub fn order_total_above(amount: f64) -> Condition {
        Condition::greater_than("total_amount", amount)
    }

    pub fn shipped_with(carriers: &[&str]) -> Condition {
        Condition::in_list(
            "carrier",
            carriers.iter().map(|c| serde_json::json!(c)).collect(),
        )
    }

    pub fn sku_prefix(prefix: &str) -> Condition {
        Condition::starts_with("sku", prefix)
    }
}
