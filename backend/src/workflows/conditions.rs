// Workflow Conditions - Boolean condition trees gating workflow execution

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use super::interpolation::resolve_path;

/// A single comparison against a field of the event payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Field path to evaluate (dot/bracket notation for nested fields)
    pub field: String,
    /// Operator for comparison
    pub operator: ConditionOperator,
    /// Value to compare against; unused by `exists`/`not_exists`
    #[serde(default)]
    pub value: Value,
}

/// Boolean combinator over sub-trees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Logic {
    #[serde(alias = "and")]
    And,
    #[serde(alias = "or")]
    Or,
    /// Negates the conjunction of its children
    #[serde(alias = "not")]
    Not,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    pub logic: Logic,
    #[serde(default)]
    pub conditions: Vec<ConditionTree>,
}

/// Recursive condition tree: either a group or a leaf comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionTree {
    Group(ConditionGroup),
    Leaf(Condition),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    // Equality
    #[serde(alias = "eq", alias = "==")]
    Equals,
    #[serde(alias = "ne", alias = "!=")]
    NotEquals,

    // Ordering (numbers, numeric strings, or ISO-8601 strings)
    #[serde(alias = "gt", alias = ">")]
    GreaterThan,
    #[serde(alias = "gte", alias = ">=")]
    GreaterThanOrEquals,
    #[serde(alias = "lt", alias = "<")]
    LessThan,
    #[serde(alias = "lte", alias = "<=")]
    LessThanOrEquals,

    // Substring for strings, membership for arrays
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Regex,

    // Field value in/not in a list
    In,
    NotIn,

    // Presence
    #[serde(alias = "is_not_null")]
    Exists,
    #[serde(alias = "is_null")]
    NotExists,
}

/// Evaluate a condition tree against an event payload
pub fn evaluate(tree: &ConditionTree, payload: &Value) -> bool {
    match tree {
        ConditionTree::Leaf(condition) => condition.evaluate(payload),
        ConditionTree::Group(group) => group.evaluate(payload),
    }
}

/// Evaluate an optional tree; a workflow with no conditions always matches
pub fn matches(tree: Option<&ConditionTree>, payload: &Value) -> bool {
    tree.map(|t| evaluate(t, payload)).unwrap_or(true)
}

impl ConditionGroup {
    pub fn evaluate(&self, payload: &Value) -> bool {
        // `all`/`any` short-circuit on the first false/true child
        match self.logic {
            Logic::And => self.conditions.iter().all(|c| evaluate(c, payload)),
            Logic::Or => self.conditions.iter().any(|c| evaluate(c, payload)),
            Logic::Not => !self.conditions.iter().all(|c| evaluate(c, payload)),
        }
    }
}

impl Condition {
    pub fn evaluate(&self, payload: &Value) -> bool {
        // null counts as absent for every operator
        let actual = match resolve_path(payload, &self.field) {
            Some(value) if !value.is_null() => value,
            _ => return self.operator == ConditionOperator::NotExists,
        };

        match self.operator {
            ConditionOperator::Exists => true,
            ConditionOperator::NotExists => false,
            ConditionOperator::Equals => values_equal(actual, &self.value),
            ConditionOperator::NotEquals => !values_equal(actual, &self.value),
            ConditionOperator::GreaterThan => compare(actual, &self.value) == Some(Ordering::Greater),
            ConditionOperator::GreaterThanOrEquals => {
                matches!(compare(actual, &self.value), Some(Ordering::Greater | Ordering::Equal))
            }
            ConditionOperator::LessThan => compare(actual, &self.value) == Some(Ordering::Less),
            ConditionOperator::LessThanOrEquals => {
                matches!(compare(actual, &self.value), Some(Ordering::Less | Ordering::Equal))
            }
            ConditionOperator::Contains => contains(actual, &self.value),
            ConditionOperator::NotContains => !contains(actual, &self.value),
            ConditionOperator::StartsWith => string_pair(actual, &self.value)
                .map(|(s, p)| s.to_lowercase().starts_with(&p.to_lowercase()))
                .unwrap_or(false),
            ConditionOperator::EndsWith => string_pair(actual, &self.value)
                .map(|(s, p)| s.to_lowercase().ends_with(&p.to_lowercase()))
                .unwrap_or(false),
            ConditionOperator::Regex => string_pair(actual, &self.value)
                .and_then(|(s, pattern)| Regex::new(pattern).ok().map(|re| re.is_match(s)))
                .unwrap_or(false),
            ConditionOperator::In => self
                .value
                .as_array()
                .map(|list| list.iter().any(|v| values_equal(actual, v)))
                .unwrap_or(false),
            ConditionOperator::NotIn => self
                .value
                .as_array()
                .map(|list| !list.iter().any(|v| values_equal(actual, v)))
                .unwrap_or(false),
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn contains(actual: &Value, needle: &Value) -> bool {
    match actual {
        Value::String(s) => needle
            .as_str()
            .map(|n| s.to_lowercase().contains(&n.to_lowercase()))
            .unwrap_or(false),
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        Value::Object(map) => needle.as_str().map(|key| map.contains_key(key)).unwrap_or(false),
        _ => false,
    }
}

fn string_pair<'a>(actual: &'a Value, expected: &'a Value) -> Option<(&'a str, &'a str)> {
    Some((actual.as_str()?, expected.as_str()?))
}

impl Condition {
    pub fn new(field: &str, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.to_string(),
            operator,
            value,
        }
    }

    pub fn equals(field: &str, value: Value) -> Self {
        Self::new(field, ConditionOperator::Equals, value)
    }

    pub fn not_equals(field: &str, value: Value) -> Self {
        Self::new(field, ConditionOperator::NotEquals, value)
    }

    pub fn contains(field: &str, value: Value) -> Self {
        Self::new(field, ConditionOperator::Contains, value)
    }

    pub fn greater_than(field: &str, value: f64) -> Self {
        Self::new(field, ConditionOperator::GreaterThan, serde_json::json!(value))
    }

    pub fn less_than(field: &str, value: f64) -> Self {
        Self::new(field, ConditionOperator::LessThan, serde_json::json!(value))
    }

    pub fn exists(field: &str) -> Self {
        Self::new(field, ConditionOperator::Exists, Value::Null)
    }

    pub fn not_exists(field: &str) -> Self {
        Self::new(field, ConditionOperator::NotExists, Value::Null)
    }

    pub fn in_list(field: &str, values: Vec<Value>) -> Self {
        Self::new(field, ConditionOperator::In, Value::Array(values))
    }

    pub fn into_tree(self) -> ConditionTree {
        ConditionTree::Leaf(self)
    }
}

impl ConditionGroup {
    pub fn and(conditions: Vec<ConditionTree>) -> Self {
        Self { logic: Logic::And, conditions }
    }

    pub fn or(conditions: Vec<ConditionTree>) -> Self {
        Self { logic: Logic::Or, conditions }
    }

    pub fn not(condition: ConditionTree) -> Self {
        Self {
            logic: Logic::Not,
            conditions: vec![condition],
        }
    }

    pub fn into_tree(self) -> ConditionTree {
        ConditionTree::Group(self)
    }
}

impl From<Condition> for ConditionTree {
    fn from(condition: Condition) -> Self {
        ConditionTree::Leaf(condition)
    }
}

impl From<ConditionGroup> for ConditionTree {
    fn from(group: ConditionGroup) -> Self {
        ConditionTree::Group(group)
    }
}

/// Common condition presets for platform automations
pub mod presets {
    use super::*;

    /// Subscriber on a given plan
    pub fn plan_is(plan: &str) -> Condition {
        Condition::equals("user.plan", serde_json::json!(plan))
    }

    /// Creator account has completed verification
    pub fn verified_creator() -> Condition {
        Condition::equals("creator.verified", serde_json::json!(true))
    }

    /// Payout above an amount threshold
    pub fn payout_above(amount: f64) -> Condition {
        Condition::greater_than("payout.amount", amount)
    }

    /// Ticket nobody has picked up yet
    pub fn unassigned_ticket() -> Condition {
        Condition::not_exists("ticket.assigned_to")
    }
}
