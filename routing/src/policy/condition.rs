//! Preference conditions evaluated against task attributes.

use crate::task::Task;
use serde::{Deserialize, Serialize};

/// Task attribute a condition inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionField {
    /// Content length in bytes.
    ContentLength,
    Priority,
    /// Advisory timeout in milliseconds; absent when the task has none.
    TimeConstraint,
    TaskType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Contains,
    In,
}

/// Right-hand side of a condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Number(f64),
    Text(String),
    List(Vec<ConditionValue>),
}

impl ConditionValue {
    fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
            Self::List(_) => None,
        }
    }

    fn loosely_equals(&self, other: &ConditionValue) -> bool {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
            _ => match (self, other) {
                (Self::Text(a), Self::Text(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl From<f64> for ConditionValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for ConditionValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyCondition {
    pub field: ConditionField,
    pub operator: ConditionOperator,
    pub value: ConditionValue,
}

impl PolicyCondition {
    pub fn new(
        field: ConditionField,
        operator: ConditionOperator,
        value: impl Into<ConditionValue>,
    ) -> Self {
        Self {
            field,
            operator,
            value: value.into(),
        }
    }

    fn field_value(&self, task: &Task) -> Option<ConditionValue> {
        match self.field {
            ConditionField::ContentLength => Some(ConditionValue::Number(task.content_length() as f64)),
            ConditionField::Priority => Some(ConditionValue::Number(task.priority as f64)),
            ConditionField::TimeConstraint => task
                .constraints
                .timeout
                .map(|t| ConditionValue::Number(t.as_millis() as f64)),
            ConditionField::TaskType => Some(ConditionValue::Text(task.task_type.clone())),
        }
    }

    /// A condition on a missing attribute never matches.
    pub fn matches(&self, task: &Task) -> bool {
        let Some(actual) = self.field_value(task) else {
            return false;
        };
        let expected = &self.value;
        let numeric = || actual.as_number().zip(expected.as_number());

        match self.operator {
            ConditionOperator::Lt => numeric().is_some_and(|(a, b)| a < b),
            ConditionOperator::Lte => numeric().is_some_and(|(a, b)| a <= b),
            ConditionOperator::Gt => numeric().is_some_and(|(a, b)| a > b),
            ConditionOperator::Gte => numeric().is_some_and(|(a, b)| a >= b),
            ConditionOperator::Eq => actual.loosely_equals(expected),
            ConditionOperator::Contains => match (&actual, expected) {
                (ConditionValue::Text(a), ConditionValue::Text(b)) => a.contains(b.as_str()),
                _ => false,
            },
            ConditionOperator::In => match expected {
                ConditionValue::List(items) => items.iter().any(|item| actual.loosely_equals(item)),
                _ => false,
            },
        }
    }
}
