//! Task and provider output types.
//!
//! A [`Task`] is immutable once submitted. The router only ever reads its
//! type, content length, priority and constraints; the content itself is
//! handed to providers untouched.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Default priority for tasks that do not specify one.
pub const DEFAULT_PRIORITY: u8 = 5;

/// Highest accepted priority.
pub const MAX_PRIORITY: u8 = 10;

/// Execution constraints attached to a task.
///
/// The timeout is advisory: it feeds estimation and policy conditions but is
/// enforced, if at all, by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConstraints {
    /// Advisory deadline for a single execution.
    #[serde(default, with = "optional_millis")]
    pub timeout: Option<Duration>,
    /// Overrides the configured default attempt budget.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

/// A unit of work routed to exactly one provider per attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: String,
    pub content: String,
    pub priority: u8,
    #[serde(default)]
    pub constraints: TaskConstraints,
}

impl Task {
    /// Create a task with default priority and no constraints.
    pub fn new(task_type: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type: task_type.into(),
            content: content.into(),
            priority: DEFAULT_PRIORITY,
            constraints: TaskConstraints::default(),
        }
    }

    /// With priority (clamped to `0..=10`).
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(MAX_PRIORITY);
        self
    }

    /// With an advisory timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.constraints.timeout = Some(timeout);
        self
    }

    /// With an explicit attempt budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.constraints.max_retries = Some(max_retries);
        self
    }

    /// Content length in bytes.
    pub fn content_length(&self) -> usize {
        self.content.len()
    }

    /// Check the task is well-formed enough to route.
    pub fn validate(&self) -> Result<(), String> {
        if self.task_type.trim().is_empty() {
            return Err("task type must not be empty".to_string());
        }
        if self.content.is_empty() {
            return Err("task content must not be empty".to_string());
        }
        if self.priority > MAX_PRIORITY {
            return Err(format!(
                "priority {} exceeds maximum {}",
                self.priority, MAX_PRIORITY
            ));
        }
        Ok(())
    }
}

/// Result of a successful provider run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub content: String,
    /// Provider self-assessed confidence (0.0 to 1.0).
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Actual cost in USD when the backend reports one.
    #[serde(default)]
    pub cost: Option<f64>,
}

impl TaskOutput {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            confidence: None,
            cost: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost.max(0.0));
        self
    }
}

mod optional_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_defaults() {
        let task = Task::new("summarize", "hello world");
        assert_eq!(task.priority, DEFAULT_PRIORITY);
        assert!(task.constraints.timeout.is_none());
        assert_eq!(task.content_length(), 11);
        assert!(task.validate().is_ok());
    }

    #[test]
    fn test_priority_clamped() {
        let task = Task::new("t", "c").with_priority(42);
        assert_eq!(task.priority, MAX_PRIORITY);
    }

    #[test]
    fn test_validation_rejects_empty_fields() {
        assert!(Task::new("", "content").validate().is_err());
        assert!(Task::new("   ", "content").validate().is_err());
        assert!(Task::new("chat", "").validate().is_err());
    }

    #[test]
    fn test_timeout_serializes_as_millis() {
        let task = Task::new("chat", "hi").with_timeout(Duration::from_secs(3));
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["constraints"]["timeout"], 3000);

        let back: Task = serde_json::from_value(json).unwrap();
        assert_eq!(back.constraints.timeout, Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_output_clamps() {
        let out = TaskOutput::new("ok").with_confidence(1.7).with_cost(-1.0);
        assert_eq!(out.confidence, Some(1.0));
        assert_eq!(out.cost, Some(0.0));
    }
}
