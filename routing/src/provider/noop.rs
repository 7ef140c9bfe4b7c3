//! No-op test engine.

use super::Provider;
use crate::error::ProviderError;
use crate::task::{Task, TaskOutput};
use async_trait::async_trait;

/// Echoes the task content back with full confidence and zero cost.
#[derive(Debug, Clone, Default)]
pub struct NoopProvider {
    prefix: Option<String>,
}

impl NoopProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix every echoed response, handy for telling providers apart.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }
}

#[async_trait]
impl Provider for NoopProvider {
    async fn run(&self, task: &Task) -> Result<TaskOutput, ProviderError> {
        let content = match &self.prefix {
            Some(p) => format!("{p}{}", task.content),
            None => task.content.clone(),
        };
        Ok(TaskOutput::new(content).with_confidence(1.0).with_cost(0.0))
    }
}
