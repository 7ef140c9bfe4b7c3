//! Shared fixtures for routing integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use routing::{
    AnalyticsError, CircuitBreakerConfig, Provider, ProviderError, RouterConfig, ScoringModel,
    Task, TaskOutput,
};
use routing::analytics::ProviderSignals;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

/// Provider that plays back scripted results, then repeats a fallback.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<TaskOutput, ProviderError>>>,
    fallback: Result<TaskOutput, ProviderError>,
    delay: Duration,
    calls: AtomicU32,
    healthy: AtomicBool,
}

impl ScriptedProvider {
    pub fn succeeding(content: &str) -> Self {
        Self::scripted(Vec::new(), Ok(TaskOutput::new(content)))
    }

    pub fn failing(error: ProviderError) -> Self {
        Self::scripted(Vec::new(), Err(error))
    }

    pub fn scripted(
        script: Vec<Result<TaskOutput, ProviderError>>,
        fallback: Result<TaskOutput, ProviderError>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
            healthy: AtomicBool::new(true),
        }
    }

    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay = Duration::from_millis(ms);
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn run(&self, _task: &Task) -> Result<TaskOutput, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

/// Scoring model that always errors.
pub struct FailingModel;

impl ScoringModel for FailingModel {
    fn name(&self) -> &str {
        "failing"
    }

    fn score(&self, _provider: &str, _signals: &ProviderSignals) -> Result<f64, AnalyticsError> {
        Err(AnalyticsError::Scoring {
            model: "failing".into(),
            reason: "model offline".into(),
        })
    }
}

/// Config with a single attempt per task and the given breaker thresholds.
pub fn single_attempt_config(failure_threshold: u32, window_size: u32) -> RouterConfig {
    let mut config = RouterConfig::default();
    config.retry.default_max_attempts = 1;
    config.circuit_breaker = CircuitBreakerConfig {
        failure_threshold,
        window_size,
        timeout_ms: 60_000,
        success_threshold: 2,
    };
    config
}

pub fn chat(content: &str) -> Task {
    Task::new("chat", content)
}
