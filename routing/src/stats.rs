//! Per-provider counters and circuit state.
//!
//! [`ProviderStats`] is mutated only through the four lifecycle events the
//! router emits (`route_selected`, `execution_start`, `execution_success`,
//! `execution_failure`). Callers hold the provider's lock for the duration of
//! one event, so counters are never torn for the same provider.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitTransition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Live counters for one provider.
#[derive(Debug, Clone)]
pub struct ProviderStats {
    total_requests: u64,
    success_count: u64,
    failure_count: u64,
    /// Rolling average over successful executions.
    avg_response_ms: f64,
    /// Rolling average over successful executions.
    avg_cost: f64,
    avg_confidence: f64,
    confidence_samples: u64,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    active_connections: u32,
    breaker: CircuitBreaker,
}

impl ProviderStats {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            total_requests: 0,
            success_count: 0,
            failure_count: 0,
            avg_response_ms: 0.0,
            avg_cost: 0.0,
            avg_confidence: 0.0,
            confidence_samples: 0,
            last_success: None,
            last_failure: None,
            active_connections: 0,
            breaker: CircuitBreaker::new(config),
        }
    }

    /// The router picked this provider for a task.
    pub fn route_selected(&mut self) {
        self.total_requests += 1;
    }

    /// A run is about to start.
    pub fn execution_start(&mut self) {
        self.active_connections += 1;
    }

    /// A run finished successfully.
    pub fn execution_success(
        &mut self,
        now: DateTime<Utc>,
        response_ms: f64,
        cost: f64,
        confidence: Option<f64>,
    ) -> Option<CircuitTransition> {
        self.success_count += 1;
        self.keep_total_consistent();
        self.active_connections = self.active_connections.saturating_sub(1);

        let n = self.success_count as f64;
        self.avg_response_ms = (self.avg_response_ms * (n - 1.0) + response_ms) / n;
        self.avg_cost = (self.avg_cost * (n - 1.0) + cost) / n;
        if let Some(c) = confidence {
            self.confidence_samples += 1;
            let m = self.confidence_samples as f64;
            self.avg_confidence = (self.avg_confidence * (m - 1.0) + c) / m;
        }
        self.last_success = Some(now);
        self.breaker.record_success(now)
    }

    /// A run failed.
    pub fn execution_failure(&mut self, now: DateTime<Utc>) -> Option<CircuitTransition> {
        self.failure_count += 1;
        self.keep_total_consistent();
        self.active_connections = self.active_connections.saturating_sub(1);
        self.last_failure = Some(now);
        self.breaker.record_failure(now)
    }

    /// Circuit state after applying any due Open → HalfOpen promotion.
    pub fn circuit_state(&mut self, now: DateTime<Utc>) -> (CircuitState, Option<CircuitTransition>) {
        self.breaker.poll(now)
    }

    pub fn reset_circuit(&mut self) -> Option<CircuitTransition> {
        self.breaker.reset()
    }

    pub fn success_count(&self) -> u64 {
        self.success_count
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests
    }

    pub fn active_connections(&self) -> u32 {
        self.active_connections
    }

    /// Successes over completed executions; `None` without history.
    pub fn success_rate(&self) -> Option<f64> {
        let done = self.success_count + self.failure_count;
        (done > 0).then(|| self.success_count as f64 / done as f64)
    }

    /// Average response time; `None` until a run has succeeded.
    pub fn avg_response_ms(&self) -> Option<f64> {
        (self.success_count > 0).then_some(self.avg_response_ms)
    }

    pub fn snapshot(&self) -> ProviderStatsSnapshot {
        ProviderStatsSnapshot {
            total_requests: self.total_requests,
            success_count: self.success_count,
            failure_count: self.failure_count,
            success_rate: self.success_rate(),
            avg_response_ms: self.avg_response_ms(),
            avg_cost: (self.success_count > 0).then_some(self.avg_cost),
            avg_confidence: (self.confidence_samples > 0).then_some(self.avg_confidence),
            last_success: self.last_success,
            last_failure: self.last_failure,
            circuit_state: self.breaker.state(),
            circuit_open_until: self.breaker.open_until(),
            active_connections: self.active_connections,
        }
    }

    // Outcomes recorded without a preceding `route_selected` (e.g. a
    // provider re-registered mid-flight) still count towards the total.
    fn keep_total_consistent(&mut self) {
        let done = self.success_count + self.failure_count;
        if done > self.total_requests {
            self.total_requests = done;
        }
    }
}

/// Point-in-time copy of a provider's stats, safe to hand to balancers,
/// policies and callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderStatsSnapshot {
    pub total_requests: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: Option<f64>,
    pub avg_response_ms: Option<f64>,
    pub avg_cost: Option<f64>,
    pub avg_confidence: Option<f64>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub circuit_state: CircuitState,
    pub circuit_open_until: Option<DateTime<Utc>>,
    pub active_connections: u32,
}

impl ProviderStatsSnapshot {
    /// Whether any execution has completed.
    pub fn has_history(&self) -> bool {
        self.success_count + self.failure_count > 0
    }
}

impl Default for ProviderStatsSnapshot {
    fn default() -> Self {
        ProviderStats::new(CircuitBreakerConfig::default()).snapshot()
    }
}
