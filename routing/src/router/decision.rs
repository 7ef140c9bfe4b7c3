//! Routing decision records.

use crate::analytics::ProviderPrediction;
use crate::balancer::LoadBalancingStrategy;
use crate::stats::ProviderStatsSnapshot;
use crate::task::TaskOutput;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// How the provider was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// Analytics recommendation followed.
    Analytics,
    /// Next entry of the applied policy's fallback order.
    Failover,
    /// Load-balancing strategy over the policy-filtered candidates.
    Balancer,
}

/// Immutable record of one routing choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub task_id: Uuid,
    pub provider: String,
    pub source: DecisionSource,
    pub reason: String,
    /// Other candidates that survived policy filtering.
    pub alternatives: Vec<String>,
    pub confidence: f64,
    pub estimated_cost: f64,
    pub estimated_response_ms: f64,
    pub strategy: LoadBalancingStrategy,
    pub applied_policies: Vec<String>,
    pub prediction: Option<ProviderPrediction>,
    /// Why analytics or policies did not drive the choice.
    pub fallback_reason: Option<String>,
    /// 1-based attempt this decision was made for.
    pub attempt: u32,
    pub decided_at: DateTime<Utc>,
}

/// Successful `execute` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub output: TaskOutput,
    /// Decision for the attempt that succeeded.
    pub decision: RoutingDecision,
    pub attempts: u32,
    pub response_ms: f64,
    pub cost: f64,
}

/// Router-wide view returned by [`Router::stats`](super::Router::stats).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterStats {
    pub providers: BTreeMap<String, ProviderStatsSnapshot>,
    pub policies: Vec<String>,
    pub analytics_enabled: bool,
    pub spent_in_window: f64,
}

impl RouterStats {
    pub fn total_requests(&self) -> u64 {
        self.providers.values().map(|s| s.total_requests).sum()
    }

    pub fn open_circuits(&self) -> usize {
        self.providers
            .values()
            .filter(|s| s.circuit_state == crate::circuit_breaker::CircuitState::Open)
            .count()
    }
}
