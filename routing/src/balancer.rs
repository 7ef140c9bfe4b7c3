//! Load-balancing strategies.
//!
//! Selection runs over a candidate list the policy engine already narrowed,
//! plus a snapshot of provider stats. Everything here is deterministic except
//! `weighted_random`, and even that never draws when only one candidate is
//! left. The only state is the round-robin counters.

use crate::stats::ProviderStatsSnapshot;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Final tie-breaker among the remaining candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    RoundRobin,
    #[default]
    WeightedRandom,
    LeastConnections,
    ResponseTime,
    CostOptimized,
    /// Placeholder: returns the first candidate.
    CapabilityMatch,
}

impl LoadBalancingStrategy {
    pub fn all() -> &'static [LoadBalancingStrategy] {
        &[
            Self::RoundRobin,
            Self::WeightedRandom,
            Self::LeastConnections,
            Self::ResponseTime,
            Self::CostOptimized,
            Self::CapabilityMatch,
        ]
    }
}

impl std::fmt::Display for LoadBalancingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RoundRobin => write!(f, "round_robin"),
            Self::WeightedRandom => write!(f, "weighted_random"),
            Self::LeastConnections => write!(f, "least_connections"),
            Self::ResponseTime => write!(f, "response_time"),
            Self::CostOptimized => write!(f, "cost_optimized"),
            Self::CapabilityMatch => write!(f, "capability_match"),
        }
    }
}

impl std::str::FromStr for LoadBalancingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|strategy| strategy.to_string() == s.trim().to_lowercase())
            .ok_or_else(|| format!("unknown load-balancing strategy: {s}"))
    }
}

/// Inputs a strategy may consult.
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub stats: &'a HashMap<String, ProviderStatsSnapshot>,
    /// Task-specific cost estimates keyed by provider.
    pub estimated_costs: &'a HashMap<String, f64>,
}

/// Neutral weight for providers without history.
const NO_HISTORY_WEIGHT: f64 = 1.0;

/// Response time at which the speed component bottoms out.
const RESPONSE_TIME_CEILING_MS: f64 = 10_000.0;

/// Weight used by `weighted_random` for a provider's stats.
pub fn provider_weight(stats: Option<&ProviderStatsSnapshot>) -> f64 {
    let Some(stats) = stats.filter(|s| s.has_history()) else {
        return NO_HISTORY_WEIGHT;
    };
    let success_rate = stats.success_rate.unwrap_or(0.0);
    let speed = stats
        .avg_response_ms
        .map(|ms| 1.0 - ms / RESPONSE_TIME_CEILING_MS)
        .unwrap_or(0.0)
        .max(0.1);
    let confidence = stats.avg_confidence.unwrap_or(0.5);
    success_rate * 0.4 + speed * 0.3 + confidence * 0.3
}

#[derive(Debug, Default)]
pub struct LoadBalancer {
    /// Round-robin position per candidate-set signature.
    round_robin: Mutex<HashMap<String, usize>>,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick one candidate. `None` only for an empty list.
    pub fn select(
        &self,
        strategy: LoadBalancingStrategy,
        candidates: &[String],
        ctx: SelectionContext<'_>,
    ) -> Option<String> {
        self.select_with(strategy, candidates, ctx, || rand::thread_rng().gen::<f64>())
    }

    /// Same as [`select`](Self::select) with an explicit uniform `[0, 1)` source.
    pub fn select_with<F>(
        &self,
        strategy: LoadBalancingStrategy,
        candidates: &[String],
        ctx: SelectionContext<'_>,
        draw: F,
    ) -> Option<String>
    where
        F: FnOnce() -> f64,
    {
        match candidates {
            [] => None,
            [only] => Some(only.clone()),
            _ => Some(match strategy {
                LoadBalancingStrategy::RoundRobin => self.round_robin(candidates),
                LoadBalancingStrategy::WeightedRandom => weighted_random(candidates, ctx, draw()),
                LoadBalancingStrategy::LeastConnections => min_by_key(candidates, |name| {
                    ctx.stats
                        .get(name)
                        .map(|s| s.active_connections as f64)
                        .unwrap_or(0.0)
                }),
                LoadBalancingStrategy::ResponseTime => min_by_key(candidates, |name| {
                    ctx.stats
                        .get(name)
                        .and_then(|s| s.avg_response_ms)
                        .unwrap_or(f64::INFINITY)
                }),
                LoadBalancingStrategy::CostOptimized => min_by_key(candidates, |name| {
                    ctx.estimated_costs
                        .get(name)
                        .copied()
                        .unwrap_or(f64::INFINITY)
                }),
                LoadBalancingStrategy::CapabilityMatch => candidates[0].clone(),
            }),
        }
    }

    fn round_robin(&self, candidates: &[String]) -> String {
        let mut sorted: Vec<&String> = candidates.iter().collect();
        sorted.sort();
        let signature = sorted
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(",");

        let mut counters = self.round_robin.lock();
        let counter = counters.entry(signature).or_insert(0);
        let picked = sorted[*counter % sorted.len()].clone();
        *counter = counter.wrapping_add(1);
        picked
    }
}

fn weighted_random(candidates: &[String], ctx: SelectionContext<'_>, draw: f64) -> String {
    let weights: Vec<f64> = candidates
        .iter()
        .map(|name| provider_weight(ctx.stats.get(name)).max(0.0))
        .collect();
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return candidates[0].clone();
    }

    let target = draw.clamp(0.0, 1.0) * total;
    let mut cumulative = 0.0;
    for (name, weight) in candidates.iter().zip(&weights) {
        cumulative += weight;
        if target < cumulative {
            return name.clone();
        }
    }
    candidates[candidates.len() - 1].clone()
}

/// First candidate with the smallest key.
fn min_by_key<F>(candidates: &[String], key: F) -> String
where
    F: Fn(&String) -> f64,
{
    candidates
        .iter()
        .map(|name| (name, key(name)))
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
        .map(|(name, _)| name.clone())
        .unwrap_or_else(|| candidates[0].clone())
}
