//! Ordered policy evaluation.

use super::{FailoverConfig, RoutingPolicy};
use crate::balancer::LoadBalancingStrategy;
use crate::stats::ProviderStatsSnapshot;
use crate::task::Task;
use std::collections::HashMap;
use tracing::debug;

/// Estimates and stats the ceilings are checked against.
#[derive(Debug, Clone, Copy)]
pub struct PolicyContext<'a> {
    pub estimated_costs: &'a HashMap<String, f64>,
    pub estimated_response_ms: &'a HashMap<String, f64>,
    pub stats: &'a HashMap<String, ProviderStatsSnapshot>,
}

/// Result of running every policy over a candidate list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyOutcome {
    /// Remaining candidates, best-preferred first.
    pub candidates: Vec<String>,
    /// Policies that changed the candidate list, in evaluation order.
    pub applied: Vec<String>,
    /// Strategy of the highest-priority applied policy that sets one.
    pub strategy: Option<LoadBalancingStrategy>,
    /// Failover settings of the highest-priority applied policy.
    pub failover: Option<FailoverConfig>,
    /// Filters skipped because they would have removed every candidate.
    pub skipped_filters: Vec<String>,
}

impl PolicyOutcome {
    pub fn narrowed(&self) -> bool {
        !self.applied.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    /// Sorted by descending priority; equal priorities keep insertion order.
    policies: Vec<RoutingPolicy>,
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by name. Returns `true` when an existing policy was replaced.
    pub fn upsert(&mut self, policy: RoutingPolicy) -> bool {
        let replaced = match self.policies.iter_mut().find(|p| p.name == policy.name) {
            Some(existing) => {
                *existing = policy;
                true
            }
            None => {
                self.policies.push(policy);
                false
            }
        };
        self.policies.sort_by(|a, b| b.priority.cmp(&a.priority));
        replaced
    }

    pub fn remove(&mut self, name: &str) -> Option<RoutingPolicy> {
        let idx = self.policies.iter().position(|p| p.name == name)?;
        Some(self.policies.remove(idx))
    }

    pub fn policies(&self) -> &[RoutingPolicy] {
        &self.policies
    }

    pub fn names(&self) -> Vec<String> {
        self.policies.iter().map(|p| p.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Narrow `candidates` for `task`.
    pub fn evaluate(&self, task: &Task, candidates: Vec<String>, ctx: PolicyContext<'_>) -> PolicyOutcome {
        let mut outcome = PolicyOutcome {
            candidates,
            ..Default::default()
        };

        for policy in &self.policies {
            if outcome.candidates.len() <= 1 {
                break;
            }

            let before = outcome.candidates.clone();
            let mut current = apply_preferences(policy, task, &before);

            if let Some(max_cost) = policy.cost_optimization.max_cost_per_request {
                current = retain_or_skip(current, &mut outcome.skipped_filters, &policy.name, "cost", |p| {
                    ctx.estimated_costs.get(p).map_or(true, |c| *c <= max_cost)
                });
            }

            if let Some(max_ms) = policy.performance.max_response_time_ms {
                current = retain_or_skip(current, &mut outcome.skipped_filters, &policy.name, "response_time", |p| {
                    ctx.estimated_response_ms
                        .get(p)
                        .map_or(true, |ms| *ms <= max_ms as f64)
                });
            }

            if let Some(min_rate) = policy.performance.min_success_rate {
                current = retain_or_skip(current, &mut outcome.skipped_filters, &policy.name, "success_rate", |p| {
                    ctx.stats
                        .get(p)
                        .and_then(|s| s.success_rate)
                        .map_or(true, |rate| rate >= min_rate)
                });
            }

            if current != before {
                debug!(
                    policy = %policy.name,
                    before = before.len(),
                    after = current.len(),
                    "policy narrowed candidates"
                );
                if outcome.applied.is_empty() {
                    outcome.failover = Some(policy.failover.clone());
                }
                if outcome.strategy.is_none() {
                    outcome.strategy = policy.strategy;
                }
                outcome.applied.push(policy.name.clone());
                outcome.candidates = current;
            }
        }

        outcome
    }
}

/// Step (a): keep preferred providers that are candidates, ordered by weight.
fn apply_preferences(policy: &RoutingPolicy, task: &Task, candidates: &[String]) -> Vec<String> {
    let mut preferred: Vec<(&str, f64)> = policy
        .preferences_for(task)
        .iter()
        .filter(|pref| pref.matches(task))
        .filter(|pref| candidates.contains(&pref.provider))
        .map(|pref| (pref.provider.as_str(), pref.weight))
        .collect();

    if preferred.is_empty() {
        return candidates.to_vec();
    }

    // Stable: equal weights keep policy order.
    preferred.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let mut ordered: Vec<String> = Vec::with_capacity(preferred.len());
    for (name, _) in preferred {
        if !ordered.iter().any(|n| n == name) {
            ordered.push(name.to_string());
        }
    }
    ordered
}

/// Apply a filter unless it would remove every candidate.
fn retain_or_skip<F>(
    candidates: Vec<String>,
    skipped: &mut Vec<String>,
    policy: &str,
    filter: &str,
    keep: F,
) -> Vec<String>
where
    F: Fn(&String) -> bool,
{
    let kept: Vec<String> = candidates.iter().filter(|p| keep(p)).cloned().collect();
    if kept.is_empty() {
        debug!(policy, filter, "filter would eliminate all candidates; skipped");
        skipped.push(format!("{policy}:{filter}"));
        candidates
    } else {
        kept
    }
}
