//! Routing policies.
//!
//! A [`RoutingPolicy`] is a named, prioritized rule set. The
//! [`PolicyEngine`] evaluates policies from highest to lowest priority, each
//! one narrowing the candidate list the previous one left behind:
//!
//! ```text
//! available ─▶ (a) preferences ─▶ (b) cost ceiling ─▶ (c) performance ceiling ─▶ next policy
//! ```
//!
//! A filter that would leave nothing is skipped, so policies can only ever
//! narrow, never empty, the set.

pub mod condition;
pub mod engine;

pub use condition::{ConditionField, ConditionOperator, ConditionValue, PolicyCondition};
pub use engine::{PolicyContext, PolicyEngine, PolicyOutcome};

use crate::balancer::LoadBalancingStrategy;
use crate::task::Task;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Weighted preference for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderPreference {
    pub provider: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// All must match for the preference to apply.
    #[serde(default)]
    pub conditions: Vec<PolicyCondition>,
}

fn default_weight() -> f64 {
    1.0
}

impl ProviderPreference {
    pub fn new(provider: impl Into<String>, weight: f64) -> Self {
        Self {
            provider: provider.into(),
            weight,
            conditions: Vec::new(),
        }
    }

    pub fn when(mut self, condition: PolicyCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.conditions.iter().all(|c| c.matches(task))
    }
}

/// Retry and fallback settings a policy imposes when it applies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    /// Attempt budget before priority scaling.
    pub max_retries: Option<u32>,
    /// Base backoff delay in milliseconds.
    pub retry_delay_ms: Option<u64>,
    /// Providers to try, in order, after a failure.
    pub fallback_order: Vec<String>,
}

impl FailoverConfig {
    /// First fallback provider that is a candidate and has not failed yet.
    pub fn next_fallback<'a>(&'a self, candidates: &[String], failed: &[String]) -> Option<&'a str> {
        self.fallback_order
            .iter()
            .find(|p| candidates.contains(p) && !failed.contains(p))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostOptimization {
    /// Drop candidates whose estimated cost for the task exceeds this (USD).
    pub max_cost_per_request: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceRequirements {
    /// Drop candidates whose estimated response time exceeds this.
    pub max_response_time_ms: Option<u64>,
    /// Drop candidates whose observed success rate is below this.
    pub min_success_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingPolicy {
    pub name: String,
    /// Higher runs first.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub task_type_preferences: HashMap<String, Vec<ProviderPreference>>,
    /// Used for task types without their own list.
    #[serde(default)]
    pub default_preferences: Vec<ProviderPreference>,
    #[serde(default)]
    pub strategy: Option<LoadBalancingStrategy>,
    #[serde(default)]
    pub failover: FailoverConfig,
    #[serde(default)]
    pub cost_optimization: CostOptimization,
    #[serde(default)]
    pub performance: PerformanceRequirements,
}

impl RoutingPolicy {
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
            task_type_preferences: HashMap::new(),
            default_preferences: Vec::new(),
            strategy: None,
            failover: FailoverConfig::default(),
            cost_optimization: CostOptimization::default(),
            performance: PerformanceRequirements::default(),
        }
    }

    pub fn prefer(mut self, task_type: impl Into<String>, preference: ProviderPreference) -> Self {
        self.task_type_preferences
            .entry(task_type.into())
            .or_default()
            .push(preference);
        self
    }

    pub fn prefer_by_default(mut self, preference: ProviderPreference) -> Self {
        self.default_preferences.push(preference);
        self
    }

    pub fn with_strategy(mut self, strategy: LoadBalancingStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_failover(mut self, failover: FailoverConfig) -> Self {
        self.failover = failover;
        self
    }

    pub fn with_max_cost(mut self, usd: f64) -> Self {
        self.cost_optimization.max_cost_per_request = Some(usd);
        self
    }

    pub fn with_max_response_time(mut self, ms: u64) -> Self {
        self.performance.max_response_time_ms = Some(ms);
        self
    }

    pub fn with_min_success_rate(mut self, rate: f64) -> Self {
        self.performance.min_success_rate = Some(rate);
        self
    }

    /// Preferences that apply to `task`: its type's list, else the defaults.
    pub fn preferences_for(&self, task: &Task) -> &[ProviderPreference] {
        self.task_type_preferences
            .get(&task.task_type)
            .map(Vec::as_slice)
            .unwrap_or(&self.default_preferences)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("policy name must not be empty".to_string());
        }
        let all_prefs = self
            .task_type_preferences
            .values()
            .flatten()
            .chain(&self.default_preferences);
        for pref in all_prefs {
            if !pref.weight.is_finite() || pref.weight < 0.0 {
                return Err(format!(
                    "policy '{}': weight for '{}' must be a non-negative number",
                    self.name, pref.provider
                ));
            }
        }
        if let Some(rate) = self.performance.min_success_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(format!(
                    "policy '{}': min_success_rate must be within 0..=1",
                    self.name
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferences_fall_back_to_defaults() {
        let policy = RoutingPolicy::new("p", 1)
            .prefer("code", ProviderPreference::new("coder", 2.0))
            .prefer_by_default(ProviderPreference::new("general", 1.0));
        let code = Task::new("code", "x");
        let chat = Task::new("chat", "x");
        assert_eq!(policy.preferences_for(&code)[0].provider, "coder");
        assert_eq!(policy.preferences_for(&chat)[0].provider, "general");
    }

    #[test]
    fn test_next_fallback_skips_failed_and_unavailable() {
        let failover = FailoverConfig {
            fallback_order: vec!["a".into(), "b".into(), "c".into()],
            ..Default::default()
        };
        let candidates = vec!["b".to_string(), "c".to_string()];
        assert_eq!(failover.next_fallback(&candidates, &[]), Some("b"));
        assert_eq!(failover.next_fallback(&candidates, &["b".to_string()]), Some("c"));
        assert_eq!(
            failover.next_fallback(&candidates, &["b".to_string(), "c".to_string()]),
            None
        );
    }

    #[test]
    fn test_validation() {
        assert!(RoutingPolicy::new("", 0).validate().is_err());
        assert!(RoutingPolicy::new("p", 0)
            .prefer("t", ProviderPreference::new("a", -1.0))
            .validate()
            .is_err());
        assert!(RoutingPolicy::new("p", 0)
            .with_min_success_rate(1.5)
            .validate()
            .is_err());
        assert!(RoutingPolicy::new("p", 0).with_max_cost(0.01).validate().is_ok());
    }

    #[test]
    fn test_policy_from_toml() {
        let policy: RoutingPolicy = toml::from_str(
            r#"
            name = "long-content"
            priority = 10
            strategy = "cost_optimized"

            [[task_type_preferences.summarize]]
            provider = "big-context"
            weight = 2.0
            conditions = [{ field = "content_length", operator = "gt", value = 8000 }]

            [cost_optimization]
            max_cost_per_request = 0.05

            [failover]
            max_retries = 4
            fallback_order = ["local"]
            "#,
        )
        .unwrap();
        assert_eq!(policy.priority, 10);
        assert_eq!(policy.strategy, Some(LoadBalancingStrategy::CostOptimized));
        assert_eq!(policy.task_type_preferences["summarize"][0].conditions.len(), 1);
        assert_eq!(policy.cost_optimization.max_cost_per_request, Some(0.05));
        assert_eq!(policy.failover.max_retries, Some(4));
        assert!(policy.performance.max_response_time_ms.is_none());
    }
}
