//! Router configuration.
//!
//! Loaded from TOML with every field defaulted, then adjusted by environment
//! overrides:
//!
//! | Variable | Field |
//! |---|---|
//! | `ROUTER_ANALYTICS_ENABLED` | `analytics_enabled` |
//! | `ROUTER_DEFAULT_STRATEGY` | `default_strategy` |
//! | `ROUTER_MAX_ATTEMPTS` | `retry.default_max_attempts` |
//! | `ROUTER_RETRY_BASE_DELAY_MS` | `retry.base_delay_ms` |
//! | `ROUTER_DAILY_BUDGET_USD` | `budget.daily_limit_usd` |

use crate::analytics::BudgetConfig;
use crate::balancer::LoadBalancingStrategy;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::flags::parse_bool_value;
use crate::ledger::DEFAULT_RETENTION_HOURS;
use crate::policy::RoutingPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse router config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid router config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Used when neither the task nor an applied policy sets a budget.
    pub default_max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    /// Strategy when no applied policy names one.
    pub default_strategy: LoadBalancingStrategy,
    pub analytics_enabled: bool,
    /// Analytics recommendations below this confidence are not followed.
    pub min_prediction_confidence: f64,
    pub budget: Option<BudgetConfig>,
    pub policies: Vec<RoutingPolicy>,
    pub ledger_retention_hours: i64,
    pub ledger_prune_interval_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            default_strategy: LoadBalancingStrategy::default(),
            analytics_enabled: false,
            min_prediction_confidence: 0.3,
            budget: None,
            policies: Vec::new(),
            ledger_retention_hours: DEFAULT_RETENTION_HOURS,
            ledger_prune_interval_secs: 300,
        }
    }
}

impl RouterConfig {
    /// Load a TOML file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with_overrides(path, |key| std::env::var(key).ok())
    }

    /// Load a TOML file, apply overrides from `lookup`, then validate once.
    pub fn load_with_overrides<F>(path: &Path, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: RouterConfig = toml::from_str(&content)?;
        config.apply_overrides_from(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RouterConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup. Unparseable values are logged and ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("ROUTER_ANALYTICS_ENABLED") {
            match parse_bool_value(&raw) {
                Some(enabled) => self.analytics_enabled = enabled,
                None => warn!(value = %raw, "ignoring ROUTER_ANALYTICS_ENABLED"),
            }
        }
        if let Some(raw) = lookup("ROUTER_DEFAULT_STRATEGY") {
            match raw.parse() {
                Ok(strategy) => self.default_strategy = strategy,
                Err(e) => warn!(error = %e, "ignoring ROUTER_DEFAULT_STRATEGY"),
            }
        }
        if let Some(raw) = lookup("ROUTER_MAX_ATTEMPTS") {
            match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => self.retry.default_max_attempts = n,
                _ => warn!(value = %raw, "ignoring ROUTER_MAX_ATTEMPTS"),
            }
        }
        if let Some(raw) = lookup("ROUTER_RETRY_BASE_DELAY_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) => self.retry.base_delay_ms = ms,
                Err(_) => warn!(value = %raw, "ignoring ROUTER_RETRY_BASE_DELAY_MS"),
            }
        }
        if let Some(raw) = lookup("ROUTER_DAILY_BUDGET_USD") {
            match raw.trim().parse::<f64>() {
                Ok(usd) if usd.is_finite() && usd >= 0.0 => {
                    self.budget.get_or_insert_with(BudgetConfig::default).daily_limit_usd = usd;
                }
                _ => warn!(value = %raw, "ignoring ROUTER_DAILY_BUDGET_USD"),
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.circuit_breaker.validate().map_err(ConfigError::Invalid)?;
        if self.retry.default_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.default_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.max_delay_ms must not be below retry.base_delay_ms".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_prediction_confidence) {
            return Err(ConfigError::Invalid(
                "min_prediction_confidence must be within 0..=1".to_string(),
            ));
        }
        if let Some(budget) = &self.budget {
            budget.validate().map_err(ConfigError::Invalid)?;
        }
        if self.ledger_retention_hours <= 0 {
            return Err(ConfigError::Invalid(
                "ledger_retention_hours must be positive".to_string(),
            ));
        }
        if self.ledger_prune_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "ledger_prune_interval_secs must be positive".to_string(),
            ));
        }
        for policy in &self.policies {
            policy.validate().map_err(ConfigError::Invalid)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_empty_document_is_defaults() {
        let config = RouterConfig::from_toml_str("").unwrap();
        assert_eq!(config, RouterConfig::default());
        assert_eq!(config.retry.default_max_attempts, 3);
        assert_eq!(config.default_strategy, LoadBalancingStrategy::WeightedRandom);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            default_strategy = "least_connections"
            analytics_enabled = true

            [circuit_breaker]
            failure_threshold = 3
            window_size = 6

            [budget]
            daily_limit_usd = 25.0

            [[policies]]
            name = "cheap-first"
            priority = 5
            [policies.cost_optimization]
            max_cost_per_request = 0.01
            "#
        )
        .unwrap();

        let config = RouterConfig::load(file.path()).unwrap();
        assert_eq!(config.default_strategy, LoadBalancingStrategy::LeastConnections);
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.timeout_ms, 60_000);
        assert_eq!(config.budget.as_ref().map(|b| b.warning_threshold), Some(0.8));
        assert_eq!(config.policies.len(), 1);
        assert_eq!(config.policies[0].cost_optimization.max_cost_per_request, Some(0.01));
    }

    #[test]
    fn test_override_corrects_file_value_before_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[retry]\ndefault_max_attempts = 0\n").unwrap();

        assert!(matches!(
            RouterConfig::load_with_overrides(file.path(), |_| None),
            Err(ConfigError::Invalid(_))
        ));
        let config = RouterConfig::load_with_overrides(file.path(), |k| {
            (k == "ROUTER_MAX_ATTEMPTS").then(|| "4".to_string())
        })
        .unwrap();
        assert_eq!(config.retry.default_max_attempts, 4);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = RouterConfig::load(Path::new("/nonexistent/router.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_parse_and_validation_errors() {
        assert!(matches!(
            RouterConfig::from_toml_str("retry = 5"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            RouterConfig::from_toml_str("min_prediction_confidence = 2.0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RouterConfig::from_toml_str("[circuit_breaker]\nfailure_threshold = 20\nwindow_size = 5"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("ROUTER_ANALYTICS_ENABLED", "yes"),
            ("ROUTER_DEFAULT_STRATEGY", "round_robin"),
            ("ROUTER_MAX_ATTEMPTS", "5"),
            ("ROUTER_RETRY_BASE_DELAY_MS", "250"),
            ("ROUTER_DAILY_BUDGET_USD", "3.5"),
        ]
        .into_iter()
        .collect();

        let mut config = RouterConfig::default();
        config.apply_overrides_from(|k| env.get(k).map(|v| v.to_string()));
        assert!(config.analytics_enabled);
        assert_eq!(config.default_strategy, LoadBalancingStrategy::RoundRobin);
        assert_eq!(config.retry.default_max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 250);
        assert_eq!(config.budget.map(|b| b.daily_limit_usd), Some(3.5));
    }

    #[test]
    fn test_bad_overrides_ignored() {
        let mut config = RouterConfig::default();
        config.apply_overrides_from(|k| match k {
            "ROUTER_MAX_ATTEMPTS" => Some("0".to_string()),
            "ROUTER_DEFAULT_STRATEGY" => Some("fastest".to_string()),
            _ => None,
        });
        assert_eq!(config, RouterConfig::default());
    }
}
