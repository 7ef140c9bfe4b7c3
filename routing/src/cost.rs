//! Deterministic cost and latency estimation.
//!
//! No pricing endpoint is ever called. Token counts come from a pluggable
//! [`TokenEstimator`]; cost is tokens × the provider's per-token rate; latency
//! is the provider's observed average once one exists, else its profile
//! default. Estimates are read-only with respect to provider stats.

use crate::provider::ProviderProfile;
use crate::stats::ProviderStatsSnapshot;
use crate::task::Task;
use std::sync::Arc;

/// Trait for estimating token counts from text.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> u64;

    /// Estimator name for logging.
    fn name(&self) -> &str;
}

/// Character-count based estimator (chars / divisor).
///
/// Uses the approximation of ~4 characters per token for English text.
#[derive(Debug, Clone)]
pub struct CharCountEstimator {
    pub chars_per_token: f64,
}

impl Default for CharCountEstimator {
    fn default() -> Self {
        Self {
            chars_per_token: 4.0,
        }
    }
}

impl TokenEstimator for CharCountEstimator {
    fn estimate(&self, text: &str) -> u64 {
        (text.len() as f64 / self.chars_per_token).ceil() as u64
    }

    fn name(&self) -> &str {
        "char_count"
    }
}

/// Estimation front-end shared by the policy engine, balancer and router.
#[derive(Clone)]
pub struct CostModel {
    estimator: Arc<dyn TokenEstimator>,
}

impl CostModel {
    pub fn new(estimator: Arc<dyn TokenEstimator>) -> Self {
        Self { estimator }
    }

    pub fn estimator_name(&self) -> &str {
        self.estimator.name()
    }

    pub fn estimate_tokens(&self, task: &Task) -> u64 {
        self.estimator.estimate(&task.content)
    }

    /// USD for running `task` on a provider with `profile`.
    pub fn estimate_cost(&self, task: &Task, profile: &ProviderProfile) -> f64 {
        self.estimate_tokens(task) as f64 * profile.cost_per_token
    }

    /// Milliseconds, preferring observed history over the profile default.
    pub fn estimate_response_ms(
        &self,
        profile: &ProviderProfile,
        stats: Option<&ProviderStatsSnapshot>,
    ) -> f64 {
        stats
            .and_then(|s| s.avg_response_ms)
            .unwrap_or(profile.default_response_ms as f64)
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self::new(Arc::new(CharCountEstimator::default()))
    }
}

impl std::fmt::Debug for CostModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CostModel")
            .field("estimator", &self.estimator.name())
            .finish()
    }
}
