//! Daily budget tracking over the cost ledger.

use crate::ledger::SpendSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Burn rate is computed over at least this many hours so a single early
/// charge does not project as a full day's spend per minute.
const MIN_BURN_HOURS: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub daily_limit_usd: f64,
    /// Utilization at which the state becomes `warning`.
    pub warning_threshold: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_limit_usd: 10.0,
            warning_threshold: 0.8,
        }
    }
}

impl BudgetConfig {
    pub fn new(daily_limit_usd: f64) -> Self {
        Self {
            daily_limit_usd,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.daily_limit_usd.is_finite() || self.daily_limit_usd < 0.0 {
            return Err("budget.daily_limit_usd must be a non-negative number".to_string());
        }
        if !(0.0..=1.0).contains(&self.warning_threshold) {
            return Err("budget.warning_threshold must be within 0..=1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetState {
    Healthy,
    Warning,
    Exceeded,
}

impl std::fmt::Display for BudgetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Warning => write!(f, "warning"),
            Self::Exceeded => write!(f, "exceeded"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub spent: f64,
    pub daily_limit: f64,
    pub remaining: f64,
    /// `spent / daily_limit`.
    pub utilization: f64,
    /// USD per hour since the oldest entry in the window.
    pub hourly_burn_rate: f64,
    pub projected_daily_spend: f64,
    pub state: BudgetState,
    pub by_provider: BTreeMap<String, f64>,
    pub generated_at: DateTime<Utc>,
}

pub fn budget_status(summary: &SpendSummary, budget: &BudgetConfig, now: DateTime<Utc>) -> BudgetStatus {
    let spent = summary.total;
    let limit = budget.daily_limit_usd;

    let utilization = if limit > 0.0 {
        spent / limit
    } else if spent > 0.0 {
        1.0
    } else {
        0.0
    };

    let elapsed_hours = summary
        .earliest
        .map(|t| (now - t).num_milliseconds() as f64 / 3_600_000.0)
        .unwrap_or(0.0)
        .max(MIN_BURN_HOURS);
    let hourly_burn_rate = spent / elapsed_hours;

    let state = if spent > 0.0 && spent >= limit {
        BudgetState::Exceeded
    } else if utilization >= budget.warning_threshold {
        BudgetState::Warning
    } else {
        BudgetState::Healthy
    };

    BudgetStatus {
        spent,
        daily_limit: limit,
        remaining: (limit - spent).max(0.0),
        utilization,
        hourly_burn_rate,
        projected_daily_spend: hourly_burn_rate * 24.0,
        state,
        by_provider: summary.by_provider.clone(),
        generated_at: now,
    }
}
