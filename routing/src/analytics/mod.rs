//! Predictive analytics over execution history.
//!
//! Everything here is a deterministic heuristic over the bounded history
//! kept per (task type, provider): recommendations, cost predictions with
//! confidence intervals, budget projections, latency trends and outliers.
//! The router consults [`PredictiveAnalytics::predict_optimal_provider`]
//! when analytics is enabled and falls back to its standard pipeline on any
//! [`AnalyticsError`].

pub mod budget;
pub mod error;
pub mod history;
pub mod scoring;
pub mod trends;

pub use budget::{budget_status, BudgetConfig, BudgetState, BudgetStatus};
pub use error::{AnalyticsError, AnalyticsResult};
pub use history::{ExecutionRecord, HistoryAggregate, HistoryStore, MAX_HISTORY};
pub use scoring::{EnsembleWeights, ProviderSignals, ScoringModel, Signal, WeightedEnsemble};
pub use trends::{Anomaly, AnomalyMetric, AnomalySeverity, PerformanceTrend, TrendDirection};

use crate::cost::CostModel;
use crate::ledger::CostLedger;
use crate::task::Task;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Samples at which prediction confidence stops growing.
const FULL_CONFIDENCE_SAMPLES: f64 = 10.0;
/// Alternatives reported next to a recommendation.
const MAX_ALTERNATIVES: usize = 3;
/// z-value for a 95% interval.
const Z_95: f64 = 1.96;
/// Reliability gap tolerated when suggesting a cheaper provider.
const COMPARABLE_RELIABILITY: f64 = 0.05;
/// Batch hints need at least this many records for the task type.
const BATCH_MIN_RECORDS: usize = 20;
/// ...averaging at most this many tokens.
const BATCH_MAX_AVG_TOKENS: f64 = 200.0;
/// Latency at which the efficiency speed component reaches zero.
const EFFICIENCY_LATENCY_CEILING_MS: f64 = 10_000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredProvider {
    pub provider: String,
    pub score: f64,
    pub signals: ProviderSignals,
    pub samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternativeProvider {
    pub provider: String,
    pub score: f64,
    pub strength: Signal,
}

/// Recommendation from [`PredictiveAnalytics::predict_optimal_provider`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderPrediction {
    pub provider: String,
    pub score: f64,
    /// Top score scaled by how much history backs it.
    pub confidence: f64,
    pub samples: usize,
    pub signals: ProviderSignals,
    pub alternatives: Vec<AlternativeProvider>,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostPrediction {
    pub provider: String,
    pub estimated_cost: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    /// 0 when the estimate is not backed by history.
    pub confidence: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CostRecommendation {
    /// A cheaper provider with comparable reliability exists.
    SwitchProvider {
        task_type: String,
        from: String,
        to: String,
        current_avg_cost: f64,
        suggested_avg_cost: f64,
        savings_pct: f64,
    },
    /// Many small tasks; batching them would cut per-request overhead.
    BatchTasks {
        task_type: String,
        records: usize,
        avg_tokens: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderComparison {
    pub provider: String,
    pub rank: usize,
    pub score: f64,
    pub samples: usize,
    pub success_rate: Option<f64>,
    pub avg_response_ms: Option<f64>,
    pub avg_cost: Option<f64>,
    pub avg_confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEfficiency {
    pub provider: String,
    pub reliability: f64,
    pub speed: f64,
    pub cost_efficiency: f64,
    pub score: f64,
    pub samples: usize,
}

/// Router-wide load the caller passes into a routing recommendation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemLoad {
    pub registered_providers: usize,
    pub open_circuits: usize,
    pub active_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRecommendation {
    pub prediction: ProviderPrediction,
    pub cost: CostPrediction,
    pub load: SystemLoad,
    pub generated_at: DateTime<Utc>,
}

pub struct PredictiveAnalytics {
    history: RwLock<HistoryStore>,
    model: Arc<dyn ScoringModel>,
    cost_model: CostModel,
}

impl PredictiveAnalytics {
    pub fn new() -> Self {
        Self::with_model(Arc::new(WeightedEnsemble::default()))
    }

    pub fn with_model(model: Arc<dyn ScoringModel>) -> Self {
        Self {
            history: RwLock::new(HistoryStore::default()),
            model,
            cost_model: CostModel::default(),
        }
    }

    pub fn with_cost_model(mut self, cost_model: CostModel) -> Self {
        self.cost_model = cost_model;
        self
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub fn record_execution(&self, task_type: &str, provider: &str, record: ExecutionRecord) {
        self.history.write().push(task_type, provider, record);
    }

    pub fn samples(&self, task_type: &str, provider: &str) -> usize {
        self.history.read().samples(task_type, provider)
    }

    pub fn total_records(&self) -> usize {
        self.history.read().total_records()
    }

    /// Rank `providers` for `task` and recommend the best.
    pub fn predict_optimal_provider(
        &self,
        task: &Task,
        providers: &[String],
    ) -> AnalyticsResult<ProviderPrediction> {
        if providers.is_empty() {
            return Err(AnalyticsError::NoCandidates);
        }
        let ranked = self.rank(&task.task_type, providers)?;
        if ranked.iter().all(|s| s.samples == 0) {
            return Err(AnalyticsError::InsufficientData {
                task_type: task.task_type.clone(),
            });
        }

        let mut ranked = ranked.into_iter();
        let Some(top) = ranked.next() else {
            return Err(AnalyticsError::NoCandidates);
        };
        let alternatives = ranked
            .take(MAX_ALTERNATIVES)
            .map(|s| AlternativeProvider {
                strength: s.signals.primary_strength(),
                provider: s.provider,
                score: s.score,
            })
            .collect();
        let confidence = top.score * (top.samples as f64 / FULL_CONFIDENCE_SAMPLES).min(1.0);

        debug!(
            task_type = %task.task_type,
            provider = %top.provider,
            score = top.score,
            confidence,
            "analytics recommendation"
        );
        Ok(ProviderPrediction {
            provider: top.provider,
            score: top.score,
            confidence,
            samples: top.samples,
            signals: top.signals,
            alternatives,
            model: self.model.name().to_string(),
        })
    }

    /// Expected cost of `task` on `provider`, from its history per token.
    ///
    /// Without successful history the `fallback_estimate` is returned with a
    /// ±50% interval and zero confidence.
    pub fn predict_task_cost(&self, task: &Task, provider: &str, fallback_estimate: f64) -> CostPrediction {
        let tokens = self.cost_model.estimate_tokens(task) as f64;
        let per_token: Vec<f64> = self
            .history
            .read()
            .records(&task.task_type, provider)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.success && r.tokens > 0)
                    .map(|r| r.cost / r.tokens as f64)
                    .collect()
            })
            .unwrap_or_default();

        if per_token.is_empty() {
            return CostPrediction {
                provider: provider.to_string(),
                estimated_cost: fallback_estimate,
                lower_bound: fallback_estimate * 0.5,
                upper_bound: fallback_estimate * 1.5,
                confidence: 0.0,
                samples: 0,
            };
        }

        let n = per_token.len() as f64;
        let mean = per_token.iter().sum::<f64>() / n;
        let std_dev = if per_token.len() > 1 {
            (per_token.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        } else {
            0.0
        };
        let estimated = mean * tokens;
        let half_width = Z_95 * std_dev / n.sqrt() * tokens;

        CostPrediction {
            provider: provider.to_string(),
            estimated_cost: estimated,
            lower_bound: (estimated - half_width).max(0.0),
            upper_bound: estimated + half_width,
            confidence: (n / FULL_CONFIDENCE_SAMPLES).min(1.0),
            samples: per_token.len(),
        }
    }

    pub fn cost_optimization_recommendations(&self) -> Vec<CostRecommendation> {
        let history = self.history.read();
        let mut recommendations = Vec::new();

        for task_type in history.task_types() {
            let mut aggregates: Vec<(String, HistoryAggregate)> = history
                .by_task_type(&task_type)
                .filter_map(|(p, records)| {
                    HistoryAggregate::from_records(records).map(|a| (p.to_string(), a))
                })
                .collect();
            aggregates.sort_by(|a, b| a.0.cmp(&b.0));

            // The most-used provider is taken as the current choice.
            let current = aggregates
                .iter()
                .filter(|(_, a)| a.avg_cost.is_some_and(|c| c > 0.0))
                .max_by(|a, b| a.1.samples.cmp(&b.1.samples).then_with(|| b.0.cmp(&a.0)));
            if let Some((from, current_agg)) = current {
                let current_cost = current_agg.avg_cost.unwrap_or(0.0);
                let cheaper = aggregates
                    .iter()
                    .filter(|(p, a)| {
                        p != from
                            && a.success_rate >= current_agg.success_rate - COMPARABLE_RELIABILITY
                            && a.avg_cost.is_some_and(|c| c < current_cost)
                    })
                    .min_by(|a, b| {
                        let ca = a.1.avg_cost.unwrap_or(f64::INFINITY);
                        let cb = b.1.avg_cost.unwrap_or(f64::INFINITY);
                        ca.partial_cmp(&cb).unwrap_or(std::cmp::Ordering::Equal)
                    });
                if let Some((to, agg)) = cheaper {
                    let suggested = agg.avg_cost.unwrap_or(0.0);
                    recommendations.push(CostRecommendation::SwitchProvider {
                        task_type: task_type.clone(),
                        from: from.clone(),
                        to: to.clone(),
                        current_avg_cost: current_cost,
                        suggested_avg_cost: suggested,
                        savings_pct: (current_cost - suggested) / current_cost * 100.0,
                    });
                }
            }

            let records = aggregates.iter().map(|(_, a)| a.samples).sum::<usize>();
            if records >= BATCH_MIN_RECORDS {
                let avg_tokens = aggregates
                    .iter()
                    .map(|(_, a)| a.avg_tokens * a.samples as f64)
                    .sum::<f64>()
                    / records as f64;
                if avg_tokens <= BATCH_MAX_AVG_TOKENS {
                    recommendations.push(CostRecommendation::BatchTasks {
                        task_type: task_type.clone(),
                        records,
                        avg_tokens,
                    });
                }
            }
        }
        recommendations
    }

    /// Spend over the ledger's window against a daily budget.
    pub fn budget_status(&self, ledger: &CostLedger, budget: &BudgetConfig, now: DateTime<Utc>) -> BudgetStatus {
        budget_status(&ledger.summary(now), budget, now)
    }

    /// Latency trend per task type the provider has history for.
    pub fn performance_trends(&self, provider: &str) -> Vec<PerformanceTrend> {
        let history = self.history.read();
        let mut out: Vec<PerformanceTrend> = history
            .by_provider(provider)
            .map(|(task_type, records)| trends::latency_trend(task_type, records))
            .collect();
        out.sort_by(|a, b| a.task_type.cmp(&b.task_type));
        out
    }

    pub fn detect_anomalies(&self, provider: &str) -> Vec<Anomaly> {
        let history = self.history.read();
        let mut out: Vec<Anomaly> = history
            .by_provider(provider)
            .flat_map(|(task_type, records)| trends::detect_anomalies(provider, task_type, records))
            .collect();
        out.sort_by(|a, b| a.task_type.cmp(&b.task_type).then(a.at.cmp(&b.at)));
        out
    }

    /// Side-by-side metrics ranked by score.
    pub fn compare_providers(&self, task_type: &str, providers: &[String]) -> AnalyticsResult<Vec<ProviderComparison>> {
        if providers.is_empty() {
            return Err(AnalyticsError::NoCandidates);
        }
        let ranked = self.rank(task_type, providers)?;
        let history = self.history.read();
        Ok(ranked
            .into_iter()
            .enumerate()
            .map(|(i, scored)| {
                let agg = history.aggregate(task_type, &scored.provider);
                ProviderComparison {
                    rank: i + 1,
                    score: scored.score,
                    samples: scored.samples,
                    success_rate: agg.as_ref().map(|a| a.success_rate),
                    avg_response_ms: agg.as_ref().and_then(|a| a.avg_response_ms),
                    avg_cost: agg.as_ref().and_then(|a| a.avg_cost),
                    avg_confidence: agg.as_ref().and_then(|a| a.avg_confidence),
                    provider: scored.provider,
                }
            })
            .collect())
    }

    /// Efficiency across every task type; `None` without history.
    pub fn provider_efficiency(&self, provider: &str) -> Option<ProviderEfficiency> {
        let history = self.history.read();
        let agg = HistoryAggregate::from_records(history.by_provider(provider).flat_map(|(_, q)| q.iter()))?;
        let speed = agg
            .avg_response_ms
            .map_or(0.0, |ms| (1.0 - ms / EFFICIENCY_LATENCY_CEILING_MS).max(0.0));
        let cost_efficiency = 1.0 / (1.0 + agg.avg_cost.unwrap_or(0.0) * 100.0);
        let reliability = agg.success_rate;
        Some(ProviderEfficiency {
            provider: provider.to_string(),
            reliability,
            speed,
            cost_efficiency,
            score: 0.4 * reliability + 0.3 * speed + 0.3 * cost_efficiency,
            samples: agg.samples,
        })
    }

    /// Prediction, cost prediction for the recommended provider and load context.
    pub fn routing_recommendation(
        &self,
        task: &Task,
        providers: &[String],
        load: SystemLoad,
        fallback_costs: &HashMap<String, f64>,
        now: DateTime<Utc>,
    ) -> AnalyticsResult<RoutingRecommendation> {
        let prediction = self.predict_optimal_provider(task, providers)?;
        let fallback = fallback_costs.get(&prediction.provider).copied().unwrap_or(0.0);
        let cost = self.predict_task_cost(task, &prediction.provider, fallback);
        Ok(RoutingRecommendation {
            prediction,
            cost,
            load,
            generated_at: now,
        })
    }

    /// Score every provider for a task type, best first. Ties keep input order.
    fn rank(&self, task_type: &str, providers: &[String]) -> AnalyticsResult<Vec<ScoredProvider>> {
        let history = self.history.read();
        let aggregates: Vec<Option<HistoryAggregate>> =
            providers.iter().map(|p| history.aggregate(task_type, p)).collect();
        drop(history);

        let fastest = aggregates
            .iter()
            .flatten()
            .filter_map(|a| a.avg_response_ms)
            .fold(f64::INFINITY, f64::min);
        let cheapest = aggregates
            .iter()
            .flatten()
            .filter_map(|a| a.avg_cost)
            .fold(f64::INFINITY, f64::min);

        let mut scored = Vec::with_capacity(providers.len());
        for (provider, agg) in providers.iter().zip(&aggregates) {
            let signals = match agg {
                None => ProviderSignals::neutral(),
                Some(a) => ProviderSignals {
                    performance: a
                        .avg_response_ms
                        .map_or(scoring::NEUTRAL_SIGNAL, |own| ratio(fastest, own)),
                    cost: a.avg_cost.map_or(scoring::NEUTRAL_SIGNAL, |own| ratio(cheapest, own)),
                    reliability: a.success_rate,
                    quality: a.avg_confidence.unwrap_or(scoring::NEUTRAL_SIGNAL),
                },
            };
            let score = self.model.score(provider, &signals)?;
            scored.push(ScoredProvider {
                provider: provider.clone(),
                score,
                signals,
                samples: agg.as_ref().map_or(0, |a| a.samples),
            });
        }
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored)
    }
}

impl Default for PredictiveAnalytics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PredictiveAnalytics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictiveAnalytics")
            .field("model", &self.model.name())
            .field("records", &self.total_records())
            .finish()
    }
}

/// `best / own` for lower-is-better metrics; a zero `own` scores 1.
fn ratio(best: f64, own: f64) -> f64 {
    if own <= 0.0 {
        1.0
    } else {
        (best / own).clamp(0.0, 1.0)
    }
}
