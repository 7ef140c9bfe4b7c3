//! Latency trends and statistical outliers.

use super::history::ExecutionRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Largest sub-window compared by trend analysis.
pub const MAX_TREND_WINDOW: usize = 20;
/// Relative latency shift below which a trend is stable.
pub const TREND_THRESHOLD: f64 = 0.05;
/// Fewer samples than this yield a stable, insufficient-data trend.
pub const MIN_TREND_SAMPLES: usize = 4;

pub const ANOMALY_SIGMA: f64 = 3.0;
pub const CRITICAL_SIGMA: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Declining,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceTrend {
    pub task_type: String,
    pub direction: TrendDirection,
    /// Relative latency change from the early to the recent window.
    pub change: f64,
    pub early_avg_ms: Option<f64>,
    pub recent_avg_ms: Option<f64>,
    pub samples: usize,
    pub insufficient_data: bool,
}

/// Compare the earliest and most recent windows of latency.
pub fn latency_trend(task_type: &str, records: &VecDeque<ExecutionRecord>) -> PerformanceTrend {
    let samples = records.len();
    let mut trend = PerformanceTrend {
        task_type: task_type.to_string(),
        direction: TrendDirection::Stable,
        change: 0.0,
        early_avg_ms: None,
        recent_avg_ms: None,
        samples,
        insufficient_data: samples < MIN_TREND_SAMPLES,
    };
    if trend.insufficient_data {
        return trend;
    }

    let window = (samples / 2).min(MAX_TREND_WINDOW);
    let early = mean(records.iter().take(window).map(|r| r.response_ms));
    let recent = mean(records.iter().skip(samples - window).map(|r| r.response_ms));
    trend.early_avg_ms = Some(early);
    trend.recent_avg_ms = Some(recent);

    if early > 0.0 {
        trend.change = (recent - early) / early;
        trend.direction = if trend.change < -TREND_THRESHOLD {
            TrendDirection::Improving
        } else if trend.change > TREND_THRESHOLD {
            TrendDirection::Declining
        } else {
            TrendDirection::Stable
        };
    }
    trend
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyMetric {
    Latency,
    Cost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalySeverity {
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub provider: String,
    pub task_type: String,
    pub metric: AnomalyMetric,
    pub value: f64,
    pub mean: f64,
    pub std_dev: f64,
    /// |value − mean| in standard deviations.
    pub deviations: f64,
    pub severity: AnomalySeverity,
    pub at: DateTime<Utc>,
}

/// Latency and cost values more than three standard deviations from the mean.
pub fn detect_anomalies(
    provider: &str,
    task_type: &str,
    records: &VecDeque<ExecutionRecord>,
) -> Vec<Anomaly> {
    let mut found = Vec::new();
    for metric in [AnomalyMetric::Latency, AnomalyMetric::Cost] {
        let value_of = |r: &ExecutionRecord| match metric {
            AnomalyMetric::Latency => r.response_ms,
            AnomalyMetric::Cost => r.cost,
        };
        let values: Vec<f64> = records.iter().map(value_of).collect();
        let Some((avg, sd)) = mean_and_std_dev(&values) else {
            continue;
        };
        if sd <= f64::EPSILON {
            continue;
        }
        for record in records {
            let value = value_of(record);
            let deviations = (value - avg).abs() / sd;
            if deviations > ANOMALY_SIGMA {
                found.push(Anomaly {
                    provider: provider.to_string(),
                    task_type: task_type.to_string(),
                    metric,
                    value,
                    mean: avg,
                    std_dev: sd,
                    deviations,
                    severity: if deviations > CRITICAL_SIGMA {
                        AnomalySeverity::Critical
                    } else {
                        AnomalySeverity::High
                    },
                    at: record.at,
                });
            }
        }
    }
    found
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// Mean and sample standard deviation; `None` below three values.
pub(crate) fn mean_and_std_dev(values: &[f64]) -> Option<(f64, f64)> {
    if values.len() < 3 {
        return None;
    }
    let n = values.len() as f64;
    let avg = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / (n - 1.0);
    Some((avg, variance.sqrt()))
}
