//! Provider scoring.
//!
//! Signals are normalized to `0..=1` before they reach a [`ScoringModel`];
//! the default [`WeightedEnsemble`] is a fixed linear blend, not a trained
//! model.

use super::error::{AnalyticsError, AnalyticsResult};
use serde::{Deserialize, Serialize};

/// Value used for a signal with no data behind it.
pub const NEUTRAL_SIGNAL: f64 = 0.5;

/// Which signal a provider is strongest in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Performance,
    Cost,
    Reliability,
    Quality,
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Performance => write!(f, "performance"),
            Self::Cost => write!(f, "cost"),
            Self::Reliability => write!(f, "reliability"),
            Self::Quality => write!(f, "quality"),
        }
    }
}

/// Normalized inputs for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProviderSignals {
    pub performance: f64,
    pub cost: f64,
    pub reliability: f64,
    pub quality: f64,
}

impl ProviderSignals {
    pub fn neutral() -> Self {
        Self {
            performance: NEUTRAL_SIGNAL,
            cost: NEUTRAL_SIGNAL,
            reliability: NEUTRAL_SIGNAL,
            quality: NEUTRAL_SIGNAL,
        }
    }

    /// Strongest signal; earlier variants win ties.
    pub fn primary_strength(&self) -> Signal {
        [
            (Signal::Performance, self.performance),
            (Signal::Cost, self.cost),
            (Signal::Reliability, self.reliability),
            (Signal::Quality, self.quality),
        ]
        .into_iter()
        .fold((Signal::Performance, f64::MIN), |best, (signal, value)| {
            if value > best.1 {
                (signal, value)
            } else {
                best
            }
        })
        .0
    }

    fn values(&self) -> [f64; 4] {
        [self.performance, self.cost, self.reliability, self.quality]
    }
}

impl Default for ProviderSignals {
    fn default() -> Self {
        Self::neutral()
    }
}

/// Turns signals into a single score. Higher is better.
pub trait ScoringModel: Send + Sync {
    fn name(&self) -> &str;

    fn score(&self, provider: &str, signals: &ProviderSignals) -> AnalyticsResult<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleWeights {
    pub performance: f64,
    pub cost: f64,
    pub reliability: f64,
    pub quality: f64,
}

impl Default for EnsembleWeights {
    fn default() -> Self {
        Self {
            performance: 0.30,
            cost: 0.25,
            reliability: 0.25,
            quality: 0.20,
        }
    }
}

/// `Σ weight·signal` over the four signals.
#[derive(Debug, Clone, Default)]
pub struct WeightedEnsemble {
    weights: EnsembleWeights,
}

impl WeightedEnsemble {
    pub fn new(weights: EnsembleWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &EnsembleWeights {
        &self.weights
    }
}

impl ScoringModel for WeightedEnsemble {
    fn name(&self) -> &str {
        "weighted_ensemble"
    }

    fn score(&self, provider: &str, signals: &ProviderSignals) -> AnalyticsResult<f64> {
        if signals.values().iter().any(|v| !v.is_finite()) {
            return Err(AnalyticsError::Scoring {
                model: self.name().to_string(),
                reason: format!("non-finite signal for provider '{provider}'"),
            });
        }
        let w = &self.weights;
        Ok(w.performance * signals.performance
            + w.cost * signals.cost
            + w.reliability * signals.reliability
            + w.quality * signals.quality)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_scores_half() {
        let model = WeightedEnsemble::default();
        let score = model.score("a", &ProviderSignals::neutral()).unwrap();
        assert!((score - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_weights_applied() {
        let model = WeightedEnsemble::default();
        let signals = ProviderSignals {
            performance: 1.0,
            cost: 0.0,
            reliability: 1.0,
            quality: 0.0,
        };
        let score = model.score("a", &signals).unwrap();
        assert!((score - 0.55).abs() < 1e-12);
    }

    #[test]
    fn test_non_finite_signal_is_error() {
        let model = WeightedEnsemble::default();
        let signals = ProviderSignals {
            cost: f64::NAN,
            ..ProviderSignals::neutral()
        };
        assert!(matches!(
            model.score("a", &signals),
            Err(AnalyticsError::Scoring { .. })
        ));
    }

    #[test]
    fn test_primary_strength() {
        let signals = ProviderSignals {
            performance: 0.2,
            cost: 0.9,
            reliability: 0.9,
            quality: 0.1,
        };
        assert_eq!(signals.primary_strength(), Signal::Cost);
        assert_eq!(ProviderSignals::neutral().primary_strength(), Signal::Performance);
    }
}
