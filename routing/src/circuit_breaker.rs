//! Per-provider circuit breaker.
//!
//! The breaker keeps a sliding window of the most recent execution outcomes.
//! When failures inside the window reach the threshold the circuit *opens*
//! and the provider is skipped. Once the cooldown deadline passes the next
//! access promotes the circuit to *half-open*; a run of consecutive successes
//! closes it again while any failure re-opens it with a fresh cooldown.
//!
//! ```text
//!            failures >= threshold            deadline reached
//!  Closed ─────────────────────────▶ Open ─────────────────────▶ HalfOpen
//!    ▲                                 ▲                            │
//!    │      success_threshold ok       │         any failure        │
//!    └─────────────────────────────────┼────────────────────────────┤
//!                                      └────────────────────────────┘
//! ```
//!
//! The cooldown is a deadline checked on access rather than a timer task, so
//! a promotion that has already happened is a no-op and [`CircuitBreaker::reset`]
//! cancels a pending one.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Circuit breaker state for a single provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Healthy, eligible for routing.
    Closed,
    /// Tripped; excluded until the cooldown expires.
    Open,
    /// Cooldown expired, trial requests allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Thresholds shared by every provider's breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures within the window that open the circuit.
    pub failure_threshold: u32,
    /// Number of most recent outcomes considered.
    pub window_size: u32,
    /// Milliseconds an open circuit waits before going half-open.
    pub timeout_ms: u64,
    /// Consecutive half-open successes needed to close.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_size: 10,
            timeout_ms: 60_000,
            success_threshold: 2,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.window_size == 0 {
            return Err("circuit_breaker.window_size must be at least 1".to_string());
        }
        if self.failure_threshold == 0 || self.failure_threshold > self.window_size {
            return Err(format!(
                "circuit_breaker.failure_threshold ({}) must be within 1..={}",
                self.failure_threshold, self.window_size
            ));
        }
        if self.success_threshold == 0 {
            return Err("circuit_breaker.success_threshold must be at least 1".to_string());
        }
        Ok(())
    }
}

/// A state change produced by an event or a deadline check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitTransition {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Circuit breaker owned by one provider's stats.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    /// Recent outcomes, `true` = success. Bounded by `window_size`.
    window: VecDeque<bool>,
    /// When an open circuit becomes eligible for half-open.
    open_until: Option<DateTime<Utc>>,
    half_open_successes: u32,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            window: VecDeque::with_capacity(config.window_size as usize),
            config,
            state: CircuitState::Closed,
            open_until: None,
            half_open_successes: 0,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, promoting Open → HalfOpen if the deadline has passed.
    pub fn poll(&mut self, now: DateTime<Utc>) -> (CircuitState, Option<CircuitTransition>) {
        let transition = match (self.state, self.open_until) {
            (CircuitState::Open, Some(deadline)) if now >= deadline => {
                self.open_until = None;
                self.half_open_successes = 0;
                Some(self.transition_to(CircuitState::HalfOpen))
            }
            _ => None,
        };
        (self.state, transition)
    }

    /// State as last observed, without checking the deadline.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Deadline for the pending half-open promotion, if any.
    pub fn open_until(&self) -> Option<DateTime<Utc>> {
        self.open_until
    }

    /// Whether the provider may be routed to (Closed or HalfOpen).
    pub fn is_available(&mut self, now: DateTime<Utc>) -> bool {
        !matches!(self.poll(now).0, CircuitState::Open)
    }

    /// Failures currently inside the window.
    pub fn window_failures(&self) -> u32 {
        self.window.iter().filter(|ok| !**ok).count() as u32
    }

    /// Record a success.
    pub fn record_success(&mut self, now: DateTime<Utc>) -> Option<CircuitTransition> {
        let (state, promoted) = self.poll(now);
        self.push_outcome(true);
        match state {
            CircuitState::HalfOpen => {
                self.half_open_successes += 1;
                if self.half_open_successes >= self.config.success_threshold {
                    self.window.clear();
                    self.half_open_successes = 0;
                    return Some(self.transition_to(CircuitState::Closed));
                }
                promoted
            }
            // A late success from a request started before the circuit
            // opened does not shorten the cooldown.
            CircuitState::Open | CircuitState::Closed => promoted,
        }
    }

    /// Record a failure.
    pub fn record_failure(&mut self, now: DateTime<Utc>) -> Option<CircuitTransition> {
        let (state, _) = self.poll(now);
        self.push_outcome(false);
        match state {
            CircuitState::Closed => {
                if self.window_failures() >= self.config.failure_threshold {
                    self.open(now);
                    return Some(CircuitTransition {
                        from: CircuitState::Closed,
                        to: CircuitState::Open,
                    });
                }
                None
            }
            CircuitState::HalfOpen => {
                self.open(now);
                Some(CircuitTransition {
                    from: CircuitState::HalfOpen,
                    to: CircuitState::Open,
                })
            }
            CircuitState::Open => {
                // Already open: restart the cooldown.
                self.open_until = Some(now + self.cooldown());
                None
            }
        }
    }

    /// Force the circuit closed, cancelling any pending promotion.
    pub fn reset(&mut self) -> Option<CircuitTransition> {
        self.window.clear();
        self.open_until = None;
        self.half_open_successes = 0;
        if self.state == CircuitState::Closed {
            None
        } else {
            Some(self.transition_to(CircuitState::Closed))
        }
    }

    fn open(&mut self, now: DateTime<Utc>) {
        self.state = CircuitState::Open;
        self.half_open_successes = 0;
        self.open_until = Some(now + self.cooldown());
    }

    fn cooldown(&self) -> Duration {
        Duration::milliseconds(self.config.timeout_ms.min(i64::MAX as u64) as i64)
    }

    fn push_outcome(&mut self, success: bool) {
        if self.window.len() >= self.config.window_size as usize {
            self.window.pop_front();
        }
        self.window.push_back(success);
    }

    fn transition_to(&mut self, to: CircuitState) -> CircuitTransition {
        let from = self.state;
        self.state = to;
        CircuitTransition { from, to }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
