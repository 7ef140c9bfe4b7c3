//! Error taxonomy for provider execution and routing.
//!
//! Providers fail with a [`ProviderError`]; the router classifies it into an
//! [`ErrorClass`] to decide whether another attempt is allowed, and surfaces
//! a [`RoutingError`] that keeps the provider error as its source.

use serde::{Deserialize, Serialize};

/// Failure reported by a provider's `run`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The task is malformed for this backend. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("provider failed: {0}")]
    Failed(String),
}

impl ProviderError {
    /// Classify for retry purposes.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation(_) => ErrorClass::Validation,
            Self::Timeout(_) | Self::Network(_) => ErrorClass::Transient,
            Self::RateLimited(_) => ErrorClass::RateLimit,
            Self::Failed(_) => ErrorClass::Provider,
        }
    }
}

/// Retry classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Validation,
    Transient,
    RateLimit,
    Provider,
}

/// Rate-limited attempts are only retried while the attempt number is at most this.
pub const RATE_LIMIT_RETRY_ATTEMPTS: u32 = 2;

impl ErrorClass {
    /// Whether a failure on `attempt` (1-based) may be followed by another attempt.
    ///
    /// The caller still checks the remaining attempt budget.
    pub fn should_retry(self, attempt: u32) -> bool {
        match self {
            Self::Validation => false,
            Self::Transient => true,
            Self::RateLimit => attempt <= RATE_LIMIT_RETRY_ATTEMPTS,
            Self::Provider => true,
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Transient => write!(f, "transient"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Provider => write!(f, "provider"),
        }
    }
}

/// Errors surfaced by the router.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    /// The task failed validation before any provider was consulted.
    #[error("invalid task: {0}")]
    InvalidTask(String),

    /// Every registered provider is circuit-open or flag-disabled.
    #[error("no providers available: {0}")]
    NoProvidersAvailable(String),

    /// A failure that must not be retried.
    #[error("provider '{provider}' rejected task on attempt {attempts}")]
    Rejected {
        provider: String,
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    /// The attempt budget ran out; wraps the last failure.
    #[error("retries exhausted after {attempts} attempts (last provider '{provider}')")]
    ExhaustedRetries {
        provider: String,
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("provider already registered: {0}")]
    DuplicateProvider(String),

    #[error("invalid policy: {0}")]
    InvalidPolicy(String),
}

impl RoutingError {
    /// The provider failure behind this error, if any.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Self::Rejected { source, .. } | Self::ExhaustedRetries { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Attempts consumed before the error surfaced.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Rejected { attempts, .. } | Self::ExhaustedRetries { attempts, .. } => *attempts,
            _ => 0,
        }
    }
}

/// Result type for routing operations.
pub type RoutingResult<T> = Result<T, RoutingError>;
