//! Structured error types for the analytics module.
//!
//! The router never surfaces these to callers; it downgrades them to a
//! fallback annotation on the routing decision.

/// Errors from predictive analytics.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalyticsError {
    /// Prediction was asked to choose among zero providers.
    #[error("no candidate providers to score")]
    NoCandidates,

    /// None of the candidates has history for the task type.
    #[error("insufficient history for task type '{task_type}'")]
    InsufficientData { task_type: String },

    /// The scoring model rejected its input.
    #[error("scoring model '{model}' failed: {reason}")]
    Scoring { model: String, reason: String },
}

/// Result type alias for analytics operations.
pub type AnalyticsResult<T> = Result<T, AnalyticsError>;
