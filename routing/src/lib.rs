//! Provider Routing Library
//!
//! Routes tasks to interchangeable backend providers and keeps routing
//! healthy under failure:
//! - Policy-based candidate selection with conditional provider preferences
//! - Pluggable load balancing (round robin, weighted random, least
//!   connections, response time, cost optimized)
//! - A per-provider circuit breaker over a sliding outcome window
//! - Cost estimation, a rolling 24h cost ledger and daily budget status
//! - Retry with exponential backoff and policy-driven failover
//! - Optional predictive analytics ranking providers from execution history
//!
//! # Usage
//!
//! ```rust,ignore
//! use routing::{NoopProvider, ProviderProfile, Router, RouterConfig, Task};
//! use std::sync::Arc;
//!
//! let router = Router::new(RouterConfig::default());
//! router.register_with_profile("echo", Arc::new(NoopProvider::new()), ProviderProfile::noop())?;
//! let outcome = router.execute(&Task::new("chat", "hello")).await?;
//! println!("{} answered via {}", outcome.decision.provider, outcome.decision.reason);
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod analytics;
pub mod balancer;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod cost;
pub mod error;
pub mod flags;
pub mod ledger;
pub mod policy;
pub mod provider;
pub mod router;
pub mod stats;
pub mod task;

// Re-export key routing types
pub use router::{
    DecisionSource, EventBus, ExecutionOutcome, Router, RouterStats, RoutingDecision, RoutingEvent,
};

pub use config::{ConfigError, RetryConfig, RouterConfig};
pub use error::{ErrorClass, ProviderError, RoutingError, RoutingResult};
pub use task::{Task, TaskConstraints, TaskOutput};

// Re-export provider contract and adapters
pub use provider::{
    HttpProvider, HttpProviderConfig, LocalEngineConfig, LocalEngineProvider, NoopProvider,
    Provider, ProviderClass, ProviderProfile, SharedProvider,
};

// Re-export policy types
pub use policy::{
    ConditionField, ConditionOperator, ConditionValue, FailoverConfig, PolicyCondition,
    ProviderPreference, RoutingPolicy,
};

pub use analytics::{
    AnalyticsError, BudgetConfig, BudgetState, BudgetStatus, PredictiveAnalytics, ScoringModel,
    WeightedEnsemble,
};
pub use balancer::LoadBalancingStrategy;
pub use circuit_breaker::{CircuitBreakerConfig, CircuitState};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use flags::{EnvProviderFlags, ProviderFlags, StaticProviderFlags};
pub use stats::ProviderStatsSnapshot;
