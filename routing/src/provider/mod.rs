//! Provider contract and typed backend adapters.
//!
//! A provider is anything that can run a [`Task`] and optionally answer a
//! health probe. The router never looks inside a provider; everything it
//! needs for estimation comes from the [`ProviderProfile`] supplied at
//! registration.
//!
//! | Adapter | Backend | Class |
//! |---|---|---|
//! | [`HttpProvider`] | OpenAI-compatible `/chat/completions` endpoint | remote |
//! | [`LocalEngineProvider`] | local inference binary over stdin/stdout | local |
//! | [`NoopProvider`] | echoes the task content | noop |

pub mod http;
pub mod local;
pub mod noop;

pub use http::{HttpProvider, HttpProviderConfig};
pub use local::{LocalEngineConfig, LocalEngineProvider};
pub use noop::NoopProvider;

use crate::error::ProviderError;
use crate::task::{Task, TaskOutput};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Uniform execution contract for every backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Run the task. Failures must be classified so the router can decide
    /// whether to retry.
    async fn run(&self, task: &Task) -> Result<TaskOutput, ProviderError>;

    /// Cheap liveness probe. Providers without one report healthy.
    async fn health_check(&self) -> bool {
        true
    }
}

/// Shared provider handle.
pub type SharedProvider = Arc<dyn Provider>;

/// Broad backend class; selects estimation defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderClass {
    /// Paid model backend reached over the network.
    #[default]
    Remote,
    /// Engine running on this host; free.
    Local,
    /// Test engine; free and instant.
    Noop,
}

impl ProviderClass {
    /// Response time assumed before any sample exists.
    pub fn default_response_ms(self) -> u64 {
        match self {
            Self::Remote => 2_000,
            Self::Local => 500,
            Self::Noop => 10,
        }
    }

    /// USD per approximate token.
    pub fn default_cost_per_token(self) -> f64 {
        match self {
            Self::Remote => 0.000_02,
            Self::Local | Self::Noop => 0.0,
        }
    }
}

impl std::fmt::Display for ProviderClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote => write!(f, "remote"),
            Self::Local => write!(f, "local"),
            Self::Noop => write!(f, "noop"),
        }
    }
}

/// Static estimation inputs attached to a registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub class: ProviderClass,
    /// USD per approximate token. Always zero for local and no-op classes.
    pub cost_per_token: f64,
    pub default_response_ms: u64,
}

impl ProviderProfile {
    pub fn for_class(class: ProviderClass) -> Self {
        Self {
            class,
            cost_per_token: class.default_cost_per_token(),
            default_response_ms: class.default_response_ms(),
        }
    }

    pub fn remote(cost_per_token: f64) -> Self {
        Self::for_class(ProviderClass::Remote).with_cost_per_token(cost_per_token)
    }

    pub fn local() -> Self {
        Self::for_class(ProviderClass::Local)
    }

    pub fn noop() -> Self {
        Self::for_class(ProviderClass::Noop)
    }

    /// Remote providers only; local and no-op stay free.
    pub fn with_cost_per_token(mut self, cost_per_token: f64) -> Self {
        if self.class == ProviderClass::Remote {
            self.cost_per_token = cost_per_token.max(0.0);
        }
        self
    }

    pub fn with_default_response_ms(mut self, ms: u64) -> Self {
        self.default_response_ms = ms;
        self
    }
}

impl Default for ProviderProfile {
    fn default() -> Self {
        Self::for_class(ProviderClass::Remote)
    }
}
