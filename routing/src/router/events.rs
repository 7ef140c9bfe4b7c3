//! Routing event bus.
//!
//! Pub/sub over a Tokio broadcast channel. Publishing never fails: with no
//! subscribers the event is dropped, and slow subscribers see `Lagged`.

use crate::circuit_breaker::CircuitState;
use crate::error::ErrorClass;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RoutingEvent {
    ProviderRegistered {
        provider: String,
        at: DateTime<Utc>,
    },
    ProviderUnregistered {
        provider: String,
        at: DateTime<Utc>,
    },
    PolicyUpserted {
        policy: String,
        replaced: bool,
        at: DateTime<Utc>,
    },
    RouteSelected {
        task_id: Uuid,
        provider: String,
        attempt: u32,
        at: DateTime<Utc>,
    },
    ExecutionStarted {
        task_id: Uuid,
        provider: String,
        attempt: u32,
        at: DateTime<Utc>,
    },
    ExecutionSucceeded {
        task_id: Uuid,
        provider: String,
        attempt: u32,
        response_ms: f64,
        cost: f64,
        at: DateTime<Utc>,
    },
    ExecutionFailed {
        task_id: Uuid,
        provider: String,
        attempt: u32,
        class: ErrorClass,
        error: String,
        will_retry: bool,
        at: DateTime<Utc>,
    },
    CircuitStateChanged {
        provider: String,
        from: CircuitState,
        to: CircuitState,
        at: DateTime<Utc>,
    },
    AnalyticsFallback {
        task_id: Uuid,
        reason: String,
        at: DateTime<Utc>,
    },
}

impl RoutingEvent {
    /// Short type name for logging.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ProviderRegistered { .. } => "provider_registered",
            Self::ProviderUnregistered { .. } => "provider_unregistered",
            Self::PolicyUpserted { .. } => "policy_upserted",
            Self::RouteSelected { .. } => "route_selected",
            Self::ExecutionStarted { .. } => "execution_started",
            Self::ExecutionSucceeded { .. } => "execution_succeeded",
            Self::ExecutionFailed { .. } => "execution_failed",
            Self::CircuitStateChanged { .. } => "circuit_state_changed",
            Self::AnalyticsFallback { .. } => "analytics_fallback",
        }
    }
}

#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<RoutingEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: RoutingEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(receivers) => trace!(event_type, receivers, "event published"),
            Err(_) => trace!(event_type, "event published (no receivers)"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoutingEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
