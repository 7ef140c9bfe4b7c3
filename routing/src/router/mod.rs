//! Provider router.
//!
//! Picks a provider for each task and runs it with retry and failover:
//!
//! ```text
//! registered ─▶ flag-enabled ─▶ circuit not open ─▶ policies ─▶ [analytics] ─▶ balancer
//! ```
//!
//! Every attempt re-runs the whole pipeline, so a provider whose circuit
//! opened during a retry loop is no longer chosen. Outcomes feed back into
//! per-provider stats, the cost ledger and (when enabled) analytics history,
//! and every notable step is published on the event bus.

pub mod decision;
pub mod events;
pub mod retry;

pub use decision::{DecisionSource, ExecutionOutcome, RouterStats, RoutingDecision};
pub use events::{EventBus, RoutingEvent};

use crate::analytics::{
    AnalyticsError, BudgetStatus, ExecutionRecord, PredictiveAnalytics, RoutingRecommendation,
    SystemLoad,
};
use crate::balancer::{LoadBalancer, SelectionContext};
use crate::circuit_breaker::{CircuitState, CircuitTransition};
use crate::clock::{SharedClock, SystemClock};
use crate::config::RouterConfig;
use crate::cost::CostModel;
use crate::error::{RoutingError, RoutingResult};
use crate::flags::{EnvProviderFlags, ProviderFlags};
use crate::ledger::{CostLedger, SpendSummary};
use crate::policy::{FailoverConfig, PolicyContext, PolicyEngine, RoutingPolicy};
use crate::provider::{ProviderProfile, SharedProvider};
use crate::stats::{ProviderStats, ProviderStatsSnapshot};
use crate::task::Task;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Confidence reported for a provider chosen without any history.
const NO_HISTORY_CONFIDENCE: f64 = 0.5;

struct ProviderEntry {
    provider: SharedProvider,
    profile: ProviderProfile,
    stats: Arc<Mutex<ProviderStats>>,
}

/// Registry view taken at the start of a decision.
struct CandidateView {
    /// Registered and flag-enabled, sorted by name.
    enabled: Vec<String>,
    /// Enabled with a circuit that is not open.
    available: Vec<String>,
    stats: HashMap<String, ProviderStatsSnapshot>,
    profiles: HashMap<String, ProviderProfile>,
}

/// A decision plus the handles needed to act on it.
struct Routed {
    decision: RoutingDecision,
    failover: Option<FailoverConfig>,
    provider: SharedProvider,
    stats: Arc<Mutex<ProviderStats>>,
}

pub struct Router {
    config: RouterConfig,
    clock: SharedClock,
    flags: Arc<dyn ProviderFlags>,
    providers: RwLock<HashMap<String, ProviderEntry>>,
    policies: RwLock<PolicyEngine>,
    balancer: LoadBalancer,
    cost_model: CostModel,
    ledger: Arc<CostLedger>,
    analytics: PredictiveAnalytics,
    analytics_enabled: AtomicBool,
    events: EventBus,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        let mut engine = PolicyEngine::new();
        for policy in &config.policies {
            match policy.validate() {
                Ok(()) => {
                    engine.upsert(policy.clone());
                }
                Err(e) => warn!(policy = %policy.name, error = %e, "skipping invalid policy"),
            }
        }
        let retention = chrono::Duration::hours(config.ledger_retention_hours);
        Self {
            analytics_enabled: AtomicBool::new(config.analytics_enabled),
            clock: Arc::new(SystemClock),
            flags: Arc::new(EnvProviderFlags),
            providers: RwLock::new(HashMap::new()),
            policies: RwLock::new(engine),
            balancer: LoadBalancer::new(),
            cost_model: CostModel::default(),
            ledger: Arc::new(CostLedger::new(retention)),
            analytics: PredictiveAnalytics::new(),
            events: EventBus::new(),
            config,
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_flags(mut self, flags: Arc<dyn ProviderFlags>) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_cost_model(mut self, cost_model: CostModel) -> Self {
        self.cost_model = cost_model;
        self
    }

    /// Replace the analytics engine (e.g. to swap the scoring model).
    pub fn with_analytics(mut self, analytics: PredictiveAnalytics) -> Self {
        self.analytics = analytics;
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    // --- registration ---

    /// Register with remote-class estimation defaults.
    pub fn register(&self, name: impl Into<String>, provider: SharedProvider) -> RoutingResult<()> {
        self.register_with_profile(name, provider, ProviderProfile::default())
    }

    pub fn register_with_profile(
        &self,
        name: impl Into<String>,
        provider: SharedProvider,
        profile: ProviderProfile,
    ) -> RoutingResult<()> {
        let name = name.into();
        {
            let mut providers = self.providers.write();
            if providers.contains_key(&name) {
                return Err(RoutingError::DuplicateProvider(name));
            }
            info!(provider = %name, class = %profile.class, "registered provider");
            providers.insert(
                name.clone(),
                ProviderEntry {
                    provider,
                    profile,
                    stats: Arc::new(Mutex::new(ProviderStats::new(self.config.circuit_breaker.clone()))),
                },
            );
        }
        self.events.publish(RoutingEvent::ProviderRegistered {
            provider: name,
            at: self.clock.now(),
        });
        Ok(())
    }

    /// Remove a provider and its stats. Ledger entries stay until they expire.
    pub fn unregister(&self, name: &str) -> RoutingResult<()> {
        if self.providers.write().remove(name).is_none() {
            return Err(RoutingError::UnknownProvider(name.to_string()));
        }
        info!(provider = %name, "unregistered provider");
        self.events.publish(RoutingEvent::ProviderUnregistered {
            provider: name.to_string(),
            at: self.clock.now(),
        });
        Ok(())
    }

    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.read().keys().cloned().collect();
        names.sort();
        names
    }

    // --- policies ---

    /// Insert or replace by name. Returns `true` when a policy was replaced.
    pub fn add_policy(&self, policy: RoutingPolicy) -> RoutingResult<bool> {
        policy.validate().map_err(RoutingError::InvalidPolicy)?;
        let name = policy.name.clone();
        let replaced = self.policies.write().upsert(policy);
        debug!(policy = %name, replaced, "policy upserted");
        self.events.publish(RoutingEvent::PolicyUpserted {
            policy: name,
            replaced,
            at: self.clock.now(),
        });
        Ok(replaced)
    }

    pub fn remove_policy(&self, name: &str) -> Option<RoutingPolicy> {
        self.policies.write().remove(name)
    }

    /// Policies in evaluation order.
    pub fn policies(&self) -> Vec<RoutingPolicy> {
        self.policies.read().policies().to_vec()
    }

    // --- analytics ---

    pub fn enable_analytics(&self) {
        self.analytics_enabled.store(true, Ordering::Relaxed);
        info!("predictive analytics enabled");
    }

    pub fn disable_analytics(&self) {
        self.analytics_enabled.store(false, Ordering::Relaxed);
        info!("predictive analytics disabled");
    }

    pub fn analytics_enabled(&self) -> bool {
        self.analytics_enabled.load(Ordering::Relaxed)
    }

    /// The analytics engine, while enabled.
    pub fn analytics(&self) -> Option<&PredictiveAnalytics> {
        self.analytics_enabled().then_some(&self.analytics)
    }

    /// Analytics recommendation for `task` over the enabled providers.
    pub fn recommend(&self, task: &Task) -> Result<RoutingRecommendation, AnalyticsError> {
        let now = self.clock.now();
        let view = self.candidate_view(now);
        let costs = self.estimated_costs(task, &view.enabled, &view.profiles);
        let load = SystemLoad {
            registered_providers: view.stats.len(),
            open_circuits: view
                .stats
                .values()
                .filter(|s| s.circuit_state == CircuitState::Open)
                .count(),
            active_connections: view.stats.values().map(|s| s.active_connections).sum(),
        };
        self.analytics
            .routing_recommendation(task, &view.enabled, load, &costs, now)
    }

    // --- introspection ---

    pub fn stats(&self) -> RouterStats {
        let now = self.clock.now();
        let providers = self.providers.read();
        let snapshots = providers
            .iter()
            .map(|(name, entry)| (name.clone(), self.observe(name, &entry.stats, now).1))
            .collect();
        drop(providers);
        RouterStats {
            providers: snapshots,
            policies: self.policies.read().names(),
            analytics_enabled: self.analytics_enabled(),
            spent_in_window: self.ledger.summary(now).total,
        }
    }

    pub fn provider_stats(&self, name: &str) -> Option<ProviderStatsSnapshot> {
        let now = self.clock.now();
        let providers = self.providers.read();
        let entry = providers.get(name)?;
        Some(self.observe(name, &entry.stats, now).1)
    }

    /// Force a provider's circuit closed.
    pub fn reset_circuit(&self, name: &str) -> RoutingResult<()> {
        let stats = self
            .providers
            .read()
            .get(name)
            .map(|e| Arc::clone(&e.stats))
            .ok_or_else(|| RoutingError::UnknownProvider(name.to_string()))?;
        let transition = stats.lock().reset_circuit();
        self.publish_transition(name, transition, self.clock.now());
        Ok(())
    }

    /// Probe every provider concurrently.
    pub async fn check_health(&self) -> BTreeMap<String, bool> {
        let providers: Vec<(String, SharedProvider)> = self
            .providers
            .read()
            .iter()
            .map(|(name, entry)| (name.clone(), Arc::clone(&entry.provider)))
            .collect();
        let probes = providers.into_iter().map(|(name, provider)| async move {
            let healthy = provider.health_check().await;
            if !healthy {
                warn!(provider = %name, "health check failed");
            }
            (name, healthy)
        });
        futures::future::join_all(probes).await.into_iter().collect()
    }

    pub fn ledger(&self) -> &CostLedger {
        &self.ledger
    }

    pub fn spend_summary(&self) -> SpendSummary {
        self.ledger.summary(self.clock.now())
    }

    /// Spend against the configured daily budget; `None` without one.
    pub fn budget_status(&self) -> Option<BudgetStatus> {
        let budget = self.config.budget.as_ref()?;
        let status = self
            .analytics
            .budget_status(&self.ledger, budget, self.clock.now());
        if status.state != crate::analytics::BudgetState::Healthy {
            warn!(
                state = %status.state,
                spent = status.spent,
                limit = status.daily_limit,
                "budget threshold reached"
            );
        }
        Some(status)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoutingEvent> {
        self.events.subscribe()
    }

    /// Prune expired ledger entries every `ledger_prune_interval_secs`.
    pub fn spawn_ledger_pruner(&self) -> JoinHandle<()> {
        let ledger = Arc::clone(&self.ledger);
        let clock = Arc::clone(&self.clock);
        let period = Duration::from_secs(self.config.ledger_prune_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let removed = ledger.prune(clock.now());
                if removed > 0 {
                    debug!(removed, "pruned expired ledger entries");
                }
            }
        })
    }

    // --- routing ---

    /// Choose a provider without running the task.
    pub fn route(&self, task: &Task) -> RoutingResult<RoutingDecision> {
        task.validate().map_err(RoutingError::InvalidTask)?;
        self.decide(task, 1, &[]).map(|routed| routed.decision)
    }

    /// Route and run `task`, retrying and failing over per the retry rules.
    pub async fn execute(&self, task: &Task) -> RoutingResult<ExecutionOutcome> {
        task.validate().map_err(RoutingError::InvalidTask)?;
        let tokens = self.cost_model.estimate_tokens(task);
        let mut failed: Vec<String> = Vec::new();
        let mut max_attempts: Option<u32> = None;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let routed = self.decide(task, attempt, &failed)?;
            let budget = *max_attempts.get_or_insert_with(|| {
                let policy_max = routed.failover.as_ref().and_then(|f| f.max_retries);
                retry::max_attempts(task, policy_max, &self.config.retry)
            });
            let base_delay_ms = routed
                .failover
                .as_ref()
                .and_then(|f| f.retry_delay_ms)
                .unwrap_or(self.config.retry.base_delay_ms);
            let name = routed.decision.provider.clone();

            routed.stats.lock().execution_start();
            self.events.publish(RoutingEvent::ExecutionStarted {
                task_id: task.id,
                provider: name.clone(),
                attempt,
                at: self.clock.now(),
            });

            let started = tokio::time::Instant::now();
            let result = routed.provider.run(task).await;
            let response_ms = started.elapsed().as_secs_f64() * 1_000.0;
            let now = self.clock.now();

            match result {
                Ok(output) => {
                    let cost = output.cost.unwrap_or(routed.decision.estimated_cost);
                    let transition = routed
                        .stats
                        .lock()
                        .execution_success(now, response_ms, cost, output.confidence);
                    self.publish_transition(&name, transition, now);
                    self.ledger.record(&name, cost, now);
                    if self.analytics_enabled() {
                        self.analytics.record_execution(
                            &task.task_type,
                            &name,
                            ExecutionRecord::success(now, response_ms, cost, tokens)
                                .with_confidence(output.confidence),
                        );
                    }
                    debug!(provider = %name, attempt, response_ms, cost, "task executed");
                    self.events.publish(RoutingEvent::ExecutionSucceeded {
                        task_id: task.id,
                        provider: name,
                        attempt,
                        response_ms,
                        cost,
                        at: now,
                    });
                    return Ok(ExecutionOutcome {
                        output,
                        decision: routed.decision,
                        attempts: attempt,
                        response_ms,
                        cost,
                    });
                }
                Err(error) => {
                    let transition = routed.stats.lock().execution_failure(now);
                    self.publish_transition(&name, transition, now);
                    if self.analytics_enabled() {
                        self.analytics.record_execution(
                            &task.task_type,
                            &name,
                            ExecutionRecord::failure(now, response_ms, tokens),
                        );
                    }

                    let class = error.class();
                    let retryable = class.should_retry(attempt);
                    let will_retry = retryable && attempt < budget;
                    warn!(
                        provider = %name,
                        attempt,
                        max_attempts = budget,
                        class = %class,
                        error = %error,
                        will_retry,
                        "provider execution failed"
                    );
                    self.events.publish(RoutingEvent::ExecutionFailed {
                        task_id: task.id,
                        provider: name.clone(),
                        attempt,
                        class,
                        error: error.to_string(),
                        will_retry,
                        at: now,
                    });

                    if !retryable {
                        return Err(RoutingError::Rejected {
                            provider: name,
                            attempts: attempt,
                            source: error,
                        });
                    }
                    if attempt >= budget {
                        return Err(RoutingError::ExhaustedRetries {
                            provider: name,
                            attempts: attempt,
                            source: error,
                        });
                    }

                    if !failed.contains(&name) {
                        failed.push(name);
                    }
                    let delay = retry::backoff_delay(attempt, base_delay_ms, self.config.retry.max_delay_ms);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off before retry");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One pass of the selection pipeline for `attempt`.
    fn decide(&self, task: &Task, attempt: u32, failed: &[String]) -> RoutingResult<Routed> {
        let now = self.clock.now();
        let view = self.candidate_view(now);
        if view.available.is_empty() {
            return Err(RoutingError::NoProvidersAvailable(format!(
                "{} enabled provider(s), none with a usable circuit",
                view.enabled.len()
            )));
        }

        // Skip providers that already failed this task while others remain.
        let mut candidates = view.available.clone();
        if !failed.is_empty() {
            let remaining: Vec<String> = candidates
                .iter()
                .filter(|p| !failed.contains(p))
                .cloned()
                .collect();
            if !remaining.is_empty() {
                candidates = remaining;
            }
        }

        let costs = self.estimated_costs(task, &candidates, &view.profiles);
        let times: HashMap<String, f64> = candidates
            .iter()
            .filter_map(|p| {
                let profile = view.profiles.get(p)?;
                Some((p.clone(), self.cost_model.estimate_response_ms(profile, view.stats.get(p))))
            })
            .collect();
        let outcome = self.policies.read().evaluate(
            task,
            candidates,
            PolicyContext {
                estimated_costs: &costs,
                estimated_response_ms: &times,
                stats: &view.stats,
            },
        );
        let strategy = outcome.strategy.unwrap_or(self.config.default_strategy);

        let mut fallback_reasons: Vec<String> = Vec::new();
        let mut prediction = None;
        let mut chosen: Option<(String, DecisionSource, String, f64)> = None;

        if self.analytics_enabled() {
            match self.analytics.predict_optimal_provider(task, &view.enabled) {
                Ok(p) => {
                    let rejection = if view
                        .stats
                        .get(&p.provider)
                        .is_some_and(|s| s.circuit_state == CircuitState::Open)
                    {
                        Some(format!("recommended provider '{}' has an open circuit", p.provider))
                    } else if !outcome.candidates.contains(&p.provider) {
                        Some(format!("recommended provider '{}' is not an eligible candidate", p.provider))
                    } else if p.confidence < self.config.min_prediction_confidence {
                        Some(format!(
                            "prediction confidence {:.2} below {:.2}",
                            p.confidence, self.config.min_prediction_confidence
                        ))
                    } else {
                        None
                    };
                    match rejection {
                        None => {
                            chosen = Some((
                                p.provider.clone(),
                                DecisionSource::Analytics,
                                format!(
                                    "analytics recommendation via {} (score {:.2})",
                                    p.model, p.score
                                ),
                                p.confidence,
                            ));
                        }
                        Some(reason) => fallback_reasons.push(reason),
                    }
                    prediction = Some(p);
                }
                Err(e) => fallback_reasons.push(format!("analytics unavailable: {e}")),
            }
            if let Some(reason) = fallback_reasons.first() {
                warn!(task_type = %task.task_type, reason = %reason, "analytics fallback");
                self.events.publish(RoutingEvent::AnalyticsFallback {
                    task_id: task.id,
                    reason: reason.clone(),
                    at: now,
                });
            }
        }

        if chosen.is_none() && !outcome.narrowed() && outcome.candidates.len() > 1 {
            fallback_reasons.push("no policy narrowed the candidate set".to_string());
        }

        if chosen.is_none() && attempt > 1 {
            if let Some(next) = outcome
                .failover
                .as_ref()
                .and_then(|f| f.next_fallback(&outcome.candidates, failed))
            {
                chosen = Some((
                    next.to_string(),
                    DecisionSource::Failover,
                    format!("failover to '{next}' after {} failed attempt(s)", attempt - 1),
                    stats_confidence(view.stats.get(next)),
                ));
            }
        }

        let (provider, source, reason, confidence) = match chosen {
            Some(c) => c,
            None => {
                let ctx = SelectionContext {
                    stats: &view.stats,
                    estimated_costs: &costs,
                };
                let provider = self
                    .balancer
                    .select(strategy, &outcome.candidates, ctx)
                    .ok_or_else(|| RoutingError::NoProvidersAvailable("empty candidate set".to_string()))?;
                let mut reason = format!("{strategy} over {} candidate(s)", outcome.candidates.len());
                if outcome.narrowed() {
                    reason.push_str(&format!(" after policies [{}]", outcome.applied.join(", ")));
                }
                let confidence = stats_confidence(view.stats.get(&provider));
                (provider, DecisionSource::Balancer, reason, confidence)
            }
        };

        let (handle, stats) = {
            let providers = self.providers.read();
            let entry = providers
                .get(&provider)
                .ok_or_else(|| RoutingError::UnknownProvider(provider.clone()))?;
            (Arc::clone(&entry.provider), Arc::clone(&entry.stats))
        };
        stats.lock().route_selected();

        let decision = RoutingDecision {
            task_id: task.id,
            alternatives: outcome
                .candidates
                .iter()
                .filter(|p| **p != provider)
                .cloned()
                .collect(),
            confidence,
            estimated_cost: costs.get(&provider).copied().unwrap_or(0.0),
            estimated_response_ms: times.get(&provider).copied().unwrap_or(0.0),
            strategy,
            applied_policies: outcome.applied.clone(),
            prediction,
            fallback_reason: (!fallback_reasons.is_empty()).then(|| fallback_reasons.join("; ")),
            attempt,
            decided_at: now,
            provider,
            source,
            reason,
        };
        debug!(
            task_id = %task.id,
            provider = %decision.provider,
            attempt,
            source = ?decision.source,
            confidence = decision.confidence,
            "route selected"
        );
        self.events.publish(RoutingEvent::RouteSelected {
            task_id: task.id,
            provider: decision.provider.clone(),
            attempt,
            at: now,
        });

        Ok(Routed {
            decision,
            failover: outcome.failover,
            provider: handle,
            stats,
        })
    }

    fn candidate_view(&self, now: DateTime<Utc>) -> CandidateView {
        let providers = self.providers.read();
        let mut names: Vec<&String> = providers.keys().collect();
        names.sort();

        let mut view = CandidateView {
            enabled: Vec::new(),
            available: Vec::new(),
            stats: HashMap::new(),
            profiles: HashMap::new(),
        };
        for name in names {
            if !self.flags.is_enabled(name) {
                debug!(provider = %name, "provider disabled by flag");
                continue;
            }
            let Some(entry) = providers.get(name) else {
                continue;
            };
            let (state, snapshot) = self.observe(name, &entry.stats, now);
            view.enabled.push(name.clone());
            if state != CircuitState::Open {
                view.available.push(name.clone());
            }
            view.stats.insert(name.clone(), snapshot);
            view.profiles.insert(name.clone(), entry.profile.clone());
        }
        view
    }

    /// Apply any due circuit promotion and snapshot the stats.
    fn observe(
        &self,
        name: &str,
        stats: &Mutex<ProviderStats>,
        now: DateTime<Utc>,
    ) -> (CircuitState, ProviderStatsSnapshot) {
        let (state, snapshot, transition) = {
            let mut stats = stats.lock();
            let (state, transition) = stats.circuit_state(now);
            (state, stats.snapshot(), transition)
        };
        self.publish_transition(name, transition, now);
        (state, snapshot)
    }

    fn estimated_costs(
        &self,
        task: &Task,
        names: &[String],
        profiles: &HashMap<String, ProviderProfile>,
    ) -> HashMap<String, f64> {
        names
            .iter()
            .filter_map(|p| {
                profiles
                    .get(p)
                    .map(|profile| (p.clone(), self.cost_model.estimate_cost(task, profile)))
            })
            .collect()
    }

    fn publish_transition(&self, name: &str, transition: Option<CircuitTransition>, now: DateTime<Utc>) {
        let Some(t) = transition else {
            return;
        };
        match t.to {
            CircuitState::Open => warn!(provider = %name, from = %t.from, "circuit opened"),
            CircuitState::HalfOpen => info!(provider = %name, "circuit half-open, allowing trial requests"),
            CircuitState::Closed => info!(provider = %name, from = %t.from, "circuit closed"),
        }
        self.events.publish(RoutingEvent::CircuitStateChanged {
            provider: name.to_string(),
            from: t.from,
            to: t.to,
            at: now,
        });
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("providers", &self.providers())
            .field("policies", &self.policies.read().names())
            .field("analytics_enabled", &self.analytics_enabled())
            .finish()
    }
}

/// Confidence in a provider from its live stats.
fn stats_confidence(stats: Option<&ProviderStatsSnapshot>) -> f64 {
    let Some(s) = stats.filter(|s| s.has_history()) else {
        return NO_HISTORY_CONFIDENCE;
    };
    let success = s.success_rate.unwrap_or(0.0);
    let speed = s
        .avg_response_ms
        .map_or(0.1, |ms| (1.0 - ms / 10_000.0).max(0.1));
    let quality = s.avg_confidence.unwrap_or(0.5);
    0.5 * success + 0.3 * speed + 0.2 * quality
}
