//! Router integration tests: selection, policies, retry and failover.

mod common;

use common::{chat, single_attempt_config, FailingModel, ScriptedProvider};
use routing::{
    DecisionSource, FailoverConfig, ManualClock, PredictiveAnalytics, ProviderError,
    ProviderPreference, ProviderProfile, Router, RouterConfig, RoutingError, RoutingEvent,
    RoutingPolicy, StaticProviderFlags, Task,
};
use std::sync::Arc;
use std::time::Duration;

fn router(config: RouterConfig) -> Router {
    Router::new(config).with_flags(Arc::new(StaticProviderFlags::new()))
}

// ── Selection ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_proven_sole_provider_selected_with_high_confidence() {
    let router = router(RouterConfig::default());
    let a = Arc::new(ScriptedProvider::succeeding("ok").with_delay(200));
    router.register("A", a.clone()).unwrap();

    for _ in 0..10 {
        router.execute(&chat("hello")).await.unwrap();
    }
    let stats = router.provider_stats("A").unwrap();
    assert_eq!(stats.success_count, 10);
    assert!(stats.avg_response_ms.unwrap() >= 200.0);

    let decision = router.route(&chat("hello")).unwrap();
    assert_eq!(decision.provider, "A");
    assert!(decision.confidence > 0.5, "confidence {}", decision.confidence);
}

#[tokio::test]
async fn test_success_and_failure_never_exceed_total() {
    let mut config = RouterConfig::default();
    config.retry.base_delay_ms = 0;
    config.circuit_breaker.failure_threshold = 10;
    let router = router(config);
    let flaky = Arc::new(ScriptedProvider::scripted(
        vec![
            Err(ProviderError::Failed("boom".into())),
            Ok(routing::TaskOutput::new("ok")),
            Err(ProviderError::Network("reset".into())),
        ],
        Ok(routing::TaskOutput::new("ok")),
    ));
    let steady = Arc::new(ScriptedProvider::succeeding("ok"));
    router.register("flaky", flaky).unwrap();
    router.register("steady", steady).unwrap();

    for _ in 0..20 {
        let _ = router.execute(&chat("x")).await;
        router.route(&chat("x")).unwrap();
        for s in router.stats().providers.values() {
            assert!(s.success_count + s.failure_count <= s.total_requests);
        }
    }
}

#[tokio::test]
async fn test_malformed_task_rejected_before_routing() {
    let router = router(RouterConfig::default());
    let a = Arc::new(ScriptedProvider::succeeding("ok"));
    router.register("a", a.clone()).unwrap();

    let err = router.execute(&Task::new("", "content")).await.unwrap_err();
    assert!(matches!(err, RoutingError::InvalidTask(_)));
    assert!(matches!(
        router.route(&Task::new("chat", "")),
        Err(RoutingError::InvalidTask(_))
    ));
    assert_eq!(a.calls(), 0);
    assert_eq!(router.provider_stats("a").unwrap().total_requests, 0);
}

#[test]
fn test_no_providers_registered() {
    let router = router(RouterConfig::default());
    assert!(matches!(
        router.route(&chat("x")),
        Err(RoutingError::NoProvidersAvailable(_))
    ));
}

#[test]
fn test_unregister_removes_stats_and_candidacy() {
    let router = router(RouterConfig::default());
    router.register("a", Arc::new(ScriptedProvider::succeeding("a"))).unwrap();
    router.register("b", Arc::new(ScriptedProvider::succeeding("b"))).unwrap();
    router.unregister("a").unwrap();

    assert!(router.provider_stats("a").is_none());
    assert!(!router.stats().providers.contains_key("a"));
    for _ in 0..20 {
        let decision = router.route(&chat("x")).unwrap();
        assert_eq!(decision.provider, "b");
        assert!(decision.alternatives.is_empty());
    }
}

#[test]
fn test_flag_disabled_provider_never_routed() {
    let flags = Arc::new(StaticProviderFlags::new());
    let router = Router::new(RouterConfig::default()).with_flags(flags.clone());
    router.register("a", Arc::new(ScriptedProvider::succeeding("a"))).unwrap();
    router.register("b", Arc::new(ScriptedProvider::succeeding("b"))).unwrap();

    flags.disable("a");
    for _ in 0..20 {
        assert_eq!(router.route(&chat("x")).unwrap().provider, "b");
    }
    flags.disable("b");
    assert!(matches!(
        router.route(&chat("x")),
        Err(RoutingError::NoProvidersAvailable(_))
    ));
}

// ── Policies ───────────────────────────────────────────────────────

#[test]
fn test_cost_ceiling_excludes_expensive_provider() {
    let router = router(RouterConfig::default());
    router
        .register_with_profile(
            "providerX",
            Arc::new(ScriptedProvider::succeeding("x")),
            ProviderProfile::remote(0.000_1),
        )
        .unwrap();
    router
        .register_with_profile(
            "cheap",
            Arc::new(ScriptedProvider::succeeding("c")),
            ProviderProfile::remote(0.000_001),
        )
        .unwrap();
    router
        .add_policy(RoutingPolicy::new("budget", 1).with_max_cost(0.001))
        .unwrap();

    // 400 chars ≈ 100 tokens: $0.01 on providerX.
    let task = chat(&"x".repeat(400));
    for _ in 0..20 {
        let decision = router.route(&task).unwrap();
        assert_eq!(decision.provider, "cheap");
        assert!(!decision.alternatives.contains(&"providerX".to_string()));
        assert_eq!(decision.applied_policies, vec!["budget".to_string()]);
        assert!(decision.fallback_reason.is_none());
    }
}

#[test]
fn test_readding_policy_replaces_it() {
    let router = router(RouterConfig::default());
    router.register("a", Arc::new(ScriptedProvider::succeeding("a"))).unwrap();
    router.register("b", Arc::new(ScriptedProvider::succeeding("b"))).unwrap();

    let prefer = |p: &str| {
        RoutingPolicy::new("pin", 1).prefer("chat", ProviderPreference::new(p, 1.0))
    };
    assert!(!router.add_policy(prefer("a")).unwrap());
    assert_eq!(router.route(&chat("x")).unwrap().provider, "a");

    assert!(router.add_policy(prefer("b")).unwrap());
    assert_eq!(router.policies().len(), 1);
    assert_eq!(router.route(&chat("x")).unwrap().provider, "b");
}

#[test]
fn test_unnarrowed_candidates_record_fallback_reason() {
    let router = router(RouterConfig::default());
    router.register("a", Arc::new(ScriptedProvider::succeeding("a"))).unwrap();
    router.register("b", Arc::new(ScriptedProvider::succeeding("b"))).unwrap();
    let decision = router.route(&chat("x")).unwrap();
    assert_eq!(decision.source, DecisionSource::Balancer);
    assert!(decision.fallback_reason.is_some());
    assert_eq!(decision.alternatives.len(), 1);
}

#[test]
fn test_policy_strategy_used() {
    let router = router(RouterConfig::default());
    for name in ["a", "b", "c"] {
        router.register(name, Arc::new(ScriptedProvider::succeeding(name))).unwrap();
    }
    router
        .add_policy(
            RoutingPolicy::new("rr", 1)
                .prefer_by_default(ProviderPreference::new("a", 1.0))
                .prefer_by_default(ProviderPreference::new("b", 1.0))
                .with_strategy(routing::LoadBalancingStrategy::RoundRobin),
        )
        .unwrap();
    let picks: Vec<String> = (0..4).map(|_| router.route(&chat("x")).unwrap().provider).collect();
    assert_eq!(picks, vec!["a", "b", "a", "b"]);
}

// ── Retry and failover ─────────────────────────────────────────────

#[tokio::test]
async fn test_validation_error_is_not_retried() {
    let router = router(RouterConfig::default());
    let a = Arc::new(ScriptedProvider::failing(ProviderError::Validation(
        "prompt too long".into(),
    )));
    router.register("a", a.clone()).unwrap();

    let err = router.execute(&chat("x")).await.unwrap_err();
    match err {
        RoutingError::Rejected {
            provider,
            attempts,
            source,
        } => {
            assert_eq!(provider, "a");
            assert_eq!(attempts, 1);
            assert_eq!(source, ProviderError::Validation("prompt too long".into()));
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
    assert_eq!(a.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retry_with_backoff() {
    let router = router(RouterConfig::default());
    let a = Arc::new(ScriptedProvider::scripted(
        vec![
            Err(ProviderError::Timeout("slow".into())),
            Err(ProviderError::Network("reset".into())),
        ],
        Ok(routing::TaskOutput::new("done")),
    ));
    router.register("a", a.clone()).unwrap();

    let started = tokio::time::Instant::now();
    let outcome = router.execute(&chat("x")).await.unwrap();
    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.output.content, "done");
    assert_eq!(outcome.decision.attempt, 3);
    // 1s + 2s of backoff.
    assert!(started.elapsed() >= Duration::from_millis(3_000));
    assert_eq!(a.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_retried_only_twice() {
    let router = router(RouterConfig::default());
    let a = Arc::new(ScriptedProvider::failing(ProviderError::RateLimited(
        "429".into(),
    )));
    router.register("a", a.clone()).unwrap();

    let err = router
        .execute(&chat("x").with_max_retries(5))
        .await
        .unwrap_err();
    assert!(matches!(err, RoutingError::Rejected { attempts: 3, .. }));
    assert_eq!(a.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_high_priority_gets_extra_attempts() {
    let mut config = RouterConfig::default();
    config.circuit_breaker.failure_threshold = 10;
    let router = router(config);
    let a = Arc::new(ScriptedProvider::failing(ProviderError::Failed("500".into())));
    router.register("a", a.clone()).unwrap();

    let err = router.execute(&chat("x").with_priority(8)).await.unwrap_err();
    match &err {
        RoutingError::ExhaustedRetries { attempts, .. } => assert_eq!(*attempts, 5),
        other => panic!("expected ExhaustedRetries, got {other:?}"),
    }
    assert_eq!(err.provider_error(), Some(&ProviderError::Failed("500".into())));
    assert_eq!(a.calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_retry_moves_to_another_provider() {
    let router = router(RouterConfig::default());
    let bad = Arc::new(ScriptedProvider::failing(ProviderError::Failed("down".into())));
    let good = Arc::new(ScriptedProvider::succeeding("ok"));
    router.register("bad", bad.clone()).unwrap();
    router.register("good", good.clone()).unwrap();
    router
        .add_policy(RoutingPolicy::new("pin-bad", 1).prefer("chat", ProviderPreference::new("bad", 1.0)))
        .unwrap();

    let outcome = router.execute(&chat("x")).await.unwrap();
    assert_eq!(outcome.decision.provider, "good");
    assert_eq!(outcome.attempts, 2);
    assert_eq!(bad.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fallback_order_picks_next_provider() {
    let router = router(RouterConfig::default());
    let primary = Arc::new(ScriptedProvider::failing(ProviderError::Network("down".into())));
    router.register("primary", primary.clone()).unwrap();
    router.register("other", Arc::new(ScriptedProvider::succeeding("other"))).unwrap();
    router.register("backup", Arc::new(ScriptedProvider::succeeding("backup"))).unwrap();
    router
        .add_policy(
            RoutingPolicy::new("ordered", 1)
                .prefer("chat", ProviderPreference::new("primary", 3.0))
                .prefer("chat", ProviderPreference::new("other", 2.0))
                .prefer("chat", ProviderPreference::new("backup", 1.0))
                .with_strategy(routing::LoadBalancingStrategy::CapabilityMatch)
                .with_failover(FailoverConfig {
                    max_retries: Some(2),
                    retry_delay_ms: Some(10),
                    fallback_order: vec!["backup".into()],
                }),
        )
        .unwrap();

    let outcome = router.execute(&chat("x")).await.unwrap();
    assert_eq!(outcome.decision.provider, "backup");
    assert_eq!(outcome.decision.source, DecisionSource::Failover);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(primary.calls(), 1);
}

#[tokio::test]
async fn test_circuit_opens_after_threshold_then_no_providers() {
    let router = router(single_attempt_config(5, 5));
    let a = Arc::new(ScriptedProvider::failing(ProviderError::Failed("boom".into())));
    router.register("only", a.clone()).unwrap();

    for _ in 0..5 {
        let err = router.execute(&chat("x")).await.unwrap_err();
        assert!(matches!(err, RoutingError::ExhaustedRetries { attempts: 1, .. }));
    }
    assert_eq!(
        router.provider_stats("only").unwrap().circuit_state,
        routing::CircuitState::Open
    );
    assert!(matches!(
        router.route(&chat("x")),
        Err(RoutingError::NoProvidersAvailable(_))
    ));
    assert!(matches!(
        router.execute(&chat("x")).await,
        Err(RoutingError::NoProvidersAvailable(_))
    ));
    assert_eq!(a.calls(), 5);
}

// ── Analytics fallback ─────────────────────────────────────────────

#[tokio::test]
async fn test_failed_prediction_falls_back_to_standard_pipeline() {
    let router = router(RouterConfig::default())
        .with_analytics(PredictiveAnalytics::with_model(Arc::new(FailingModel)));
    router.enable_analytics();
    router.register("a", Arc::new(ScriptedProvider::succeeding("ok"))).unwrap();

    let outcome = router.execute(&chat("x")).await.unwrap();
    assert_eq!(outcome.output.content, "ok");
    assert_eq!(outcome.decision.source, DecisionSource::Balancer);
    let reason = outcome.decision.fallback_reason.unwrap();
    assert!(!reason.is_empty());
    assert!(reason.contains("analytics unavailable"));
}

// ── Events, health, cost ───────────────────────────────────────────

#[tokio::test]
async fn test_execution_publishes_events_in_order() {
    let router = router(RouterConfig::default());
    let mut rx = router.subscribe();
    router.register("a", Arc::new(ScriptedProvider::succeeding("ok"))).unwrap();
    router.execute(&chat("x")).await.unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.event_type());
    }
    assert_eq!(
        kinds,
        vec![
            "provider_registered",
            "route_selected",
            "execution_started",
            "execution_succeeded"
        ]
    );
}

#[tokio::test]
async fn test_failure_event_reports_retry_intent() {
    let router = router(single_attempt_config(5, 10));
    let mut rx = router.subscribe();
    router
        .register("a", Arc::new(ScriptedProvider::failing(ProviderError::Failed("x".into()))))
        .unwrap();
    let _ = router.execute(&chat("x")).await;

    let failed = std::iter::from_fn(|| rx.try_recv().ok())
        .find(|e| matches!(e, RoutingEvent::ExecutionFailed { .. }));
    match failed {
        Some(RoutingEvent::ExecutionFailed { will_retry, attempt, .. }) => {
            assert!(!will_retry);
            assert_eq!(attempt, 1);
        }
        other => panic!("expected ExecutionFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_check_health_probes_every_provider() {
    let router = router(RouterConfig::default());
    let up = Arc::new(ScriptedProvider::succeeding("up"));
    let down = Arc::new(ScriptedProvider::succeeding("down"));
    down.set_healthy(false);
    router.register("up", up).unwrap();
    router.register("down", down).unwrap();

    let health = router.check_health().await;
    assert_eq!(health.get("up"), Some(&true));
    assert_eq!(health.get("down"), Some(&false));
}

#[tokio::test]
async fn test_reported_cost_preferred_over_estimate() {
    let mut config = RouterConfig::default();
    config.budget = Some(routing::BudgetConfig::new(1.0));
    let router = router(config);
    let priced = Arc::new(ScriptedProvider::scripted(
        Vec::new(),
        Ok(routing::TaskOutput::new("ok").with_cost(0.25)),
    ));
    router
        .register_with_profile("priced", priced, ProviderProfile::remote(0.5))
        .unwrap();

    let outcome = router.execute(&chat("x")).await.unwrap();
    assert_eq!(outcome.cost, 0.25);
    assert_eq!(router.spend_summary().total, 0.25);

    let status = router.budget_status().unwrap();
    assert_eq!(status.remaining, 0.75);
    assert_eq!(status.state, routing::BudgetState::Healthy);
}

#[tokio::test]
async fn test_estimated_cost_recorded_without_report() {
    let router = router(RouterConfig::default());
    router
        .register_with_profile(
            "est",
            Arc::new(ScriptedProvider::succeeding("ok")),
            ProviderProfile::remote(0.001),
        )
        .unwrap();
    let outcome = router.execute(&chat(&"x".repeat(40))).await.unwrap();
    assert!((outcome.cost - 0.01).abs() < 1e-12);
    assert!(router.budget_status().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_ledger_pruner_drops_expired_entries() {
    let clock = Arc::new(ManualClock::starting_now());
    let mut config = RouterConfig::default();
    config.ledger_prune_interval_secs = 1;
    let router = router(config).with_clock(clock.clone());
    router
        .register_with_profile(
            "a",
            Arc::new(ScriptedProvider::succeeding("ok")),
            ProviderProfile::remote(0.001),
        )
        .unwrap();
    router.execute(&chat("xxxx")).await.unwrap();
    assert_eq!(router.ledger().len(), 1);

    let pruner = router.spawn_ledger_pruner();
    clock.advance(chrono::Duration::hours(25));
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(router.ledger().len(), 0);
    pruner.abort();
}
