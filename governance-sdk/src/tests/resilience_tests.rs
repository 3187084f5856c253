//! End-to-end breaker scenarios through the manager
//!
//! All timing is driven through explicit timestamps; no test sleeps.

use std::sync::Arc;

use serde_json::json;

use crate::balance::LoadBalanceRegistry;
use crate::core::{ActiveTracker, CallDescriptor, Endpoint, InvokeResponse};
use crate::resilience::{BreakerState, CircuitBreakerManager, BUCKET_WIDTH_MS};
use crate::tests::support::{call_with_args, TestEndpoint, TestEndpointBuilder};

const T0: u64 = 1_000_000;

/// Settle period of a default-sized window
const SETTLE: u64 = 10 * BUCKET_WIDTH_MS;

fn governed(address: &str) -> TestEndpointBuilder {
    TestEndpoint::builder(address)
        .option("circuit.breaker.enabled", "true")
        .option("circuit.breaker.requestVolumeThreshold", "5")
        .option("circuit.breaker.sleepWindowMs", "1000")
        .option("circuit.breaker.errorThresholdPercentage", "50")
        .option("circuit.breaker.consecutiveSuccessThreshold", "2")
}

/// Drive a failing endpoint until its breaker opens; returns the open time
async fn open_breaker(
    manager: &CircuitBreakerManager,
    endpoint: &Arc<TestEndpoint>,
    shared: &Arc<dyn Endpoint>,
) -> u64 {
    let call = call_with_args(vec![]);
    endpoint.set_failing(true);

    // First call anchors the breaker's settle period at T0
    let _ = manager.invoke_at(shared, &call, T0).await;
    for _ in 0..7 {
        let _ = manager.invoke_at(shared, &call, T0 + SETTLE - 1).await;
    }
    let opened_at = T0 + SETTLE;
    let err = manager.invoke_at(shared, &call, opened_at).await.unwrap_err();
    assert!(err.is_remote());
    assert_eq!(
        manager.breaker_state(shared, &call),
        Some(BreakerState::Open)
    );
    opened_at
}

#[tokio::test]
async fn test_breaker_opens_under_failing_load() {
    let manager = CircuitBreakerManager::new();
    let endpoint = governed("p:20880").build();
    let shared: Arc<dyn Endpoint> = endpoint.clone();
    let call = call_with_args(vec![]);

    let opened_at = open_breaker(&manager, &endpoint, &shared).await;

    // Open breaker fails fast without touching the endpoint
    let before = endpoint.invocations();
    let err = manager
        .invoke_at(&shared, &call, opened_at + 100)
        .await
        .unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(endpoint.invocations(), before);
}

#[tokio::test]
async fn test_breaker_stays_closed_below_error_threshold() {
    let manager = CircuitBreakerManager::new();
    let endpoint = governed("p:20880").build();
    let shared: Arc<dyn Endpoint> = endpoint.clone();
    let call = call_with_args(vec![]);

    manager.invoke_at(&shared, &call, T0).await.unwrap();
    for _ in 0..5 {
        manager
            .invoke_at(&shared, &call, T0 + SETTLE - 1)
            .await
            .unwrap();
    }
    endpoint.set_failing(true);
    for _ in 0..2 {
        let _ = manager.invoke_at(&shared, &call, T0 + SETTLE - 1).await;
    }

    // Final failure past the settle period: volume is there, rate is not
    let err = manager.invoke_at(&shared, &call, T0 + SETTLE).await.unwrap_err();
    assert!(err.is_remote());
    assert_eq!(
        manager.breaker_state(&shared, &call),
        Some(BreakerState::Closed)
    );
}

#[tokio::test]
async fn test_settle_period_suppresses_cold_start_opening() {
    let manager = CircuitBreakerManager::new();
    let endpoint = governed("p:20880").build();
    let shared: Arc<dyn Endpoint> = endpoint.clone();
    let call = call_with_args(vec![]);
    endpoint.set_failing(true);

    // Heavy failures right after the breaker is created
    for _ in 0..30 {
        let _ = manager.invoke_at(&shared, &call, T0 + 10).await;
    }
    assert_eq!(
        manager.breaker_state(&shared, &call),
        Some(BreakerState::Closed)
    );
}

#[tokio::test]
async fn test_filter_excludes_sleeping_and_admits_trial_calls() {
    let manager = CircuitBreakerManager::new();
    let endpoint = governed("p:20880").build();
    let shared: Arc<dyn Endpoint> = endpoint.clone();
    let call = call_with_args(vec![]);

    let opened_at = open_breaker(&manager, &endpoint, &shared).await;
    let candidates = vec![Arc::clone(&shared)];

    // Still inside the sleep window: excluded, state untouched
    let viable = manager.filter_open_at(&candidates, &call, opened_at + 500);
    assert!(viable.is_empty());
    assert_eq!(
        manager.breaker_state(&shared, &call),
        Some(BreakerState::Open)
    );

    // Sleep window elapsed: included, transitioned to half-open
    let viable = manager.filter_open_at(&candidates, &call, opened_at + 1_000);
    assert_eq!(viable.len(), 1);
    assert_eq!(
        manager.breaker_state(&shared, &call),
        Some(BreakerState::HalfOpen)
    );
}

#[tokio::test]
async fn test_half_open_recovers_after_consecutive_successes() {
    let manager = CircuitBreakerManager::new();
    let endpoint = governed("p:20880").build();
    let shared: Arc<dyn Endpoint> = endpoint.clone();
    let call = call_with_args(vec![]);

    let opened_at = open_breaker(&manager, &endpoint, &shared).await;
    manager.filter_open_at(&[Arc::clone(&shared)], &call, opened_at + 1_000);
    endpoint.set_failing(false);

    manager
        .invoke_at(&shared, &call, opened_at + 1_100)
        .await
        .unwrap();
    assert_eq!(
        manager.breaker_state(&shared, &call),
        Some(BreakerState::HalfOpen)
    );

    manager
        .invoke_at(&shared, &call, opened_at + 1_200)
        .await
        .unwrap();
    assert_eq!(
        manager.breaker_state(&shared, &call),
        Some(BreakerState::Closed)
    );
}

#[tokio::test]
async fn test_half_open_failure_reopens_and_resets_sleep_timer() {
    let manager = CircuitBreakerManager::new();
    let endpoint = governed("p:20880").build();
    let shared: Arc<dyn Endpoint> = endpoint.clone();
    let call = call_with_args(vec![]);

    let opened_at = open_breaker(&manager, &endpoint, &shared).await;
    manager.filter_open_at(&[Arc::clone(&shared)], &call, opened_at + 1_000);

    // Trial call fails while half-open
    let reopened_at = opened_at + 1_100;
    let err = manager.invoke_at(&shared, &call, reopened_at).await.unwrap_err();
    assert!(err.is_remote());
    assert_eq!(
        manager.breaker_state(&shared, &call),
        Some(BreakerState::Open)
    );

    // The sleep timer restarted from the re-open
    let viable = manager.filter_open_at(&[Arc::clone(&shared)], &call, reopened_at + 999);
    assert!(viable.is_empty());
    let viable = manager.filter_open_at(&[Arc::clone(&shared)], &call, reopened_at + 1_000);
    assert_eq!(viable.len(), 1);
}

#[tokio::test]
async fn test_disabled_governance_bypasses_and_evicts() {
    let manager = CircuitBreakerManager::new();
    let call = call_with_args(vec![]);

    // A governed call creates a breaker entry
    let governed_endpoint: Arc<dyn Endpoint> = governed("p:20880").shared();
    manager.invoke_at(&governed_endpoint, &call, T0).await.unwrap();
    assert_eq!(manager.breaker_count(), 1);

    // The same key with governance off bypasses the breaker and evicts it
    let plain: Arc<dyn Endpoint> = TestEndpoint::shared("p:20880");
    manager.invoke_at(&plain, &call, T0 + 100).await.unwrap();
    assert_eq!(manager.breaker_count(), 0);
}

#[tokio::test]
async fn test_filter_always_keeps_disabled_candidates() {
    let manager = CircuitBreakerManager::new();
    let endpoint = governed("open:20880").build();
    let shared: Arc<dyn Endpoint> = endpoint.clone();
    let call = call_with_args(vec![]);
    let opened_at = open_breaker(&manager, &endpoint, &shared).await;

    let candidates: Vec<Arc<dyn Endpoint>> =
        vec![Arc::clone(&shared), TestEndpoint::shared("plain:20880")];
    let viable = manager.filter_open_at(&candidates, &call, opened_at + 100);
    assert_eq!(viable.len(), 1);
    assert_eq!(viable[0].address(), "plain:20880");
}

#[test]
fn test_breaker_config_resyncs_from_descriptor() {
    let manager = CircuitBreakerManager::new();
    let call = call_with_args(vec![]);

    let original: Arc<dyn Endpoint> = governed("p:20880").shared();
    let breaker = manager.breaker_for(&original, &call, T0);
    assert_eq!(breaker.config().sleep_window_ms, 1_000);

    // Operator raised the sleep window on the descriptor; same breaker key
    let updated: Arc<dyn Endpoint> = governed("p:20880")
        .option("circuit.breaker.sleepWindowMs", "2000")
        .shared();
    let breaker = manager.breaker_for(&updated, &call, T0 + 100);
    assert_eq!(breaker.config().sleep_window_ms, 2_000);
    assert_eq!(manager.breaker_count(), 1);
}

#[tokio::test]
async fn test_guarded_invoke_rejects_empty_candidates() {
    let manager = CircuitBreakerManager::new();
    let registry = LoadBalanceRegistry::new(Arc::new(ActiveTracker::new()));
    let call = call_with_args(vec![]);

    let err = manager
        .guarded_invoke(&registry, &[], &call)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        crate::error::GovernanceError::NoCandidates(_)
    ));
}

#[tokio::test]
async fn test_custom_transport_closure_carries_the_call() {
    let manager = CircuitBreakerManager::new();
    let registry = LoadBalanceRegistry::new(Arc::new(ActiveTracker::new()));
    let endpoint = TestEndpoint::builder("p:20880").build();
    let shared: Arc<dyn Endpoint> = endpoint.clone();
    let call = call_with_args(vec![]);

    let response = manager
        .guarded_invoke_with(
            &registry,
            &[Arc::clone(&shared)],
            &call,
            |endpoint: Arc<dyn Endpoint>, call: CallDescriptor| async move {
                Ok(InvokeResponse::new(json!({
                    "transport": "custom",
                    "address": endpoint.address(),
                    "method": call.method,
                })))
            },
        )
        .await
        .unwrap();

    assert_eq!(response.payload["transport"], "custom");
    assert_eq!(response.payload["address"], "p:20880");
    assert_eq!(response.payload["method"], "getUser");
    // The endpoint's own transport never ran
    assert_eq!(endpoint.invocations(), 0);
}

#[tokio::test]
async fn test_custom_transport_failures_feed_the_breaker() {
    let manager = CircuitBreakerManager::new();
    let endpoint: Arc<dyn Endpoint> = governed("p:20880").shared();
    let call = call_with_args(vec![]);

    let drive = |now: u64| {
        manager.invoke_with_at(
            &endpoint,
            &call,
            now,
            |endpoint: Arc<dyn Endpoint>, _call: CallDescriptor| async move {
                Err(crate::error::GovernanceError::remote(format!(
                    "injected fault from {}",
                    endpoint.address()
                )))
            },
        )
    };

    let _ = drive(T0).await;
    for _ in 0..7 {
        let _ = drive(T0 + SETTLE - 1).await;
    }
    let err = drive(T0 + SETTLE).await.unwrap_err();
    assert!(err.is_remote());
    assert_eq!(
        manager.breaker_state(&endpoint, &call),
        Some(BreakerState::Open)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_lookup_creates_one_breaker() {
    let manager = Arc::new(CircuitBreakerManager::new());
    let shared: Arc<dyn Endpoint> = governed("p:20880").shared();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let manager = Arc::clone(&manager);
        let shared = Arc::clone(&shared);
        tasks.push(tokio::spawn(async move {
            let call = call_with_args(vec![]);
            manager.breaker_for(&shared, &call, T0)
        }));
    }

    let mut breakers = Vec::new();
    for task in tasks {
        breakers.push(task.await.unwrap());
    }
    assert_eq!(manager.breaker_count(), 1);
    for breaker in &breakers[1..] {
        assert!(Arc::ptr_eq(&breakers[0], breaker));
    }
}

#[tokio::test]
async fn test_guarded_invoke_fails_fast_when_all_breakers_open() {
    let manager = CircuitBreakerManager::new();
    let registry = LoadBalanceRegistry::new(Arc::new(ActiveTracker::new()));
    let endpoint = governed("p:20880").build();
    let shared: Arc<dyn Endpoint> = endpoint.clone();
    let call = call_with_args(vec![]);

    let opened_at = open_breaker(&manager, &endpoint, &shared).await;

    let before = endpoint.invocations();
    let err = manager
        .guarded_invoke_at(&registry, &[Arc::clone(&shared)], &call, opened_at + 100)
        .await
        .unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(endpoint.invocations(), before);
}
