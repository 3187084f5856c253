//! Breaker manager: lookup, filtering and breaker-wrapped invocation
//!
//! One manager owns one concurrent breaker registry; the host application
//! owns the manager's lifetime. Breakers are created lazily per governed
//! key and their thresholds are re-synced from the endpoint descriptor on
//! every lookup, so operator changes take effect without a restart.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dashmap::DashMap;

use crate::balance::LoadBalanceRegistry;
use crate::core::{unix_millis, CallDescriptor, Endpoint, InvokeResponse};
use crate::error::{GovernanceError, Result};
use crate::resilience::{BreakerConfig, BreakerState, CircuitBreaker};

/// Keyed registry of circuit breakers with governed-call orchestration
#[derive(Debug, Default)]
pub struct CircuitBreakerManager {
    breakers: DashMap<u64, Arc<CircuitBreaker>>,
}

/// Breaker registry key for one (endpoint, service, method, arity).
///
/// Coarse enough to share a breaker across calls that differ only in
/// argument values, fine enough to separate methods and endpoints.
fn breaker_key(endpoint: &dyn Endpoint, call: &CallDescriptor) -> u64 {
    let mut hasher = DefaultHasher::new();
    endpoint.address().hash(&mut hasher);
    call.service.interface.hash(&mut hasher);
    call.service.group.hash(&mut hasher);
    call.method.hash(&mut hasher);
    call.service.version.hash(&mut hasher);
    call.arguments.len().hash(&mut hasher);
    hasher.finish()
}

/// The endpoint's own transport, used when no custom `do_invoke` is given
async fn default_transport(
    endpoint: Arc<dyn Endpoint>,
    call: CallDescriptor,
) -> Result<InvokeResponse> {
    endpoint.invoke(&call).await
}

impl CircuitBreakerManager {
    /// Create a manager with an empty breaker registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live breaker entries
    pub fn breaker_count(&self) -> usize {
        self.breakers.len()
    }

    /// Look up or lazily create the breaker for one governed key, syncing
    /// its thresholds from the endpoint descriptor.
    pub fn breaker_for(
        &self,
        endpoint: &Arc<dyn Endpoint>,
        call: &CallDescriptor,
        now_ms: u64,
    ) -> Arc<CircuitBreaker> {
        let key = breaker_key(endpoint.as_ref(), call);
        let config = BreakerConfig::from(&endpoint.options(&call.method));
        let breaker = self
            .breakers
            .entry(key)
            .or_insert_with(|| Arc::new(CircuitBreaker::new(config.clone(), now_ms)))
            .clone();
        breaker.update_config(config);
        breaker
    }

    /// Current breaker state for one governed key, if a breaker exists
    pub fn breaker_state(&self, endpoint: &Arc<dyn Endpoint>, call: &CallDescriptor) -> Option<BreakerState> {
        self.breakers
            .get(&breaker_key(endpoint.as_ref(), call))
            .map(|b| b.state())
    }

    /// Drop the breaker entry for one governed key
    fn evict(&self, endpoint: &dyn Endpoint, call: &CallDescriptor) {
        if self.breakers.remove(&breaker_key(endpoint, call)).is_some() {
            log::info!(
                "evicted breaker for {} {}: governance disabled",
                endpoint.address(),
                call.method_key()
            );
        }
    }

    /// Invoke through the breaker for this (endpoint, call)
    pub async fn invoke(
        &self,
        endpoint: &Arc<dyn Endpoint>,
        call: &CallDescriptor,
    ) -> Result<InvokeResponse> {
        self.invoke_at(endpoint, call, unix_millis()).await
    }

    /// Invoke through the breaker, evaluating all timing against `now_ms`
    pub async fn invoke_at(
        &self,
        endpoint: &Arc<dyn Endpoint>,
        call: &CallDescriptor,
        now_ms: u64,
    ) -> Result<InvokeResponse> {
        self.invoke_with_at(endpoint, call, now_ms, default_transport)
            .await
    }

    /// Invoke through the breaker, dispatching the remote call to
    /// `do_invoke` instead of the endpoint's own transport.
    ///
    /// When governance is disabled for this key the call bypasses the
    /// breaker entirely and any stale breaker entry is evicted. A remote
    /// fault is recorded against the breaker and re-raised unchanged.
    pub async fn invoke_with_at<F, Fut>(
        &self,
        endpoint: &Arc<dyn Endpoint>,
        call: &CallDescriptor,
        now_ms: u64,
        do_invoke: F,
    ) -> Result<InvokeResponse>
    where
        F: FnOnce(Arc<dyn Endpoint>, CallDescriptor) -> Fut,
        Fut: Future<Output = Result<InvokeResponse>>,
    {
        if !endpoint.options(&call.method).breaker_enabled {
            self.evict(endpoint.as_ref(), call);
            return do_invoke(Arc::clone(endpoint), call.clone()).await;
        }

        let breaker = self.breaker_for(endpoint, call, now_ms);
        breaker.record_call(now_ms);

        match breaker.state() {
            BreakerState::Open => Err(GovernanceError::circuit_open(format!(
                "{} {}",
                endpoint.address(),
                call.method_key()
            ))),
            BreakerState::Closed => match do_invoke(Arc::clone(endpoint), call.clone()).await {
                Ok(response) => Ok(response),
                Err(fault) => {
                    breaker.record_failure(now_ms);
                    breaker.try_open(now_ms);
                    Err(fault)
                }
            },
            BreakerState::HalfOpen => match do_invoke(Arc::clone(endpoint), call.clone()).await {
                Ok(response) => {
                    breaker.on_success();
                    Ok(response)
                }
                Err(fault) => {
                    breaker.record_failure(now_ms);
                    breaker.reopen(now_ms);
                    Err(fault)
                }
            },
        }
    }

    /// Drop candidates whose breaker is open and still sleeping
    pub fn filter_open(
        &self,
        candidates: &[Arc<dyn Endpoint>],
        call: &CallDescriptor,
    ) -> Vec<Arc<dyn Endpoint>> {
        self.filter_open_at(candidates, call, unix_millis())
    }

    /// Drop candidates whose breaker is open and still sleeping, evaluating
    /// sleep windows against `now_ms`.
    ///
    /// An open breaker whose sleep window has elapsed transitions to
    /// half-open here and its endpoint stays visible, so exactly the
    /// endpoints eligible for a trial call reach the load balancer.
    /// Governance-disabled candidates always pass, shedding any stale
    /// breaker entry.
    pub fn filter_open_at(
        &self,
        candidates: &[Arc<dyn Endpoint>],
        call: &CallDescriptor,
        now_ms: u64,
    ) -> Vec<Arc<dyn Endpoint>> {
        candidates
            .iter()
            .filter(|candidate| {
                if !candidate.options(&call.method).breaker_enabled {
                    self.evict(candidate.as_ref(), call);
                    return true;
                }
                let breaker = self.breaker_for(candidate, call, now_ms);
                if breaker.state() == BreakerState::Open {
                    breaker.try_half_open(now_ms);
                }
                breaker.state() != BreakerState::Open
            })
            .cloned()
            .collect()
    }

    /// Filter, select and invoke in one governed step.
    ///
    /// The strategy is resolved by the `loadbalance` option of the selected
    /// method. A non-empty candidate list whose endpoints are all rejected
    /// by their breakers is a circuit-open fast fail, distinguishable from
    /// an empty candidate list.
    pub async fn guarded_invoke(
        &self,
        registry: &LoadBalanceRegistry,
        candidates: &[Arc<dyn Endpoint>],
        call: &CallDescriptor,
    ) -> Result<InvokeResponse> {
        self.guarded_invoke_at(registry, candidates, call, unix_millis())
            .await
    }

    /// `guarded_invoke` with all timing evaluated against `now_ms`
    pub async fn guarded_invoke_at(
        &self,
        registry: &LoadBalanceRegistry,
        candidates: &[Arc<dyn Endpoint>],
        call: &CallDescriptor,
        now_ms: u64,
    ) -> Result<InvokeResponse> {
        self.guarded_invoke_with_at(registry, candidates, call, now_ms, default_transport)
            .await
    }

    /// `guarded_invoke` dispatching the remote call to a caller-supplied
    /// `do_invoke` instead of the endpoint's own transport
    pub async fn guarded_invoke_with<F, Fut>(
        &self,
        registry: &LoadBalanceRegistry,
        candidates: &[Arc<dyn Endpoint>],
        call: &CallDescriptor,
        do_invoke: F,
    ) -> Result<InvokeResponse>
    where
        F: FnOnce(Arc<dyn Endpoint>, CallDescriptor) -> Fut,
        Fut: Future<Output = Result<InvokeResponse>>,
    {
        self.guarded_invoke_with_at(registry, candidates, call, unix_millis(), do_invoke)
            .await
    }

    /// `guarded_invoke_with` with all timing evaluated against `now_ms`
    pub async fn guarded_invoke_with_at<F, Fut>(
        &self,
        registry: &LoadBalanceRegistry,
        candidates: &[Arc<dyn Endpoint>],
        call: &CallDescriptor,
        now_ms: u64,
        do_invoke: F,
    ) -> Result<InvokeResponse>
    where
        F: FnOnce(Arc<dyn Endpoint>, CallDescriptor) -> Fut,
        Fut: Future<Output = Result<InvokeResponse>>,
    {
        if candidates.is_empty() {
            return Err(GovernanceError::no_candidates(call.method_key()));
        }

        let viable = self.filter_open_at(candidates, call, now_ms);
        if viable.is_empty() {
            return Err(GovernanceError::circuit_open(format!(
                "all {} candidates rejected for {}",
                candidates.len(),
                call.method_key()
            )));
        }

        let strategy = viable[0].options(&call.method).load_balance;
        let chosen = registry.select(&strategy, &viable, call)?;
        self.invoke_with_at(&chosen, call, now_ms, do_invoke).await
    }
}
