//! Load-balancing strategies for outgoing calls
//!
//! This module provides the `LoadBalance` trait, the four built-in
//! strategies, and a name-keyed registry resolved once at configuration
//! time:
//!
//! - `roundrobin`: weighted smooth round robin
//! - `leastactive`: least in-flight calls, weight-biased tie break
//! - `consistenthash`: MD5 hash ring keyed on call arguments
//! - `weightedconsistenthash`: hash ring with weight-proportional virtual
//!   nodes and warmup ramp-up

mod consistent_hash;
mod least_active;
pub mod ring;
mod round_robin;
mod weighted_hash;

pub use consistent_hash::ConsistentHashLoadBalance;
pub use least_active::LeastActiveLoadBalance;
pub use round_robin::RoundRobinLoadBalance;
pub use weighted_hash::WeightedConsistentHashLoadBalance;

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::core::{ActiveTracker, CallDescriptor, Endpoint};
use crate::error::{GovernanceError, Result};

/// A load-balancing strategy: picks one endpoint out of several candidates
pub trait LoadBalance: Send + Sync {
    /// Registered strategy name
    fn name(&self) -> &'static str;

    /// Select one endpoint for the given call.
    ///
    /// Never fails when `candidates` is non-empty; an empty list is a
    /// `NoCandidates` error.
    fn select(
        &self,
        candidates: &[Arc<dyn Endpoint>],
        call: &CallDescriptor,
    ) -> Result<Arc<dyn Endpoint>>;
}

impl std::fmt::Debug for dyn LoadBalance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalance")
            .field("name", &self.name())
            .finish()
    }
}

/// Weight of an endpoint after the warmup ramp.
///
/// A freshly started endpoint advertises a weight that grows linearly with
/// uptime over the warmup window, from 1 up to its configured weight. An
/// endpoint past its warmup (or with no warmup configured) carries the full
/// configured weight.
pub fn warmup_weight(uptime_ms: u64, warmup_ms: u64, weight: u32) -> u32 {
    if weight == 0 {
        return 0;
    }
    if warmup_ms == 0 || uptime_ms >= warmup_ms {
        return weight;
    }
    let ramped = (uptime_ms as u128 * weight as u128 / warmup_ms as u128) as u32;
    ramped.clamp(1, weight)
}

/// Registry mapping strategy names to shared strategy instances.
///
/// Resolved by name once at configuration time; unknown names are a
/// configuration error, not a fallback.
pub struct LoadBalanceRegistry {
    strategies: DashMap<String, Arc<dyn LoadBalance>>,
    tracker: Arc<ActiveTracker>,
}

impl LoadBalanceRegistry {
    /// Create a registry holding the four built-in strategies.
    ///
    /// `tracker` is the in-flight gauge the transport layer maintains; the
    /// least-active strategy reads it.
    pub fn new(tracker: Arc<ActiveTracker>) -> Self {
        let registry = Self {
            strategies: DashMap::new(),
            tracker: Arc::clone(&tracker),
        };
        registry.register(Arc::new(RoundRobinLoadBalance::new()));
        registry.register(Arc::new(LeastActiveLoadBalance::new(tracker)));
        registry.register(Arc::new(ConsistentHashLoadBalance::new()));
        registry.register(Arc::new(WeightedConsistentHashLoadBalance::new()));
        registry
    }

    /// Register a strategy under its own name, replacing any previous one
    pub fn register(&self, strategy: Arc<dyn LoadBalance>) {
        self.strategies
            .insert(strategy.name().to_string(), strategy);
    }

    /// Resolve a strategy by name
    pub fn get(&self, name: &str) -> Result<Arc<dyn LoadBalance>> {
        self.strategies
            .get(name)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| GovernanceError::unknown_strategy(name))
    }

    /// Resolve a strategy by name and select an endpoint with it
    pub fn select(
        &self,
        name: &str,
        candidates: &[Arc<dyn Endpoint>],
        call: &CallDescriptor,
    ) -> Result<Arc<dyn Endpoint>> {
        self.get(name)?.select(candidates, call)
    }

    /// The in-flight gauge shared with the transport layer
    pub fn active_tracker(&self) -> Arc<ActiveTracker> {
        Arc::clone(&self.tracker)
    }
}

/// Process-default registry with the built-in strategies
pub static DEFAULT_REGISTRY: Lazy<Arc<LoadBalanceRegistry>> =
    Lazy::new(|| Arc::new(LoadBalanceRegistry::new(Arc::new(ActiveTracker::new()))));
