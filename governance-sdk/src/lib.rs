//! # Governance SDK
//!
//! Client-side traffic governance for RPC calls.
//!
//! This crate provides:
//!
//! - Four load-balancing strategies behind a name-keyed registry
//! - A sliding-window circuit breaker per (endpoint, service, method)
//! - A breaker manager that filters, selects and wraps remote calls
//! - Typed, validated endpoint configuration
//! - Comprehensive error handling system
//!
//! ## Architecture
//!
//! The Governance SDK is designed around the following key abstractions:
//!
//! - `Endpoint`: Handle to one remote service instance, implemented by the
//!   host's transport layer
//! - `CallDescriptor`: Identity of one outgoing RPC call
//! - `LoadBalance`: A selection strategy; `LoadBalanceRegistry` resolves
//!   strategies by name
//! - `CircuitBreaker` / `CircuitBreakerManager`: Per-key fault tracking and
//!   governed invocation
//! - `GovernanceError`: Comprehensive error handling system
//!
//! The crate is a pure in-process decision layer: it owns no sockets, no
//! threads and no timers, and executes inline on the caller's concurrency
//! model.

// Re-export core abstractions
pub mod core;
pub use core::{
    ActiveTracker, CallDescriptor, Endpoint,
    InvokeResponse, ServiceKey,
};

// Re-export load balancing
pub mod balance;
pub use balance::{
    ConsistentHashLoadBalance, LeastActiveLoadBalance, LoadBalance,
    LoadBalanceRegistry, RoundRobinLoadBalance, WeightedConsistentHashLoadBalance,
};

// Re-export error handling
pub mod error;
pub use error::{GovernanceError, Result};

// Re-export resilience patterns
pub mod resilience;
pub use resilience::{BreakerConfig, BreakerState, CircuitBreaker, CircuitBreakerManager};

// Re-export configuration management
pub mod config;
pub use config::EndpointOptions;

#[cfg(test)]
mod tests;

use std::sync::Arc;

/// Select an endpoint by strategy name using the process-default registry
pub fn select(
    strategy: &str,
    candidates: &[Arc<dyn Endpoint>],
    call: &CallDescriptor,
) -> Result<Arc<dyn Endpoint>> {
    balance::DEFAULT_REGISTRY.select(strategy, candidates, call)
}

/// Create a breaker manager with an empty registry
pub fn manager() -> CircuitBreakerManager {
    CircuitBreakerManager::new()
}
