//! Resilience layer: per-endpoint circuit breaking
//!
//! This module tracks per-(endpoint, service, method) failure behavior and
//! stops sending traffic to endpoints that are failing:
//!
//! - Sliding time window of success/failure counters
//! - Circuit breaker state machine
//! - Breaker manager orchestrating lookup, filtering and guarded calls

mod circuit_breaker;
mod manager;
mod window;

pub use circuit_breaker::{BreakerConfig, CircuitBreaker};
pub use manager::CircuitBreakerManager;
pub use window::{SlidingWindow, BUCKET_WIDTH_MS};

/// State of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Circuit is closed, traffic flows
    Closed,

    /// Circuit is open, calls fail fast
    Open,

    /// Circuit is half-open, trial calls probe for recovery
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}
