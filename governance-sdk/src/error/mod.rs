//! Error handling for the Governance SDK
//!
//! This module provides the error taxonomy of the traffic-governance core:
//! - Selection errors (no candidates, unknown strategy)
//! - Circuit-breaker fast-fail errors, distinguishable from remote faults
//! - Remote invocation faults, observed but never swallowed
//! - Configuration errors, raised at configuration-load time
//! - Provides a convenient Result type alias

use thiserror::Error;

/// Result type for Governance SDK operations
pub type Result<T> = std::result::Result<T, GovernanceError>;

/// Main error type for the Governance SDK
#[derive(Error, Debug)]
pub enum GovernanceError {
    /// Candidate list was empty at selection time
    #[error("No candidates available: {0}")]
    NoCandidates(String),

    /// Load-balance strategy name is not registered
    #[error("Unknown load balance strategy: {0}")]
    UnknownStrategy(String),

    /// Circuit breaker is open; the call was rejected without a network attempt
    #[error("Circuit open: {0}")]
    CircuitOpen(String),

    /// Fault raised by the remote invocation, re-raised unchanged
    #[error("Remote invocation failed: {0}")]
    Remote(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl GovernanceError {
    /// Create a no-candidates error
    pub fn no_candidates(message: impl Into<String>) -> Self {
        GovernanceError::NoCandidates(message.into())
    }

    /// Create an unknown-strategy error
    pub fn unknown_strategy(name: impl Into<String>) -> Self {
        GovernanceError::UnknownStrategy(name.into())
    }

    /// Create a circuit-open error
    pub fn circuit_open(message: impl Into<String>) -> Self {
        GovernanceError::CircuitOpen(message.into())
    }

    /// Create a remote invocation error
    pub fn remote(message: impl Into<String>) -> Self {
        GovernanceError::Remote(message.into())
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        GovernanceError::Configuration(message.into())
    }

    /// Check whether this error is a breaker fast-fail.
    ///
    /// Callers use this to distinguish a rejection made without a network
    /// attempt from a genuine remote failure, so they can apply their own
    /// fallback.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, GovernanceError::CircuitOpen(_))
    }

    /// Check whether this error wraps a remote fault
    pub fn is_remote(&self) -> bool {
        matches!(self, GovernanceError::Remote(_))
    }
}

/// Convert opaque transport faults to GovernanceError
impl From<anyhow::Error> for GovernanceError {
    fn from(err: anyhow::Error) -> Self {
        GovernanceError::remote(err.to_string())
    }
}
