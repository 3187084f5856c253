//! Configuration surface for governed endpoints
//!
//! This module parses the option map published on an endpoint descriptor
//! into a typed, validated view. Malformed configuration fails fast here,
//! at configuration-load time, never per call.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{GovernanceError, Result};

/// Default endpoint weight
pub const DEFAULT_WEIGHT: u32 = 100;

/// Default warmup duration: ten minutes
pub const DEFAULT_WARMUP_MS: u64 = 10 * 60 * 1000;

/// Default virtual nodes per endpoint on a hash ring
pub const DEFAULT_HASH_NODES: u32 = 160;

/// Default load-balance strategy name
pub const DEFAULT_LOAD_BALANCE: &str = "roundrobin";

/// Default minimum request volume before a breaker may open
pub const DEFAULT_REQUEST_VOLUME_THRESHOLD: u64 = 20;

/// Default sleep window before an open breaker admits trial calls
pub const DEFAULT_SLEEP_WINDOW_MS: u64 = 5_000;

/// Default error-rate threshold (percentage) for opening a breaker
pub const DEFAULT_ERROR_THRESHOLD_PCT: u64 = 50;

/// Default consecutive successes required to close a half-open breaker
pub const DEFAULT_CONSECUTIVE_SUCCESS_THRESHOLD: u32 = 5;

/// Typed view of the recognized endpoint options for one (service, method)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointOptions {
    /// Configured weight (`weight`)
    pub weight: u32,

    /// Warmup duration in milliseconds (`warmup.ms`)
    pub warmup_ms: u64,

    /// Virtual nodes per endpoint on the hash ring (`hash.nodes`)
    pub hash_nodes: u32,

    /// Argument indices contributing to the hash key (`hash.arguments`)
    pub hash_arguments: Vec<usize>,

    /// Load-balance strategy name (`loadbalance`)
    pub load_balance: String,

    /// Whether breaker governance applies (`circuit.breaker.enabled`)
    pub breaker_enabled: bool,

    /// Minimum calls in the window before the breaker may open
    /// (`circuit.breaker.requestVolumeThreshold`)
    pub request_volume_threshold: u64,

    /// Sleep window in milliseconds (`circuit.breaker.sleepWindowMs`)
    pub sleep_window_ms: u64,

    /// Error-rate percentage that opens the breaker
    /// (`circuit.breaker.errorThresholdPercentage`)
    pub error_threshold_percentage: u64,

    /// Consecutive half-open successes required to close
    /// (`circuit.breaker.consecutiveSuccessThreshold`)
    pub consecutive_success_threshold: u32,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            weight: DEFAULT_WEIGHT,
            warmup_ms: DEFAULT_WARMUP_MS,
            hash_nodes: DEFAULT_HASH_NODES,
            hash_arguments: vec![0],
            load_balance: DEFAULT_LOAD_BALANCE.to_string(),
            breaker_enabled: false,
            request_volume_threshold: DEFAULT_REQUEST_VOLUME_THRESHOLD,
            sleep_window_ms: DEFAULT_SLEEP_WINDOW_MS,
            error_threshold_percentage: DEFAULT_ERROR_THRESHOLD_PCT,
            consecutive_success_threshold: DEFAULT_CONSECUTIVE_SUCCESS_THRESHOLD,
        }
    }
}

impl EndpointOptions {
    /// Parse an endpoint option map, applying defaults for missing keys.
    ///
    /// Unrecognized keys are ignored; malformed values for recognized keys
    /// are configuration errors.
    pub fn from_map(options: &HashMap<String, String>) -> Result<Self> {
        let mut parsed = Self::default();

        if let Some(raw) = options.get("weight") {
            parsed.weight = parse_number(raw, "weight")?;
        }
        if let Some(raw) = options.get("warmup.ms") {
            parsed.warmup_ms = parse_number(raw, "warmup.ms")?;
        }
        if let Some(raw) = options.get("hash.nodes") {
            parsed.hash_nodes = parse_number(raw, "hash.nodes")?;
            if parsed.hash_nodes == 0 {
                return Err(GovernanceError::configuration(
                    "hash.nodes must be positive",
                ));
            }
        }
        if let Some(raw) = options.get("hash.arguments") {
            parsed.hash_arguments = parse_index_list(raw)?;
        }
        if let Some(raw) = options.get("loadbalance") {
            parsed.load_balance = raw.trim().to_string();
        }
        if let Some(raw) = options.get("circuit.breaker.enabled") {
            parsed.breaker_enabled = parse_bool(raw, "circuit.breaker.enabled")?;
        }
        if let Some(raw) = options.get("circuit.breaker.requestVolumeThreshold") {
            parsed.request_volume_threshold =
                parse_number(raw, "circuit.breaker.requestVolumeThreshold")?;
        }
        if let Some(raw) = options.get("circuit.breaker.sleepWindowMs") {
            parsed.sleep_window_ms = parse_number(raw, "circuit.breaker.sleepWindowMs")?;
        }
        if let Some(raw) = options.get("circuit.breaker.errorThresholdPercentage") {
            parsed.error_threshold_percentage =
                parse_number(raw, "circuit.breaker.errorThresholdPercentage")?;
        }
        if let Some(raw) = options.get("circuit.breaker.consecutiveSuccessThreshold") {
            parsed.consecutive_success_threshold =
                parse_number(raw, "circuit.breaker.consecutiveSuccessThreshold")?;
        }

        parsed.validate()?;
        Ok(parsed)
    }

    /// Validate threshold invariants
    pub fn validate(&self) -> Result<()> {
        if self.breaker_enabled {
            if self.request_volume_threshold == 0 {
                return Err(GovernanceError::configuration(
                    "circuit.breaker.requestVolumeThreshold must be positive",
                ));
            }
            if self.sleep_window_ms == 0 {
                return Err(GovernanceError::configuration(
                    "circuit.breaker.sleepWindowMs must be positive",
                ));
            }
            if self.error_threshold_percentage == 0 {
                return Err(GovernanceError::configuration(
                    "circuit.breaker.errorThresholdPercentage must be positive",
                ));
            }
            if self.consecutive_success_threshold == 0 {
                return Err(GovernanceError::configuration(
                    "circuit.breaker.consecutiveSuccessThreshold must be positive",
                ));
            }
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(raw: &str, key: &str) -> Result<T>
where
    <T as std::str::FromStr>::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| {
        GovernanceError::configuration(format!("Invalid value for key {}: {}", key, e))
    })
}

fn parse_bool(raw: &str, key: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        other => Err(GovernanceError::configuration(format!(
            "Invalid boolean value for key {}: {}",
            key, other
        ))),
    }
}

/// Parse the comma-separated argument index list of `hash.arguments`
fn parse_index_list(raw: &str) -> Result<Vec<usize>> {
    let indices = raw
        .split(',')
        .map(|part| parse_number::<usize>(part, "hash.arguments"))
        .collect::<Result<Vec<usize>>>()?;
    if indices.is_empty() {
        return Err(GovernanceError::configuration(
            "hash.arguments must name at least one index",
        ));
    }
    Ok(indices)
}
