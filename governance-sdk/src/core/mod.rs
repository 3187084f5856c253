//! Core abstractions for the Governance SDK
//!
//! This module provides the boundary surface between the governance core
//! and its host RPC client:
//!
//! - `Endpoint`: handle to one remote service instance
//! - `CallDescriptor` / `ServiceKey`: identity of one RPC invocation
//! - `InvokeResponse`: opaque result of a remote call
//! - `ActiveTracker`: per-(endpoint, method) in-flight call gauge
//!
//! The transport, codec and discovery layers live behind these traits;
//! nothing in this crate owns an endpoint, it only references them.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::EndpointOptions;
use crate::error::Result;

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Identity of a remote service: interface name plus optional group/version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceKey {
    /// Fully qualified service interface name
    pub interface: String,

    /// Service group, empty when ungrouped
    pub group: String,

    /// Service version, empty when unversioned
    pub version: String,
}

impl ServiceKey {
    /// Create a key for a plain, ungrouped, unversioned service
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            group: String::new(),
            version: String::new(),
        }
    }

    /// Create a fully qualified key
    pub fn with_group_version(
        interface: impl Into<String>,
        group: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            interface: interface.into(),
            group: group.into(),
            version: version.into(),
        }
    }

    /// Canonical `group/interface:version` form used for per-service caches
    pub fn qualified(&self) -> String {
        let mut key = String::new();
        if !self.group.is_empty() {
            key.push_str(&self.group);
            key.push('/');
        }
        key.push_str(&self.interface);
        if !self.version.is_empty() {
            key.push(':');
            key.push_str(&self.version);
        }
        key
    }
}

/// Descriptor of one outgoing RPC call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallDescriptor {
    /// Target service
    pub service: ServiceKey,

    /// Method name on the service
    pub method: String,

    /// Positional call arguments
    pub arguments: Vec<serde_json::Value>,
}

impl CallDescriptor {
    /// Create a call descriptor
    pub fn new(
        service: ServiceKey,
        method: impl Into<String>,
        arguments: Vec<serde_json::Value>,
    ) -> Self {
        Self {
            service,
            method: method.into(),
            arguments,
        }
    }

    /// Cache key scoping per-method state: `group/interface:version#method`
    pub fn method_key(&self) -> String {
        format!("{}#{}", self.service.qualified(), self.method)
    }
}

/// Opaque response of a remote invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeResponse {
    /// Decoded response payload
    pub payload: serde_json::Value,
}

impl InvokeResponse {
    /// Wrap a decoded payload
    pub fn new(payload: serde_json::Value) -> Self {
        Self { payload }
    }
}

/// Handle to one remote service instance
///
/// Implemented by the host's transport layer. The governance core only
/// reads the address and configuration and delegates the actual call.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Stable address of the instance, e.g. `10.0.0.1:20880`
    fn address(&self) -> &str;

    /// Configuration view for one method of the target service
    fn options(&self, method: &str) -> EndpointOptions;

    /// Millisecond timestamp at which this instance started.
    ///
    /// Feeds the warmup weight ramp; 0 means fully warmed up.
    fn started_at_ms(&self) -> u64 {
        0
    }

    /// Perform the remote call. Raises a fault on failure.
    async fn invoke(&self, call: &CallDescriptor) -> Result<InvokeResponse>;
}

impl std::fmt::Debug for dyn Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("address", &self.address())
            .finish()
    }
}

/// In-flight call gauge, keyed by (endpoint address, method)
///
/// Owned by the transport layer, which brackets every dispatched call with
/// `begin`/`end`. The least-active strategy only ever reads it.
#[derive(Debug, Default)]
pub struct ActiveTracker {
    counts: DashMap<(String, String), AtomicU32>,
}

impl ActiveTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of a call against (address, method)
    pub fn begin(&self, address: &str, method: &str) {
        self.counts
            .entry((address.to_string(), method.to_string()))
            .or_insert_with(|| AtomicU32::new(0))
            .fetch_add(1, Ordering::SeqCst);
    }

    /// Record the completion of a call against (address, method)
    pub fn end(&self, address: &str, method: &str) {
        if let Some(count) = self
            .counts
            .get(&(address.to_string(), method.to_string()))
        {
            // Saturating: an unmatched end must not wrap the gauge
            let _ = count.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                v.checked_sub(1)
            });
        }
    }

    /// Current in-flight count for (address, method)
    pub fn active(&self, address: &str, method: &str) -> u32 {
        self.counts
            .get(&(address.to_string(), method.to_string()))
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}
