//! Shared test fixtures: an in-memory endpoint and call builders

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::config::EndpointOptions;
use crate::core::{CallDescriptor, Endpoint, InvokeResponse, ServiceKey};
use crate::error::{GovernanceError, Result};

/// In-memory endpoint with programmable options and fault injection
pub struct TestEndpoint {
    address: String,
    options: HashMap<String, String>,
    started_at_ms: u64,
    failing: AtomicBool,
    invocations: AtomicU32,
}

impl TestEndpoint {
    /// Start building an endpoint at `address`
    pub fn builder(address: &str) -> TestEndpointBuilder {
        TestEndpointBuilder {
            address: address.to_string(),
            options: HashMap::new(),
            started_at_ms: 0,
        }
    }

    /// Shared endpoint with default options
    pub fn shared(address: &str) -> Arc<dyn Endpoint> {
        Self::builder(address).shared()
    }

    /// Shared endpoint with an explicit weight
    pub fn shared_weighted(address: &str, weight: u32) -> Arc<dyn Endpoint> {
        Self::builder(address).weight(weight).shared()
    }

    /// Make subsequent invocations fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// How many times `invoke` actually ran
    pub fn invocations(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Endpoint for TestEndpoint {
    fn address(&self) -> &str {
        &self.address
    }

    fn options(&self, _method: &str) -> EndpointOptions {
        EndpointOptions::from_map(&self.options).expect("valid test options")
    }

    fn started_at_ms(&self) -> u64 {
        self.started_at_ms
    }

    async fn invoke(&self, _call: &CallDescriptor) -> Result<InvokeResponse> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(GovernanceError::remote(format!(
                "injected fault from {}",
                self.address
            )));
        }
        Ok(InvokeResponse::new(json!({ "address": self.address })))
    }
}

/// Builder for `TestEndpoint`
pub struct TestEndpointBuilder {
    address: String,
    options: HashMap<String, String>,
    started_at_ms: u64,
}

impl TestEndpointBuilder {
    /// Set the `weight` option
    pub fn weight(mut self, weight: u32) -> Self {
        self.options.insert("weight".to_string(), weight.to_string());
        self
    }

    /// Set one raw endpoint option
    pub fn option(mut self, key: &str, value: &str) -> Self {
        self.options.insert(key.to_string(), value.to_string());
        self
    }

    /// Set the instance startup timestamp
    pub fn started_at(mut self, started_at_ms: u64) -> Self {
        self.started_at_ms = started_at_ms;
        self
    }

    /// Build with the concrete type exposed, for fault injection
    pub fn build(self) -> Arc<TestEndpoint> {
        Arc::new(TestEndpoint {
            address: self.address,
            options: self.options,
            started_at_ms: self.started_at_ms,
            failing: AtomicBool::new(false),
            invocations: AtomicU32::new(0),
        })
    }

    /// Build as a shared trait object
    pub fn shared(self) -> Arc<dyn Endpoint> {
        self.build()
    }
}

/// Call descriptor for the default test service and method
pub fn call_with_args(arguments: Vec<serde_json::Value>) -> CallDescriptor {
    call_for_method("getUser", arguments)
}

/// Call descriptor for an explicit method on the default test service
pub fn call_for_method(method: &str, arguments: Vec<serde_json::Value>) -> CallDescriptor {
    CallDescriptor::new(ServiceKey::new("com.demo.UserService"), method, arguments)
}
