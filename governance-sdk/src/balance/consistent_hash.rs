//! Consistent-hash strategy
//!
//! Deterministic: for a fixed candidate address set and fixed call
//! arguments the same endpoint is selected across calls and across process
//! restarts. One ring is cached per (service, method) and rebuilt only
//! when the candidate membership actually changes.

use std::sync::Arc;

use dashmap::DashMap;

use crate::balance::ring::{
    hash_segment, identity_token, md5_digest, ring_position, HashRing, VirtualNode,
};
use crate::balance::LoadBalance;
use crate::core::{CallDescriptor, Endpoint};
use crate::error::{GovernanceError, Result};

/// Consistent-hash load balancer
#[derive(Debug, Default)]
pub struct ConsistentHashLoadBalance {
    /// Ring cache keyed by (service, method)
    selectors: DashMap<String, Arc<Selector>>,
}

/// Immutable ring snapshot for one (service, method)
#[derive(Debug)]
struct Selector {
    /// Identity of the candidate set the ring was built from
    token: u64,

    /// Virtual-node ring mapping hash positions to endpoint addresses
    ring: HashRing<String>,

    /// Argument indices contributing to the lookup key
    hash_arguments: Vec<usize>,
}

impl Selector {
    fn build(candidates: &[Arc<dyn Endpoint>], call: &CallDescriptor, token: u64) -> Self {
        let options = candidates[0].options(&call.method);
        let replicas = options.hash_nodes;

        let mut ring = HashRing::new();
        for candidate in candidates {
            for node in virtual_nodes(candidate.address(), replicas) {
                ring.insert(node.hash, node.address);
            }
        }

        Self {
            token,
            ring,
            hash_arguments: options.hash_arguments,
        }
    }

    fn select_address(&self, call: &CallDescriptor) -> Option<&String> {
        let key = hash_key(call, &self.hash_arguments);
        self.ring.lookup(ring_position(&key))
    }
}

/// Expand one endpoint address into its virtual nodes.
///
/// `replicas / 4` MD5 digests of `"{address}{i}"`, four independent 32-bit
/// positions per digest.
pub(crate) fn virtual_nodes(address: &str, replicas: u32) -> Vec<VirtualNode> {
    let groups = (replicas / 4).max(1);
    let mut nodes = Vec::with_capacity((groups * 4) as usize);
    for group in 0..groups {
        let digest = md5_digest(&format!("{}{}", address, group));
        for segment in 0..4 {
            nodes.push(VirtualNode {
                hash: hash_segment(&digest, segment),
                address: address.to_string(),
            });
        }
    }
    nodes
}

/// Concatenated string form of the arguments at the configured indices.
///
/// A call with no qualifying arguments yields a constant key, so every
/// call for that method lands on the same endpoint; that is accepted
/// behavior, not a defect.
pub(crate) fn hash_key(call: &CallDescriptor, indices: &[usize]) -> String {
    let mut key = String::new();
    for &index in indices {
        if let Some(argument) = call.arguments.get(index) {
            match argument {
                serde_json::Value::String(s) => key.push_str(s),
                other => key.push_str(&other.to_string()),
            }
        }
    }
    key
}

impl ConsistentHashLoadBalance {
    /// Create a new consistent-hash balancer
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalance for ConsistentHashLoadBalance {
    fn name(&self) -> &'static str {
        "consistenthash"
    }

    fn select(
        &self,
        candidates: &[Arc<dyn Endpoint>],
        call: &CallDescriptor,
    ) -> Result<Arc<dyn Endpoint>> {
        if candidates.is_empty() {
            return Err(GovernanceError::no_candidates(call.method_key()));
        }

        let token = identity_token(candidates.iter().map(|c| c.address()));
        let key = call.method_key();

        let cached = self.selectors.get(&key).and_then(|existing| {
            if existing.token == token {
                Some(Arc::clone(existing.value()))
            } else {
                None
            }
        });
        let selector = match cached {
            Some(existing) => existing,
            None => {
                let built = Arc::new(Selector::build(candidates, call, token));
                tracing::debug!(
                    method = %key,
                    entries = built.ring.len(),
                    "rebuilt consistent hash ring"
                );
                self.selectors.insert(key, Arc::clone(&built));
                built
            }
        };

        let address = selector
            .select_address(call)
            .ok_or_else(|| GovernanceError::no_candidates(call.method_key()))?;

        candidates
            .iter()
            .find(|c| c.address() == address)
            .cloned()
            .ok_or_else(|| GovernanceError::no_candidates(call.method_key()))
    }
}
