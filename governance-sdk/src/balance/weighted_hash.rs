//! Weighted consistent-hash strategy with warmup
//!
//! Extends the consistent-hash strategy: each endpoint owns a share of the
//! ring proportional to its effective weight, and the effective weight of a
//! freshly started endpoint ramps up over its warmup window. The ring is
//! rebuilt copy-on-write and swapped atomically; a full rebuild is
//! O(endpoints x replicas) and never runs per request. While any endpoint
//! is warming up, the ring is re-evaluated lazily at a fixed interval on
//! the calling path, with no background timer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::balance::consistent_hash::hash_key;
use crate::balance::ring::{hash_segment, identity_token, md5_digest, ring_position, HashRing};
use crate::balance::{warmup_weight, LoadBalance};
use crate::core::{unix_millis, CallDescriptor, Endpoint};
use crate::error::{GovernanceError, Result};

/// Interval between warmup-driven ring rebuilds
pub const DEFAULT_REBUILD_INTERVAL_MS: u64 = 60_000;

/// Weighted consistent-hash load balancer
pub struct WeightedConsistentHashLoadBalance {
    /// Selector cache keyed by (service, method)
    selectors: DashMap<String, Arc<WeightedSelector>>,

    /// Minimum spacing between warmup-driven rebuilds
    rebuild_interval_ms: u64,
}

/// Ring state for one (service, method); the ring itself is swapped
/// wholesale, readers never observe a partially built one.
struct WeightedSelector {
    /// Identity of the candidate set the current ring was built from
    token: AtomicU64,

    /// Current ring, replaced atomically on rebuild
    ring: RwLock<Arc<HashRing<Arc<dyn Endpoint>>>>,

    /// Claim flag for the one-time first stable rebuild
    first_built: AtomicBool,

    /// Timestamp of the last rebuild, used to pace warmup ticks
    last_rebuilt_ms: AtomicU64,
}

impl WeightedSelector {
    fn new() -> Self {
        Self {
            token: AtomicU64::new(0),
            ring: RwLock::new(Arc::new(HashRing::new())),
            first_built: AtomicBool::new(false),
            last_rebuilt_ms: AtomicU64::new(0),
        }
    }
}

/// Build a ring whose virtual-node shares follow effective weights.
///
/// Per-endpoint node count is `weight / totalWeight x replicas x n`,
/// floored, never below one node.
pub(crate) fn build_weighted_ring(
    candidates: &[Arc<dyn Endpoint>],
    call: &CallDescriptor,
    now_ms: u64,
) -> HashRing<Arc<dyn Endpoint>> {
    let endpoint_count = candidates.len() as u64;
    let replicas = candidates[0].options(&call.method).hash_nodes as u64;

    let effective: Vec<u64> = candidates
        .iter()
        .map(|candidate| {
            let options = candidate.options(&call.method);
            let uptime = now_ms.saturating_sub(candidate.started_at_ms());
            warmup_weight(uptime, options.warmup_ms, options.weight) as u64
        })
        .collect();
    let total_weight: u64 = effective.iter().sum();

    let mut ring = HashRing::new();
    for (index, candidate) in candidates.iter().enumerate() {
        let node_count = if total_weight == 0 {
            1
        } else {
            (effective[index] * replicas * endpoint_count / total_weight).max(1)
        };
        // Four ring positions per digest; the last digest is consumed only
        // partially so small node counts keep their exact floor
        let mut emitted = 0u64;
        let mut group = 0u64;
        while emitted < node_count {
            let digest = md5_digest(&format!("{}{}", candidate.address(), group));
            for segment in 0..4 {
                if emitted == node_count {
                    break;
                }
                ring.insert(hash_segment(&digest, segment), Arc::clone(candidate));
                emitted += 1;
            }
            group += 1;
        }
    }
    ring
}

impl WeightedConsistentHashLoadBalance {
    /// Create a new weighted consistent-hash balancer
    pub fn new() -> Self {
        Self {
            selectors: DashMap::new(),
            rebuild_interval_ms: DEFAULT_REBUILD_INTERVAL_MS,
        }
    }

    /// Override the warmup rebuild interval
    pub fn with_rebuild_interval_ms(mut self, interval_ms: u64) -> Self {
        self.rebuild_interval_ms = interval_ms;
        self
    }

    /// Whether any candidate is still inside its warmup window
    fn any_warming(
        candidates: &[Arc<dyn Endpoint>],
        call: &CallDescriptor,
        now_ms: u64,
    ) -> bool {
        candidates.iter().any(|candidate| {
            let options = candidate.options(&call.method);
            now_ms < candidate.started_at_ms().saturating_add(options.warmup_ms)
        })
    }

    /// Select with an explicit clock; the trait entry point feeds wall time
    pub fn select_at(
        &self,
        candidates: &[Arc<dyn Endpoint>],
        call: &CallDescriptor,
        now_ms: u64,
    ) -> Result<Arc<dyn Endpoint>> {
        if candidates.is_empty() {
            return Err(GovernanceError::no_candidates(call.method_key()));
        }

        let key = call.method_key();
        let selector = Arc::clone(
            self.selectors
                .entry(key.clone())
                .or_insert_with(|| Arc::new(WeightedSelector::new()))
                .value(),
        );

        let token = identity_token(candidates.iter().map(|c| c.address()));

        let mut rebuild = false;
        if selector
            .first_built
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            // First stable rebuild, claimed exactly once
            rebuild = true;
        } else if selector.token.load(Ordering::SeqCst) != token {
            rebuild = true;
        } else if Self::any_warming(candidates, call, now_ms) {
            let last = selector.last_rebuilt_ms.load(Ordering::SeqCst);
            if now_ms.saturating_sub(last) >= self.rebuild_interval_ms
                && selector
                    .last_rebuilt_ms
                    .compare_exchange(last, now_ms, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                rebuild = true;
            }
        }

        if rebuild {
            let fresh = build_weighted_ring(candidates, call, now_ms);
            tracing::debug!(method = %key, entries = fresh.len(), "rebuilt weighted hash ring");
            selector.token.store(token, Ordering::SeqCst);
            selector.last_rebuilt_ms.store(now_ms, Ordering::SeqCst);
            *selector.ring.write() = Arc::new(fresh);
        }

        let ring = Arc::clone(&selector.ring.read());
        let indices = candidates[0].options(&call.method).hash_arguments;
        let position = ring_position(&hash_key(call, &indices));
        ring.lookup(position)
            .cloned()
            .ok_or_else(|| GovernanceError::no_candidates(call.method_key()))
    }
}

impl Default for WeightedConsistentHashLoadBalance {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalance for WeightedConsistentHashLoadBalance {
    fn name(&self) -> &'static str {
        "weightedconsistenthash"
    }

    fn select(
        &self,
        candidates: &[Arc<dyn Endpoint>],
        call: &CallDescriptor,
    ) -> Result<Arc<dyn Endpoint>> {
        self.select_at(candidates, call, unix_millis())
    }
}
