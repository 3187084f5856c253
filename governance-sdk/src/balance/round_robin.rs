//! Weighted smooth round-robin strategy
//!
//! Keeps one atomically incremented sequence per (service, method). With
//! equal weights the sequence indexes the candidate list directly; with
//! unequal weights a pass-based scan spreads high-weight endpoints evenly
//! across the weight cycle instead of bursting them contiguously.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::balance::LoadBalance;
use crate::core::{CallDescriptor, Endpoint};
use crate::error::{GovernanceError, Result};

/// Round-robin load balancer with smooth weighting
#[derive(Debug, Default)]
pub struct RoundRobinLoadBalance {
    /// Per (service, method) monotonic sequence counters
    sequences: DashMap<String, AtomicU64>,
}

impl RoundRobinLoadBalance {
    /// Create a new round-robin balancer
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim the next sequence value for a method key.
    ///
    /// No two concurrent callers observe the same value for the same key.
    fn next_sequence(&self, key: String) -> u64 {
        self.sequences
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::SeqCst)
    }
}

impl LoadBalance for RoundRobinLoadBalance {
    fn name(&self) -> &'static str {
        "roundrobin"
    }

    fn select(
        &self,
        candidates: &[Arc<dyn Endpoint>],
        call: &CallDescriptor,
    ) -> Result<Arc<dyn Endpoint>> {
        if candidates.is_empty() {
            return Err(GovernanceError::no_candidates(call.method_key()));
        }

        let weights: Vec<u64> = candidates
            .iter()
            .map(|c| c.options(&call.method).weight as u64)
            .collect();
        let total_weight: u64 = weights.iter().sum();
        let max_weight = weights.iter().copied().max().unwrap_or(0);
        let min_weight = weights.iter().copied().min().unwrap_or(0);

        let sequence = self.next_sequence(call.method_key());

        if max_weight > 0 && min_weight < max_weight {
            // Smooth weighted round robin: walk the weight cycle in passes,
            // consuming one unit of each still-positive weight per pass
            let mut remaining = weights;
            let mut slot = (sequence % total_weight) as i64;
            for _ in 0..max_weight {
                for (index, candidate) in candidates.iter().enumerate() {
                    if slot == 0 && remaining[index] > 0 {
                        return Ok(Arc::clone(candidate));
                    }
                    if remaining[index] > 0 {
                        remaining[index] -= 1;
                        slot -= 1;
                    }
                }
            }
        }

        // Equal weights (or exhausted cycle): plain rotation
        let index = (sequence % candidates.len() as u64) as usize;
        Ok(Arc::clone(&candidates[index]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::tests::support::{call_with_args, TestEndpoint};

    fn endpoints(weights: &[(&str, u32)]) -> Vec<Arc<dyn Endpoint>> {
        weights
            .iter()
            .map(|(addr, w)| TestEndpoint::shared_weighted(addr, *w))
            .collect()
    }

    #[test]
    fn test_equal_weights_strict_rotation() {
        let lb = RoundRobinLoadBalance::new();
        let candidates = endpoints(&[("p1:20880", 100), ("p2:20880", 100)]);
        let call = call_with_args(vec![]);

        let picks: Vec<String> = (0..4)
            .map(|_| lb.select(&candidates, &call).unwrap().address().to_string())
            .collect();
        assert_eq!(picks, vec!["p1:20880", "p2:20880", "p1:20880", "p2:20880"]);
    }

    #[test]
    fn test_weighted_ratio_converges() {
        let lb = RoundRobinLoadBalance::new();
        let candidates = endpoints(&[("a:1", 3), ("b:1", 1)]);
        let call = call_with_args(vec![]);

        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..4000 {
            let chosen = lb.select(&candidates, &call).unwrap();
            *counts.entry(chosen.address().to_string()).or_default() += 1;
        }
        assert_eq!(counts["a:1"], 3000);
        assert_eq!(counts["b:1"], 1000);
    }

    #[test]
    fn test_weighted_selection_is_smooth() {
        // Weights {a:3, b:1}: within each cycle of 4, "a" never has to wait
        // more than two slots between repeats
        let lb = RoundRobinLoadBalance::new();
        let candidates = endpoints(&[("a:1", 3), ("b:1", 1)]);
        let call = call_with_args(vec![]);

        let picks: Vec<String> = (0..16)
            .map(|_| lb.select(&candidates, &call).unwrap().address().to_string())
            .collect();
        let mut last_a: Option<usize> = None;
        for (slot, pick) in picks.iter().enumerate() {
            if pick == "a:1" {
                if let Some(prev) = last_a {
                    assert!(slot - prev <= 2, "a burst gap {} at slot {}", slot - prev, slot);
                }
                last_a = Some(slot);
            }
        }
    }

    #[test]
    fn test_separate_methods_use_separate_sequences() {
        let lb = RoundRobinLoadBalance::new();
        let candidates = endpoints(&[("p1:1", 100), ("p2:1", 100)]);

        let call_a = crate::tests::support::call_for_method("getUser", vec![]);
        let call_b = crate::tests::support::call_for_method("listUsers", vec![]);

        assert_eq!(lb.select(&candidates, &call_a).unwrap().address(), "p1:1");
        // A different method starts its own rotation from the beginning
        assert_eq!(lb.select(&candidates, &call_b).unwrap().address(), "p1:1");
        assert_eq!(lb.select(&candidates, &call_a).unwrap().address(), "p2:1");
    }

    #[test]
    fn test_empty_candidates_is_error() {
        let lb = RoundRobinLoadBalance::new();
        let call = call_with_args(vec![]);
        assert!(lb.select(&[], &call).is_err());
    }

    #[test]
    fn test_single_candidate_always_selected() {
        let lb = RoundRobinLoadBalance::new();
        let candidates = endpoints(&[("only:1", 42)]);
        let call = call_with_args(vec![]);
        for _ in 0..3 {
            assert_eq!(lb.select(&candidates, &call).unwrap().address(), "only:1");
        }
    }
}
