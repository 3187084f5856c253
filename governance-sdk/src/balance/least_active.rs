//! Least-active strategy
//!
//! Prefers the endpoint with the fewest in-flight calls for the method.
//! Among equally loaded endpoints, the tie break is biased by configured
//! weight; with equal weights it is uniform random.

use std::sync::Arc;

use rand::Rng;

use crate::balance::LoadBalance;
use crate::core::{ActiveTracker, CallDescriptor, Endpoint};
use crate::error::{GovernanceError, Result};

/// Least-active load balancer
pub struct LeastActiveLoadBalance {
    /// In-flight gauge owned by the transport layer, read-only here
    tracker: Arc<ActiveTracker>,
}

impl LeastActiveLoadBalance {
    /// Create a least-active balancer reading from `tracker`
    pub fn new(tracker: Arc<ActiveTracker>) -> Self {
        Self { tracker }
    }
}

impl LoadBalance for LeastActiveLoadBalance {
    fn name(&self) -> &'static str {
        "leastactive"
    }

    fn select(
        &self,
        candidates: &[Arc<dyn Endpoint>],
        call: &CallDescriptor,
    ) -> Result<Arc<dyn Endpoint>> {
        if candidates.is_empty() {
            return Err(GovernanceError::no_candidates(call.method_key()));
        }

        let mut least_active = u32::MAX;
        let mut tied: Vec<usize> = Vec::new();
        let mut tied_weights: Vec<u64> = Vec::new();
        let mut total_weight: u64 = 0;
        let mut first_weight: u64 = 0;
        let mut same_weight = true;

        for (index, candidate) in candidates.iter().enumerate() {
            let active = self.tracker.active(candidate.address(), &call.method);
            let weight = candidate.options(&call.method).weight as u64;

            if active < least_active {
                least_active = active;
                tied.clear();
                tied.push(index);
                tied_weights.clear();
                tied_weights.push(weight);
                total_weight = weight;
                first_weight = weight;
                same_weight = true;
            } else if active == least_active {
                tied.push(index);
                tied_weights.push(weight);
                total_weight += weight;
                if weight != first_weight {
                    same_weight = false;
                }
            }
        }

        if tied.len() == 1 {
            return Ok(Arc::clone(&candidates[tied[0]]));
        }

        if !same_weight && total_weight > 0 {
            // Weighted random draw among the tied candidates
            let mut offset = rand::thread_rng().gen_range(0..total_weight) as i64;
            for (position, &index) in tied.iter().enumerate() {
                offset -= tied_weights[position] as i64;
                if offset < 0 {
                    return Ok(Arc::clone(&candidates[index]));
                }
            }
        }

        // Equal weights among the tied set: uniform random
        let pick = rand::thread_rng().gen_range(0..tied.len());
        Ok(Arc::clone(&candidates[tied[pick]]))
    }
}
