// Load Balancing Strategy Implementation
//
// This module provides load balancing strategies for picking one node out of
// the candidates that can serve an action or receive an emitted event.

use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Define the load balancing strategy trait
///
/// INTENTION: Provide a common interface for different load balancing
/// strategies that can be plugged into the Node for selecting remote nodes.
pub trait LoadBalancingStrategy: Send + Sync {
    /// Select a node from the list of candidates
    ///
    /// Returns an index into `candidates`. Only called with a non-empty
    /// slice; `key` is the action or event name being routed.
    fn select_node(&self, candidates: &[String], key: &str) -> usize;
}

/// Simple round-robin load balancer
///
/// INTENTION: Provide a basic load balancing strategy that distributes
/// requests evenly across all available nodes in a sequential fashion.
/// Being stateful and free of randomness, it is deterministic for tests.
#[derive(Debug, Default)]
pub struct RoundRobinLoadBalancer {
    /// The current index for round-robin selection
    current_index: AtomicUsize,
}

impl RoundRobinLoadBalancer {
    /// Create a new round-robin load balancer
    pub fn new() -> Self {
        RoundRobinLoadBalancer {
            current_index: AtomicUsize::new(0),
        }
    }
}

impl LoadBalancingStrategy for RoundRobinLoadBalancer {
    fn select_node(&self, candidates: &[String], _key: &str) -> usize {
        if candidates.is_empty() {
            return 0;
        }

        self.current_index.fetch_add(1, Ordering::SeqCst) % candidates.len()
    }
}

/// Uniformly random load balancer
#[derive(Debug, Default)]
pub struct RandomLoadBalancer;

impl RandomLoadBalancer {
    pub fn new() -> Self {
        RandomLoadBalancer
    }
}

impl LoadBalancingStrategy for RandomLoadBalancer {
    fn select_node(&self, candidates: &[String], _key: &str) -> usize {
        if candidates.is_empty() {
            return 0;
        }
        rand::thread_rng().gen_range(0..candidates.len())
    }
}

/// Default strategy used by nodes that are not configured otherwise
pub fn default_strategy() -> Arc<dyn LoadBalancingStrategy> {
    Arc::new(RoundRobinLoadBalancer::new())
}
