//! Least-active load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{endpoint::Endpoint, round_robin::RoundRobin, LoadBalancer};

/// Selects the endpoint with the fewest in-flight requests.
/// Ties rotate through a round-robin counter.
#[derive(Debug, Default)]
pub struct LeastActive {
    tie_breaker: RoundRobin,
}

impl LeastActive {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for LeastActive {
    fn next_server(&self, endpoints: &[Arc<Endpoint>]) -> Option<Arc<Endpoint>> {
        let min = endpoints.iter().map(|e| e.active_requests()).min()?;
        let tied: Vec<_> = endpoints
            .iter()
            .filter(|e| e.active_requests() == min)
            .cloned()
            .collect();

        match tied.as_slice() {
            [only] => Some(only.clone()),
            _ => self.tie_breaker.next_server(&tied),
        }
    }
}
