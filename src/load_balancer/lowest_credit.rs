//! Lowest-credit load balancing strategy.
//!
//! Drains the replica closest to exhaustion first so the others keep headroom.

use std::sync::Arc;

use crate::load_balancer::{endpoint::Endpoint, round_robin::RoundRobin, LoadBalancer};

/// Balances closer than this are treated as equal.
const CREDIT_EPSILON: f64 = 0.01;

fn same_credit(a: f64, b: f64) -> bool {
    a == b || (a - b).abs() < CREDIT_EPSILON
}

#[derive(Debug, Default)]
pub struct LowestCredit {
    tie_breaker: RoundRobin,
}

impl LowestCredit {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for LowestCredit {
    fn next_server(&self, endpoints: &[Arc<Endpoint>]) -> Option<Arc<Endpoint>> {
        let min = endpoints
            .iter()
            .map(|e| e.credits())
            .min_by(|a, b| a.total_cmp(b))?;
        let tied: Vec<_> = endpoints
            .iter()
            .filter(|e| same_credit(e.credits(), min))
            .cloned()
            .collect();

        match tied.as_slice() {
            [only] => Some(only.clone()),
            _ => self.tie_breaker.next_server(&tied),
        }
    }
}
