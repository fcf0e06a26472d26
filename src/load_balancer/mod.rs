//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Sentence ready for synthesis
//!     → pool.rs (periodic recovery sweep, filter admissible endpoints)
//!     → Apply selection policy:
//!         - lowest_credit.rs (drain the lowest balance first)
//!         - least_conn.rs (pick endpoint with fewest in-flight requests)
//!         - round_robin.rs (break ties)
//!     → endpoint.rs (claim a slot, consume half-open probe)
//!     → EndpointGuard, or fall back to a temporarily failed endpoint
//! ```
//!
//! # Design Decisions
//! - Policies are stateless apart from the tie-break counter; endpoints track load
//! - Unhealthy or open-circuit endpoints excluded from selection
//! - In-flight slots are RAII guards so every exit path releases them
//! - Health and circuit transitions are serialized per endpoint

pub mod endpoint;
pub mod least_conn;
pub mod lowest_credit;
pub mod pool;
pub mod round_robin;

use std::fmt::Debug;
use std::sync::Arc;

use crate::config::SelectionPolicy;

pub use endpoint::{Endpoint, EndpointGuard, EndpointHealth};
pub use least_conn::LeastActive;
pub use lowest_credit::LowestCredit;
pub use pool::{EndpointPool, EndpointSnapshot, PoolError};
pub use round_robin::RoundRobin;

/// Picks one endpoint among already-admissible candidates.
pub trait LoadBalancer: Send + Sync + Debug {
    fn next_server(&self, endpoints: &[Arc<Endpoint>]) -> Option<Arc<Endpoint>>;
}

pub fn balancer_for(policy: SelectionPolicy) -> Box<dyn LoadBalancer> {
    match policy {
        SelectionPolicy::LowestCredit => Box::new(LowestCredit::new()),
        SelectionPolicy::LeastActive => Box::new(LeastActive::new()),
    }
}
