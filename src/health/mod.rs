//! Endpoint health subsystem.
//!
//! # Data Flow
//! ```text
//! Credit monitor (credit_monitor.rs):
//!     Periodic timer
//!     → GET /v1/credits on each endpoint
//!     → Store balance on the endpoint (feeds lowest-credit selection)
//!     → Below threshold: mark permanently failed, publish LowCredit event
//!
//! Passive health (load_balancer::pool):
//!     Synthesis outcome reported
//!     → Classify failure
//!     → Update endpoint health and circuit breaker
//! ```
//!
//! # Design Decisions
//! - Poll failures never change endpoint state; only a real balance does
//! - Low credit is permanent until an operator resets the endpoint
//! - Health state is per-endpoint, not per-pool

pub mod credit_monitor;

pub use credit_monitor::CreditMonitor;
