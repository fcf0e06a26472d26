//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Synthesis call fails:
//!     → classify.rs (status / transport error → FailureClass)
//!     → circuit_breaker.rs (open circuit, or ignore client errors)
//!     → backoff.rs (cooldown before the next half-open probe)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Circuit breaker prevents hammering a failing replica
//! - Permanent failures need an explicit reset, never a timer
//! - Time comes from tokio so the state machine is testable with a paused clock

pub mod backoff;
pub mod circuit_breaker;
pub mod classify;

pub use backoff::{BackoffError, ExponentialBackoff};
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use classify::FailureClass;
