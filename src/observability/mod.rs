//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!     → stage.rs (one span + duration per pipeline stage)
//!     → events.rs (endpoint failure / low-credit events)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Event subscribers (server binary logs them)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through all stages via RequestContext
//! - Metrics are cheap (atomic increments)
//! - Stage tracing is explicit function wrapping, not ambient state

pub mod events;
pub mod logging;
pub mod metrics;
pub mod stage;
