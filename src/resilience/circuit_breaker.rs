//! Circuit breaker for synthesis endpoint protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: endpoint assumed down, requests fail fast
//! - Half-Open: testing if endpoint recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: any temporary or permanent failure
//! Open → Half-Open: after backoff.delay(failure_count) (never when permanent)
//! Half-Open → Closed: probe request succeeds
//! Half-Open → Open: probe request fails
//! ```
//!
//! # Design Decisions
//! - Per-endpoint circuit breaker (not global)
//! - Fail fast in Open state (no waiting for timeout)
//! - Single probe in Half-Open (prevents hammering recovering endpoint)
//! - A probe that never reports back expires after its lease
//! - Client errors never move the state machine

use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::resilience::backoff::ExponentialBackoff;
use crate::resilience::classify::FailureClass;

/// Failure count marking an endpoint as permanently failed.
pub const PERMANENT_FAILURE_COUNT: u32 = u32::MAX;

/// Cap on consecutive temporary failures. Delays stop growing long before this.
pub const MAX_TEMPORARY_FAILURES: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Numeric encoding for the circuit state gauge.
    pub fn as_gauge(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    probe_granted_at: Option<Instant>,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
            probe_granted_at: None,
        }
    }
}

/// Per-endpoint circuit breaker. All transitions are serialized by one mutex.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerState>,
    backoff: ExponentialBackoff,
    probe_lease: Duration,
}

impl CircuitBreaker {
    /// `probe_lease` bounds how long a granted half-open probe blocks others.
    pub fn new(backoff: ExponentialBackoff, probe_lease: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerState::closed()),
            backoff,
            probe_lease,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cooled_down(&self, inner: &BreakerState, now: Instant) -> bool {
        if inner.failure_count == PERMANENT_FAILURE_COUNT {
            return false;
        }
        match inner.opened_at {
            Some(opened_at) => {
                now.saturating_duration_since(opened_at) > self.backoff.delay(inner.failure_count)
            }
            None => true,
        }
    }

    fn probe_available(&self, inner: &BreakerState, now: Instant) -> bool {
        match inner.probe_granted_at {
            Some(granted) => now.saturating_duration_since(granted) >= self.probe_lease,
            None => true,
        }
    }

    /// Ask to send one request. Mutating: an elapsed Open circuit moves to
    /// Half-Open and the caller holds the single probe.
    pub fn allow_request(&self) -> bool {
        let now = Instant::now();
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                if self.probe_available(&inner, now) {
                    inner.probe_granted_at = Some(now);
                    true
                } else {
                    false
                }
            }
            CircuitState::Open => {
                if self.cooled_down(&inner, now) {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_granted_at = Some(now);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Whether `allow_request` would currently succeed, without side effects.
    pub fn permits_request(&self) -> bool {
        let now = Instant::now();
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => self.probe_available(&inner, now),
            CircuitState::Open => self.cooled_down(&inner, now),
        }
    }

    /// Close the circuit after a successful probe. Only a Half-Open circuit
    /// moves; a success that started before the circuit opened leaves the
    /// backoff window running.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::HalfOpen {
            return;
        }
        *inner = BreakerState::closed();
    }

    pub fn record_failure(&self, class: FailureClass) {
        let now = Instant::now();
        let mut inner = self.lock();
        match class {
            FailureClass::Permanent => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.failure_count = PERMANENT_FAILURE_COUNT;
                inner.probe_granted_at = None;
            }
            FailureClass::Temporary => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                if inner.failure_count != PERMANENT_FAILURE_COUNT {
                    inner.failure_count = (inner.failure_count + 1).min(MAX_TEMPORARY_FAILURES);
                }
                inner.probe_granted_at = None;
            }
            FailureClass::ClientError => {
                // The probe told us nothing about the endpoint; let another one through.
                inner.probe_granted_at = None;
            }
        }
    }

    /// Force the circuit closed. The only way out of a permanent failure.
    pub fn reset(&self) {
        *self.lock() = BreakerState::closed();
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn is_permanently_open(&self) -> bool {
        self.lock().failure_count == PERMANENT_FAILURE_COUNT
    }

    pub fn backoff(&self) -> &ExponentialBackoff {
        &self.backoff
    }
}
