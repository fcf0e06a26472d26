//! Synthesis endpoint abstraction.
//!
//! # Responsibilities
//! - Represent a single synthesis replica
//! - Track in-flight requests (for least-active selection and admission)
//! - Enforce max concurrency limits
//! - Own the replica's health state and circuit breaker

use serde::Serialize;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use url::Url;

use crate::config::EndpointConfig;
use crate::observability::metrics;
use crate::resilience::{CircuitBreaker, ExponentialBackoff};

/// Endpoint health as seen by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndpointHealth {
    Healthy,
    TemporaryFailure,
    PermanentFailure,
    ClientError,
}

/// A single synthesis replica.
#[derive(Debug)]
pub struct Endpoint {
    pub id: String,
    pub base_url: Url,
    api_key: String,
    /// Maximum concurrent requests allowed.
    pub max_concurrent: usize,
    active_requests: AtomicUsize,
    /// f64 bits; starts at +inf ("unlimited").
    credits: AtomicU64,
    /// Guards health transitions. Lock order: health, then breaker.
    health: Mutex<EndpointHealth>,
    breaker: CircuitBreaker,
}

impl Endpoint {
    pub fn new(
        id: impl Into<String>,
        base_url: Url,
        api_key: impl Into<String>,
        max_concurrent: usize,
        breaker: CircuitBreaker,
    ) -> Self {
        Self {
            id: id.into(),
            base_url,
            api_key: api_key.into(),
            max_concurrent,
            active_requests: AtomicUsize::new(0),
            credits: AtomicU64::new(f64::INFINITY.to_bits()),
            health: Mutex::new(EndpointHealth::Healthy),
            breaker,
        }
    }

    pub fn from_config(
        config: &EndpointConfig,
        backoff: ExponentialBackoff,
        probe_lease: Duration,
    ) -> Result<Self, url::ParseError> {
        let base_url = Url::parse(&config.base_url)?;
        Ok(Self::new(
            config.id.clone(),
            base_url,
            config.api_key.clone(),
            config.max_concurrent,
            CircuitBreaker::new(backoff, probe_lease),
        ))
    }

    /// `segments` appended below the base path, so `https://host/tts` keeps
    /// its `/tts` prefix. `None` for base URLs that cannot carry a path.
    pub fn api_url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Option<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut().ok()?.pop_if_empty().extend(segments);
        Some(url)
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Get the current number of in-flight requests.
    pub fn active_requests(&self) -> usize {
        self.active_requests.load(Ordering::Acquire)
    }

    pub fn credits(&self) -> f64 {
        f64::from_bits(self.credits.load(Ordering::Relaxed))
    }

    pub fn set_credits(&self, credits: f64) {
        self.credits.store(credits.to_bits(), Ordering::Relaxed);
    }

    pub fn health(&self) -> EndpointHealth {
        *self.lock_health()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub(crate) fn lock_health(&self) -> MutexGuard<'_, EndpointHealth> {
        self.health.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read-only admission check used to filter candidates.
    pub fn can_accept_request(&self) -> bool {
        self.health() == EndpointHealth::Healthy
            && self.active_requests() < self.max_concurrent
            && self.breaker.permits_request()
    }

    /// Claim a slot on this endpoint. Consumes the half-open probe if the
    /// circuit is recovering. Returns `None` if full, unhealthy, or refused
    /// by the breaker.
    pub fn try_acquire(self: &Arc<Self>) -> Option<EndpointGuard> {
        if self.health() != EndpointHealth::Healthy {
            return None;
        }

        let mut prev = self.active_requests.load(Ordering::Acquire);
        loop {
            if prev >= self.max_concurrent {
                return None;
            }
            match self.active_requests.compare_exchange_weak(
                prev,
                prev + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(x) => prev = x,
            }
        }

        // From here on the guard owns the slot and releases it on every path.
        let guard = EndpointGuard::claimed(self.clone());
        if self.breaker.allow_request() {
            Some(guard)
        } else {
            None
        }
    }

    /// Claim a slot ignoring health, capacity and breaker. Fallback only.
    pub fn acquire_unchecked(self: &Arc<Self>) -> EndpointGuard {
        self.active_requests.fetch_add(1, Ordering::AcqRel);
        EndpointGuard::claimed(self.clone())
    }
}

/// A RAII guard that holds one in-flight slot on an endpoint.
#[derive(Debug)]
pub struct EndpointGuard {
    endpoint: Arc<Endpoint>,
}

impl EndpointGuard {
    fn claimed(endpoint: Arc<Endpoint>) -> Self {
        metrics::record_active_requests(&endpoint.id, endpoint.active_requests());
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }
}

impl Deref for EndpointGuard {
    type Target = Endpoint;
    fn deref(&self) -> &Self::Target {
        &self.endpoint
    }
}

impl Drop for EndpointGuard {
    fn drop(&mut self) {
        let remaining = self.endpoint.active_requests.fetch_sub(1, Ordering::AcqRel) - 1;
        metrics::record_active_requests(&self.endpoint.id, remaining);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn endpoint(id: &str, max_concurrent: usize) -> Arc<Endpoint> {
        Arc::new(Endpoint::new(
            id,
            Url::parse(&format!("http://{id}.test")).unwrap(),
            "key",
            max_concurrent,
            CircuitBreaker::new(
                ExponentialBackoff::from_millis(1_000, 60_000).unwrap(),
                Duration::from_secs(30),
            ),
        ))
    }
}
