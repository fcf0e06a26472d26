//! Endpoint pool management.
//!
//! # Responsibilities
//! - Own every synthesis endpoint for the process lifetime
//! - Apply the selection policy to admissible endpoints
//! - Turn reported outcomes into health and circuit transitions
//! - Publish failure events

use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::time::Instant;

use crate::config::SynthesisConfig;
use crate::load_balancer::{
    balancer_for,
    endpoint::{Endpoint, EndpointGuard, EndpointHealth},
    LoadBalancer,
};
use crate::observability::events::{EndpointEvent, EventBus};
use crate::observability::metrics;
use crate::resilience::{CircuitState, ExponentialBackoff, FailureClass};
use crate::synthesis::error::SynthesisError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("no synthesis endpoints configured")]
    Empty,

    #[error("all synthesis endpoints are permanently failed")]
    AllPermanentlyFailed,

    #[error("no synthesis endpoint can take a request right now")]
    Unavailable,

    #[error("unknown endpoint '{0}'")]
    UnknownEndpoint(String),

    #[error("invalid endpoint '{id}': {reason}")]
    InvalidEndpoint { id: String, reason: String },
}

/// Point-in-time view of one endpoint for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointSnapshot {
    pub id: String,
    pub base_url: String,
    pub health: EndpointHealth,
    pub circuit_state: CircuitState,
    pub failure_count: u32,
    pub active_requests: usize,
    pub max_concurrent: usize,
    /// `None` while the balance is unknown (unlimited).
    pub credits: Option<f64>,
}

/// Client-side load balancer over the synthesis replicas.
#[derive(Debug)]
pub struct EndpointPool {
    endpoints: Vec<Arc<Endpoint>>,
    balancer: Box<dyn LoadBalancer>,
    events: EventBus,
    recovery_interval: Duration,
    last_recovery_check: Mutex<Instant>,
}

impl EndpointPool {
    pub fn new(
        endpoints: Vec<Arc<Endpoint>>,
        balancer: Box<dyn LoadBalancer>,
        events: EventBus,
        recovery_interval: Duration,
    ) -> Self {
        Self {
            endpoints,
            balancer,
            events,
            recovery_interval,
            last_recovery_check: Mutex::new(Instant::now()),
        }
    }

    /// Build the pool from configuration. Half-open probes are leased for
    /// one synthesis request timeout.
    pub fn from_config(config: &SynthesisConfig, events: EventBus) -> Result<Self, PoolError> {
        let backoff = ExponentialBackoff::from_millis(
            config.backoff.base_delay_ms,
            config.backoff.max_delay_ms,
        )
        .map_err(|e| PoolError::InvalidEndpoint {
            id: "*".to_string(),
            reason: e.to_string(),
        })?;
        let probe_lease = Duration::from_millis(config.request_timeout_ms);

        let mut endpoints = Vec::with_capacity(config.endpoints.len());
        for endpoint in &config.endpoints {
            let built = Endpoint::from_config(endpoint, backoff, probe_lease).map_err(|e| {
                PoolError::InvalidEndpoint {
                    id: endpoint.id.clone(),
                    reason: e.to_string(),
                }
            })?;
            endpoints.push(Arc::new(built));
        }
        if endpoints.is_empty() {
            return Err(PoolError::Empty);
        }

        tracing::info!(
            endpoints = endpoints.len(),
            policy = ?config.balancer.policy,
            "Synthesis endpoint pool ready"
        );

        Ok(Self::new(
            endpoints,
            balancer_for(config.balancer.policy),
            events,
            Duration::from_secs(config.balancer.recovery_check_interval_secs),
        ))
    }

    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Endpoint>> {
        self.endpoints.iter().find(|e| e.id == id)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Pick an endpoint and claim a slot on it.
    pub fn select(&self) -> Result<EndpointGuard, PoolError> {
        if self.endpoints.is_empty() {
            return Err(PoolError::Empty);
        }
        self.maybe_recover();

        // Another request can take the last slot or the probe between the
        // filter and the claim; retry a bounded number of times.
        for _ in 0..self.endpoints.len() {
            let eligible: Vec<_> = self
                .endpoints
                .iter()
                .filter(|e| e.can_accept_request())
                .cloned()
                .collect();
            let Some(choice) = self.balancer.next_server(&eligible) else {
                break;
            };
            if let Some(guard) = choice.try_acquire() {
                tracing::debug!(
                    endpoint = %guard.id,
                    active = guard.active_requests(),
                    credits = guard.credits(),
                    "Selected synthesis endpoint"
                );
                return Ok(guard);
            }
        }

        self.fallback()
    }

    fn fallback(&self) -> Result<EndpointGuard, PoolError> {
        if let Some(endpoint) = self
            .endpoints
            .iter()
            .find(|e| e.health() == EndpointHealth::TemporaryFailure)
        {
            tracing::warn!(
                endpoint = %endpoint.id,
                "No healthy synthesis endpoint, falling back to temporarily failed one"
            );
            return Ok(endpoint.acquire_unchecked());
        }

        if self
            .endpoints
            .iter()
            .all(|e| e.health() == EndpointHealth::PermanentFailure)
        {
            tracing::error!("All synthesis endpoints are permanently failed");
            return Err(PoolError::AllPermanentlyFailed);
        }

        tracing::warn!("All healthy synthesis endpoints are busy");
        Err(PoolError::Unavailable)
    }

    /// Bring temporarily failed endpoints back once their backoff has
    /// elapsed. Runs at most once per recovery interval.
    fn maybe_recover(&self) {
        let now = Instant::now();
        {
            let mut last = self
                .last_recovery_check
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if now.saturating_duration_since(*last) < self.recovery_interval {
                return;
            }
            *last = now;
        }

        for endpoint in &self.endpoints {
            let mut health = endpoint.lock_health();
            if *health == EndpointHealth::TemporaryFailure && endpoint.breaker().permits_request() {
                *health = EndpointHealth::Healthy;
                tracing::info!(endpoint = %endpoint.id, "Endpoint backoff elapsed, back in rotation");
            }
        }
    }

    pub fn report_success(&self, endpoint: &Endpoint) {
        let mut health = endpoint.lock_health();
        endpoint.breaker().record_success();
        if *health == EndpointHealth::TemporaryFailure {
            *health = EndpointHealth::Healthy;
            tracing::info!(endpoint = %endpoint.id, "Endpoint recovered");
        }
        metrics::record_circuit_state(&endpoint.id, endpoint.breaker().state());
    }

    /// Classify a failed call, update the endpoint, and publish an event.
    pub fn report_failure(&self, endpoint: &Endpoint, error: &SynthesisError) -> FailureClass {
        let class = error.classify();
        self.record_failure(endpoint, class, error.description());
        class
    }

    pub fn record_failure(&self, endpoint: &Endpoint, class: FailureClass, message: String) {
        {
            let mut health = endpoint.lock_health();
            endpoint.breaker().record_failure(class);
            if *health != EndpointHealth::PermanentFailure {
                match class {
                    FailureClass::Temporary => *health = EndpointHealth::TemporaryFailure,
                    FailureClass::Permanent => *health = EndpointHealth::PermanentFailure,
                    FailureClass::ClientError => {}
                }
            }
        }

        match class {
            FailureClass::Temporary => {
                tracing::warn!(endpoint = %endpoint.id, reason = %message, "Endpoint temporary failure");
            }
            FailureClass::Permanent => {
                tracing::error!(endpoint = %endpoint.id, reason = %message, "Endpoint permanent failure");
            }
            FailureClass::ClientError => {
                tracing::warn!(endpoint = %endpoint.id, reason = %message, "Client error, endpoint state kept");
            }
        }

        metrics::record_endpoint_failure(&endpoint.id, class);
        metrics::record_circuit_state(&endpoint.id, endpoint.breaker().state());
        self.events.publish(EndpointEvent::Failure {
            endpoint_id: endpoint.id.clone(),
            class,
            message,
            occurred_at: SystemTime::now(),
        });
    }

    /// Take an endpoint out of rotation until an explicit reset.
    pub fn mark_permanently_failed(&self, endpoint: &Endpoint, reason: &str) {
        let mut health = endpoint.lock_health();
        endpoint.breaker().record_failure(FailureClass::Permanent);
        *health = EndpointHealth::PermanentFailure;
        tracing::error!(endpoint = %endpoint.id, reason = %reason, "Endpoint marked permanently failed");
        metrics::record_circuit_state(&endpoint.id, CircuitState::Open);
    }

    /// Restore an endpoint to service and close its circuit.
    pub fn reset(&self, id: &str) -> Result<(), PoolError> {
        let endpoint = self
            .get(id)
            .ok_or_else(|| PoolError::UnknownEndpoint(id.to_string()))?;
        let mut health = endpoint.lock_health();
        endpoint.breaker().reset();
        *health = EndpointHealth::Healthy;
        tracing::info!(endpoint = %id, "Endpoint reset");
        metrics::record_circuit_state(id, CircuitState::Closed);
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<EndpointSnapshot> {
        self.endpoints
            .iter()
            .map(|e| {
                let credits = e.credits();
                EndpointSnapshot {
                    id: e.id.clone(),
                    base_url: e.base_url.to_string(),
                    health: e.health(),
                    circuit_state: e.breaker().state(),
                    failure_count: e.breaker().failure_count(),
                    active_requests: e.active_requests(),
                    max_concurrent: e.max_concurrent,
                    credits: credits.is_finite().then_some(credits),
                }
            })
            .collect()
    }

    /// Sum of in-flight requests across the pool.
    pub fn total_active_requests(&self) -> usize {
        self.endpoints.iter().map(|e| e.active_requests()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::endpoint::test_support::endpoint;
    use crate::load_balancer::{LeastActive, LowestCredit};
    use tokio::time::advance;

    fn pool_of(endpoints: Vec<Arc<Endpoint>>) -> EndpointPool {
        EndpointPool::new(
            endpoints,
            Box::new(LowestCredit::new()),
            EventBus::default(),
            Duration::from_secs(10),
        )
    }

    fn status(code: u16) -> SynthesisError {
        SynthesisError::Status {
            endpoint: "x".into(),
            status: code,
            message: String::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_credit_ties_split_round_robin() {
        let pool = pool_of(vec![endpoint("a", 10), endpoint("b", 10), endpoint("c", 10)]);
        pool.endpoints()[0].set_credits(5.0);
        pool.endpoints()[1].set_credits(3.0);
        pool.endpoints()[2].set_credits(3.0);

        let first = pool.select().unwrap();
        let second = pool.select().unwrap();
        let mut ids = vec![first.id.clone(), second.id.clone()];
        ids.sort();
        assert_eq!(ids, ["b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_endpoint_excluded_until_backoff() {
        let pool = pool_of(vec![endpoint("a", 10), endpoint("b", 10)]);
        let a = pool.endpoints()[0].clone();

        let class = pool.report_failure(&a, &status(429));
        assert_eq!(class, FailureClass::Temporary);
        assert_eq!(a.health(), EndpointHealth::TemporaryFailure);

        for _ in 0..4 {
            assert_eq!(pool.select().unwrap().id, "b");
        }

        // Backoff (1s) and the recovery sweep interval (10s) both elapse.
        advance(Duration::from_secs(11)).await;
        let picks: Vec<_> = (0..2).map(|_| pool.select().unwrap().id.clone()).collect();
        assert_eq!(a.health(), EndpointHealth::Healthy);
        assert!(picks.iter().any(|id| id == "a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_success_does_not_readmit_rate_limited_endpoint() {
        let pool = pool_of(vec![endpoint("a", 10), endpoint("b", 10)]);
        pool.endpoints()[0].set_credits(1.0);
        pool.endpoints()[1].set_credits(5.0);

        let in_flight = pool.select().unwrap();
        assert_eq!(in_flight.id, "a");
        pool.report_failure(&in_flight, &status(429));
        assert_eq!(in_flight.breaker().state(), CircuitState::Open);

        // The request that was already running on `a` completes fine.
        pool.report_success(&in_flight);
        drop(in_flight);
        let a = pool.endpoints()[0].clone();
        assert_eq!(a.health(), EndpointHealth::Healthy);
        assert_eq!(a.breaker().state(), CircuitState::Open);
        assert_eq!(a.breaker().failure_count(), 1);
        assert!(!a.can_accept_request());
        assert_eq!(pool.select().unwrap().id, "b");

        // delay(1) == 1s
        advance(Duration::from_millis(1_100)).await;
        assert_eq!(pool.select().unwrap().id, "a");
        assert_eq!(a.breaker().state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_payment_required_is_permanent() {
        let pool = pool_of(vec![endpoint("a", 10), endpoint("b", 10)]);
        let a = pool.endpoints()[0].clone();

        assert_eq!(pool.report_failure(&a, &status(402)), FailureClass::Permanent);
        assert_eq!(a.health(), EndpointHealth::PermanentFailure);

        for _ in 0..3 {
            advance(Duration::from_secs(3600)).await;
            assert_eq!(pool.select().unwrap().id, "b");
        }

        pool.reset("a").unwrap();
        assert_eq!(a.health(), EndpointHealth::Healthy);
        assert_eq!(a.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_keeps_endpoint_selectable() {
        let pool = pool_of(vec![endpoint("a", 10)]);
        let mut events = pool.events().subscribe();
        let a = pool.endpoints()[0].clone();

        assert_eq!(pool.report_failure(&a, &status(400)), FailureClass::ClientError);
        assert_eq!(a.health(), EndpointHealth::Healthy);
        assert_eq!(pool.select().unwrap().id, "a");

        let event = events.try_recv().unwrap();
        assert!(matches!(event, EndpointEvent::Failure { class: FailureClass::ClientError, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_to_temporary_failure() {
        let pool = pool_of(vec![endpoint("a", 10), endpoint("b", 10)]);
        pool.report_failure(&pool.endpoints()[0].clone(), &status(402));
        pool.report_failure(&pool.endpoints()[1].clone(), &status(503));

        let guard = pool.select().unwrap();
        assert_eq!(guard.id, "b");
        assert_eq!(pool.total_active_requests(), 1);
        drop(guard);
        assert_eq!(pool.total_active_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_permanent_is_hard_failure() {
        let pool = pool_of(vec![endpoint("a", 10), endpoint("b", 10)]);
        for ep in pool.endpoints().to_vec() {
            pool.report_failure(&ep, &status(401));
        }
        assert_eq!(pool.select().unwrap_err(), PoolError::AllPermanentlyFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_picks_inadmissible_while_one_is_eligible() {
        let pool = EndpointPool::new(
            vec![endpoint("a", 1), endpoint("b", 1), endpoint("c", 1)],
            Box::new(LeastActive::new()),
            EventBus::default(),
            Duration::from_secs(10),
        );
        let g1 = pool.select().unwrap();
        let g2 = pool.select().unwrap();
        let g3 = pool.select().unwrap();
        let mut ids = vec![g1.id.clone(), g2.id.clone(), g3.id.clone()];
        ids.sort();
        assert_eq!(ids, ["a", "b", "c"]);

        assert_eq!(pool.select().unwrap_err(), PoolError::Unavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_unknown_endpoint() {
        let pool = pool_of(vec![endpoint("a", 1)]);
        assert_eq!(
            pool.reset("zzz").unwrap_err(),
            PoolError::UnknownEndpoint("zzz".into())
        );
    }
}
