//! Periodic credit polling.
//!
//! # Responsibilities
//! - Periodically ask each endpoint for its remaining credits
//! - Store balances on the endpoints for credit-aware selection
//! - Take endpoints below the threshold out of rotation

use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tokio::time;

use crate::config::CreditMonitorConfig;
use crate::load_balancer::{Endpoint, EndpointHealth, EndpointPool};
use crate::observability::events::EndpointEvent;
use crate::observability::metrics;

#[derive(Debug, Deserialize)]
struct CreditResponse {
    credits: f64,
}

pub struct CreditMonitor {
    pool: Arc<EndpointPool>,
    config: CreditMonitorConfig,
    api_key_header: String,
    client: reqwest::Client,
}

impl CreditMonitor {
    pub fn new(pool: Arc<EndpointPool>, config: CreditMonitorConfig, api_key_header: String) -> Self {
        Self {
            pool,
            config,
            api_key_header,
            client: reqwest::Client::new(),
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Credit monitor disabled");
            return;
        }

        tracing::info!(
            interval = self.config.poll_interval_secs,
            threshold = self.config.low_credit_threshold,
            "Credit monitor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.poll_interval_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Credit monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Poll every endpoint once.
    pub async fn check_all(&self) {
        for endpoint in self.pool.endpoints() {
            let Some(credits) = self.fetch_credits(endpoint).await else {
                continue;
            };
            endpoint.set_credits(credits);
            metrics::record_endpoint_credits(&endpoint.id, credits);
            tracing::debug!(endpoint = %endpoint.id, credits, "Credits polled");

            let threshold = self.config.low_credit_threshold;
            if credits < threshold && endpoint.health() != EndpointHealth::PermanentFailure {
                self.pool
                    .mark_permanently_failed(endpoint, &format!("credits {credits} below {threshold}"));
                self.pool.events().publish(EndpointEvent::LowCredit {
                    endpoint_id: endpoint.id.clone(),
                    remaining_credits: credits,
                    threshold,
                    occurred_at: SystemTime::now(),
                });
            }
        }
    }

    async fn fetch_credits(&self, endpoint: &Endpoint) -> Option<f64> {
        let Some(url) = endpoint.api_url(["v1", "credits"]) else {
            tracing::warn!(endpoint = %endpoint.id, base_url = %endpoint.base_url, "Cannot build credit url");
            return None;
        };

        let request = self
            .client
            .get(url)
            .header(self.api_key_header.as_str(), endpoint.api_key())
            .send();
        let timeout = Duration::from_secs(self.config.timeout_secs);

        let response = match time::timeout(timeout, request).await {
            Ok(Ok(response)) if response.status().is_success() => response,
            Ok(Ok(response)) => {
                tracing::warn!(endpoint = %endpoint.id, status = %response.status(), "Credit check failed: non-success status");
                return None;
            }
            Ok(Err(e)) => {
                tracing::warn!(endpoint = %endpoint.id, error = %e, "Credit check failed: connection error");
                return None;
            }
            Err(_) => {
                tracing::warn!(endpoint = %endpoint.id, "Credit check failed: timeout");
                return None;
            }
        };

        match time::timeout(timeout, response.json::<CreditResponse>()).await {
            Ok(Ok(body)) => Some(body.credits),
            Ok(Err(e)) => {
                tracing::warn!(endpoint = %endpoint.id, error = %e, "Credit check failed: bad body");
                None
            }
            Err(_) => {
                tracing::warn!(endpoint = %endpoint.id, "Credit check failed: timeout reading body");
                None
            }
        }
    }
}
