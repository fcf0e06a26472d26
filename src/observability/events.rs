//! Endpoint events for external observability.
//!
//! The pool and the credit monitor publish; anyone interested subscribes.
//! Publishing with nobody listening is fine.

use serde::Serialize;
use std::time::SystemTime;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::observability::metrics;
use crate::resilience::FailureClass;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EndpointEvent {
    Failure {
        endpoint_id: String,
        class: FailureClass,
        message: String,
        occurred_at: SystemTime,
    },
    LowCredit {
        endpoint_id: String,
        remaining_credits: f64,
        threshold: f64,
        occurred_at: SystemTime,
    },
}

impl EndpointEvent {
    pub fn endpoint_id(&self) -> &str {
        match self {
            EndpointEvent::Failure { endpoint_id, .. }
            | EndpointEvent::LowCredit { endpoint_id, .. } => endpoint_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EndpointEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EndpointEvent> {
        self.tx.subscribe()
    }

    /// Returns the number of subscribers that saw the event.
    pub fn publish(&self, event: EndpointEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Log every endpoint event until shutdown.
pub async fn run_event_logger(
    mut events: broadcast::Receiver<EndpointEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(EndpointEvent::Failure { endpoint_id, class, message, .. }) => {
                    tracing::info!(endpoint = %endpoint_id, class = %class, message = %message, "Endpoint failure event");
                }
                Ok(EndpointEvent::LowCredit { endpoint_id, remaining_credits, threshold, .. }) => {
                    metrics::record_endpoint_credits(&endpoint_id, remaining_credits);
                    tracing::warn!(endpoint = %endpoint_id, remaining_credits, threshold, "Endpoint low on credits");
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event logger lagged behind");
                }
                Err(RecvError::Closed) => break,
            },
            _ = shutdown.recv() => {
                tracing::info!("Event logger received shutdown signal, exiting loop");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        let delivered = bus.publish(EndpointEvent::LowCredit {
            endpoint_id: "a".into(),
            remaining_credits: 1.0,
            threshold: 10.0,
            occurred_at: SystemTime::now(),
        });
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(EndpointEvent::Failure {
            endpoint_id: "a".into(),
            class: FailureClass::Temporary,
            message: "[503] unavailable".into(),
            occurred_at: SystemTime::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.endpoint_id(), "a");
        assert!(matches!(event, EndpointEvent::Failure { class: FailureClass::Temporary, .. }));
    }
}
