//! Synthesis error types.

use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

use crate::load_balancer::PoolError;
use crate::resilience::FailureClass;

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("endpoint {endpoint} returned {status}: {message}")]
    Status {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("transport error on endpoint {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("endpoint {endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("endpoint {endpoint} has a base url that cannot carry a path")]
    InvalidUrl { endpoint: String },

    #[error(transparent)]
    Pool(#[from] PoolError),
}

pub type SynthesisResult<T> = Result<T, SynthesisError>;

impl SynthesisError {
    pub fn classify(&self) -> FailureClass {
        match self {
            SynthesisError::Status { status, .. } => FailureClass::from_status(*status),
            SynthesisError::Transport { .. } | SynthesisError::Timeout { .. } => {
                FailureClass::Temporary
            }
            SynthesisError::InvalidUrl { .. } => FailureClass::Permanent,
            SynthesisError::Pool(PoolError::AllPermanentlyFailed) => FailureClass::Permanent,
            SynthesisError::Pool(_) => FailureClass::Temporary,
        }
    }

    /// Short reason used in logs and failure events.
    pub fn description(&self) -> String {
        match self {
            SynthesisError::Status { status, message, .. } => {
                let reason = StatusCode::from_u16(*status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("Unknown Status");
                if message.is_empty() {
                    format!("[{status}] {reason}")
                } else {
                    format!("[{status}] {reason}: {message}")
                }
            }
            other => other.to_string(),
        }
    }
}
