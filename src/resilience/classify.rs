//! Failure classification for upstream synthesis errors.

use serde::Serialize;
use std::fmt;

/// Who is at fault for a failed call, and whether retrying elsewhere helps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureClass {
    /// Rate limiting, server errors, network trouble. Retry on another endpoint.
    Temporary,
    /// Auth or quota exhaustion. The endpoint stays out until reset.
    Permanent,
    /// The request itself is bad. Nobody is penalized and nothing is retried.
    ClientError,
}

impl FailureClass {
    /// Classify an HTTP status returned by a synthesis endpoint.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 | 408 => FailureClass::Temporary,
            401 | 402 | 403 => FailureClass::Permanent,
            400..=499 => FailureClass::ClientError,
            _ => FailureClass::Temporary,
        }
    }

    pub fn is_retryable(self) -> bool {
        !matches!(self, FailureClass::ClientError)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureClass::Temporary => "temporary",
            FailureClass::Permanent => "permanent",
            FailureClass::ClientError => "client_error",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
