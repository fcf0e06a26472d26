//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check endpoint identity and addressing
//! - Validate value ranges (delays > 0, capacities > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: DialogueConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use thiserror::Error;
use url::Url;

use crate::config::schema::DialogueConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("at least one synthesis endpoint is required")]
    NoEndpoints,

    #[error("duplicate endpoint id '{0}'")]
    DuplicateEndpoint(String),

    #[error("endpoint '{id}' has an invalid base_url '{url}'")]
    InvalidBaseUrl { id: String, url: String },

    #[error("endpoint '{0}' must allow at least one concurrent request")]
    ZeroConcurrency(String),

    #[error("backoff base_delay_ms must be positive")]
    NonPositiveBaseDelay,

    #[error("backoff max_delay_ms ({max}) is below base_delay_ms ({base})")]
    MaxDelayBelowBase { base: u64, max: u64 },

    #[error("pipeline channel_capacity must be positive")]
    ZeroChannelCapacity,

    #[error("memory extraction_threshold must be positive")]
    ZeroExtractionThreshold,

    #[error("{0} must be positive")]
    ZeroInterval(&'static str),

    #[error("stt max_file_size_bytes must be positive")]
    ZeroUploadLimit,
}

/// Validate a parsed configuration.
pub fn validate_config(config: &DialogueConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let synthesis = &config.synthesis;

    if synthesis.endpoints.is_empty() {
        errors.push(ValidationError::NoEndpoints);
    }

    let mut seen = HashSet::new();
    for endpoint in &synthesis.endpoints {
        if !seen.insert(endpoint.id.as_str()) {
            errors.push(ValidationError::DuplicateEndpoint(endpoint.id.clone()));
        }
        if Url::parse(&endpoint.base_url).is_err() {
            errors.push(ValidationError::InvalidBaseUrl {
                id: endpoint.id.clone(),
                url: endpoint.base_url.clone(),
            });
        }
        if endpoint.max_concurrent == 0 {
            errors.push(ValidationError::ZeroConcurrency(endpoint.id.clone()));
        }
    }

    if synthesis.backoff.base_delay_ms == 0 {
        errors.push(ValidationError::NonPositiveBaseDelay);
    } else if synthesis.backoff.max_delay_ms < synthesis.backoff.base_delay_ms {
        errors.push(ValidationError::MaxDelayBelowBase {
            base: synthesis.backoff.base_delay_ms,
            max: synthesis.backoff.max_delay_ms,
        });
    }

    if synthesis.request_timeout_ms == 0 {
        errors.push(ValidationError::ZeroInterval("synthesis.request_timeout_ms"));
    }
    if synthesis.balancer.recovery_check_interval_secs == 0 {
        errors.push(ValidationError::ZeroInterval(
            "synthesis.balancer.recovery_check_interval_secs",
        ));
    }
    if config.credit_monitor.enabled && config.credit_monitor.poll_interval_secs == 0 {
        errors.push(ValidationError::ZeroInterval("credit_monitor.poll_interval_secs"));
    }
    if config.pipeline.channel_capacity == 0 {
        errors.push(ValidationError::ZeroChannelCapacity);
    }
    if config.memory.extraction_threshold == 0 {
        errors.push(ValidationError::ZeroExtractionThreshold);
    }
    if config.stt.max_file_size_bytes == 0 {
        errors.push(ValidationError::ZeroUploadLimit);
    }
    if config.stt.timeout_secs == 0 {
        errors.push(ValidationError::ZeroInterval("stt.timeout_secs"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
