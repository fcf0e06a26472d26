//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the dialogue
//! service. All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::synthesis::voice::AudioFormat;

/// Root configuration for the dialogue service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DialogueConfig {
    /// HTTP listener settings.
    pub server: ServerConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Speech-synthesis endpoints, voice and resilience settings.
    pub synthesis: SynthesisConfig,

    /// Background credit polling.
    pub credit_monitor: CreditMonitorConfig,

    /// Language-model backend.
    pub llm: LlmConfig,

    /// Speech-to-text backend for uploaded audio.
    pub stt: SttConfig,

    /// Per-request pipeline tuning.
    pub pipeline: PipelineConfig,

    /// Memory extraction trigger.
    pub memory: MemoryConfig,

    /// System prompt material.
    pub prompt: PromptConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Whole-request timeout in seconds. Streams longer than this are cut.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 120,
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount the admin routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

/// Speech-synthesis configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Replicas of the synthesis service.
    pub endpoints: Vec<EndpointConfig>,

    /// Voice identifier used in the synthesis path.
    pub voice_id: String,

    /// Language code sent with every request.
    pub language: String,

    /// Voice style sent with every request.
    pub style: String,

    /// Format used when the caller does not ask for one.
    pub default_format: AudioFormat,

    /// Header carrying the endpoint API key.
    pub api_key_header: String,

    /// Per-call timeout in milliseconds (headers and every body chunk).
    pub request_timeout_ms: u64,

    /// Timeout for each warm-up probe in milliseconds.
    pub warmup_timeout_ms: u64,

    /// Prosody settings.
    pub voice_settings: VoiceSettingsConfig,

    /// Circuit breaker backoff.
    pub backoff: BackoffConfig,

    /// Endpoint selection.
    pub balancer: BalancerConfig,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            voice_id: "default".to_string(),
            language: "en".to_string(),
            style: "neutral".to_string(),
            default_format: AudioFormat::Mp3,
            api_key_header: "x-sup-api-key".to_string(),
            request_timeout_ms: 30_000,
            warmup_timeout_ms: 2_000,
            voice_settings: VoiceSettingsConfig::default(),
            backoff: BackoffConfig::default(),
            balancer: BalancerConfig::default(),
        }
    }
}

/// One synthesis replica.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    /// Unique endpoint identifier.
    pub id: String,

    /// Base URL (e.g., "https://tts-1.internal").
    pub base_url: String,

    /// API key for this replica.
    pub api_key: String,

    /// Maximum concurrent in-flight requests.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_max_concurrent() -> usize {
    10
}

/// Prosody knobs forwarded verbatim to the backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VoiceSettingsConfig {
    pub pitch_shift: f32,
    pub pitch_variance: f32,
    pub speed: f32,
}

impl Default for VoiceSettingsConfig {
    fn default() -> Self {
        Self {
            pitch_shift: 0.0,
            pitch_variance: 1.0,
            speed: 1.0,
        }
    }
}

/// Exponential backoff for the per-endpoint circuit breaker.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay after the first failure in milliseconds.
    pub base_delay_ms: u64,

    /// Upper bound on the delay in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 5_000,
            max_delay_ms: 300_000,
        }
    }
}

/// Endpoint selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Prefer the endpoint with the lowest remaining credit balance.
    #[default]
    LowestCredit,
    /// Prefer the endpoint with the fewest in-flight requests.
    LeastActive,
}

/// Load balancer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BalancerConfig {
    pub policy: SelectionPolicy,

    /// Minimum seconds between sweeps that bring temporarily failed
    /// endpoints back once their backoff has elapsed.
    pub recovery_check_interval_secs: u64,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            policy: SelectionPolicy::LowestCredit,
            recovery_check_interval_secs: 10,
        }
    }
}

/// Credit monitor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CreditMonitorConfig {
    pub enabled: bool,

    /// Seconds between polls.
    pub poll_interval_secs: u64,

    /// Per-poll timeout in seconds.
    pub timeout_secs: u64,

    /// Endpoints reporting fewer credits are taken out of rotation.
    pub low_credit_threshold: f64,
}

impl Default for CreditMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_interval_secs: 45,
            timeout_secs: 5,
            low_credit_threshold: 100.0,
        }
    }
}

/// Language-model backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL.
    pub base_url: String,

    pub api_key: String,

    pub model: String,

    /// Timeout for the initial response in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            connect_timeout_secs: 15,
        }
    }
}

/// Speech-to-text configuration. Empty `base_url` and `api_key` fall back
/// to the language-model backend's.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SttConfig {
    pub base_url: String,

    pub api_key: String,

    pub model: String,

    /// Used when an upload names no language. Empty lets the backend detect it.
    pub language: String,

    /// Largest accepted upload.
    pub max_file_size_bytes: usize,

    /// Whole transcription call timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            model: "whisper-1".to_string(),
            language: String::new(),
            max_file_size_bytes: 25 * 1024 * 1024,
            timeout_secs: 60,
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacity of every inter-stage channel.
    pub channel_capacity: usize,

    /// Recent turns loaded as conversation history.
    pub history_limit: usize,

    /// Documents requested from retrieval.
    pub context_top_k: usize,

    /// Memories requested from retrieval.
    pub memory_top_k: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 32,
            history_limit: 10,
            context_top_k: 3,
            memory_top_k: 5,
        }
    }
}

/// Memory extraction configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Extract memories every N persisted turns of a session.
    pub extraction_threshold: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            extraction_threshold: 5,
        }
    }
}

/// System prompt configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct PromptConfig {
    /// Persona prompt placed first in the system message.
    pub system_prompt: String,

    /// Instructions shared by every persona.
    pub common_prompt: String,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
