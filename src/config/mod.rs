//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → DialogueConfig (validated, immutable)
//!     → handed by value/Arc to each subsystem at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; endpoints live for the process lifetime
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, BackoffConfig, BalancerConfig, CreditMonitorConfig, DialogueConfig,
    EndpointConfig, LlmConfig, MemoryConfig, ObservabilityConfig, PipelineConfig, PromptConfig,
    SelectionPolicy, ServerConfig, SttConfig, SynthesisConfig, VoiceSettingsConfig,
};
