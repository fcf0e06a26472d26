//! Streaming voice dialogue: language-model tokens in, ordered speech out,
//! over a pool of credit-aware, circuit-broken synthesis endpoints.

pub mod adapters;
pub mod admin;
pub mod config;
pub mod dialogue;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod resilience;
pub mod synthesis;

pub use config::DialogueConfig;
pub use dialogue::DialoguePipeline;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use load_balancer::EndpointPool;
