//! Voice dialogue server.
//!
//! ```text
//!     POST /v1/dialogue/{text,audio}
//!         │
//!         ▼
//!   ┌────────────┐   tokens   ┌───────────┐ sentences ┌─────────────┐   audio
//!   │  LLM (SSE) │──────────▶│ assembler │──────────▶│  synthesis  │──────────▶ caller
//!   └────────────┘            └───────────┘           │   client    │
//!         ▲                                           └──────┬──────┘
//!   inputs (history, retrieval, memories)                    │ select / report
//!                                                     ┌──────▼──────┐
//!                                                     │ endpoint    │◀── credit monitor
//!                                                     │ pool + CB   │
//!                                                     └─────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;

use voice_dialogue::config::load_config;
use voice_dialogue::lifecycle;
use voice_dialogue::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "voice-dialogue")]
#[command(about = "Streaming voice dialogue server", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    init_logging(&config.observability.log_level);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        endpoints = config.synthesis.endpoints.len(),
        bind_address = %config.server.bind_address,
        "voice-dialogue starting"
    );

    lifecycle::run(config).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
