//! Startup orchestration.
//!
//! # Responsibilities
//! - Build every subsystem from validated configuration
//! - Start background tasks (credit monitor, event logger, metrics)
//! - Bind the listener last and serve until a shutdown signal
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::adapters::{
    InMemoryConversationCounter, InMemoryConversationStore, KeywordRetrieval,
    LoggingMemoryExtractor, OpenAiChatClient, WhisperClient,
};
use crate::config::DialogueConfig;
use crate::dialogue::{DialoguePipeline, InputsPreparer, PostProcessor, PromptBuilder, SpeechDialogue};
use crate::health::CreditMonitor;
use crate::http::HttpServer;
use crate::lifecycle::{signals, Shutdown};
use crate::load_balancer::{EndpointPool, PoolError};
use crate::observability::events::{run_event_logger, EventBus};
use crate::observability::metrics;
use crate::synthesis::SynthesisClient;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("endpoint pool: {0}")]
    Pool(#[from] PoolError),

    #[error("invalid address {address}: {source}")]
    Address {
        address: String,
        source: std::net::AddrParseError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The wired-up core, independent of any listener.
pub struct Services {
    pub pool: Arc<EndpointPool>,
    pub pipeline: Arc<DialoguePipeline>,
    pub speech: Arc<SpeechDialogue>,
    pub events: EventBus,
}

pub fn build_services(config: &DialogueConfig) -> Result<Services, StartupError> {
    let events = EventBus::default();
    let pool = Arc::new(EndpointPool::from_config(&config.synthesis, events.clone())?);
    let synthesizer = Arc::new(SynthesisClient::new(pool.clone(), &config.synthesis));

    let store = Arc::new(InMemoryConversationStore::new());
    let retrieval = Arc::new(KeywordRetrieval::new(store.clone()));
    let preparer = InputsPreparer::new(store.clone(), retrieval, &config.pipeline);
    let post = PostProcessor::new(
        store,
        Arc::new(InMemoryConversationCounter::new()),
        Arc::new(LoggingMemoryExtractor::new()),
        &config.memory,
    );

    let pipeline = Arc::new(DialoguePipeline::new(
        preparer,
        PromptBuilder::from_config(&config.prompt),
        Arc::new(OpenAiChatClient::new(&config.llm)),
        synthesizer,
        post,
        &config.pipeline,
    ));

    let speech = Arc::new(SpeechDialogue::new(
        Arc::new(WhisperClient::new(&config.stt, &config.llm)),
        pipeline.clone(),
        &config.stt,
    ));

    Ok(Services {
        pool,
        pipeline,
        speech,
        events,
    })
}

fn parse_addr(address: &str) -> Result<SocketAddr, StartupError> {
    address.parse().map_err(|source| StartupError::Address {
        address: address.to_string(),
        source,
    })
}

/// Run the service until Ctrl+C or SIGTERM.
pub async fn run(config: DialogueConfig) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        metrics::init_metrics(parse_addr(&config.observability.metrics_address)?);
    }

    let services = build_services(&config)?;
    let shutdown = Shutdown::new();

    tokio::spawn(run_event_logger(services.events.subscribe(), shutdown.subscribe()));

    let monitor = CreditMonitor::new(
        services.pool.clone(),
        config.credit_monitor.clone(),
        config.synthesis.api_key_header.clone(),
    );
    tokio::spawn(monitor.run(shutdown.subscribe()));

    let listener = TcpListener::bind(parse_addr(&config.server.bind_address)?).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(&config, &services);
    let mut serving = tokio::spawn(server.run(listener, shutdown.subscribe()));

    tokio::select! {
        result = &mut serving => {
            // Server exited on its own; stop the background tasks too.
            shutdown.trigger();
            return match result {
                Ok(served) => served.map_err(StartupError::from),
                Err(e) => Err(StartupError::Io(std::io::Error::other(e))),
            };
        }
        _ = signals::shutdown_signal() => {}
    }

    let notified = shutdown.trigger();
    tracing::info!(tasks = notified, "Draining in-flight requests");
    match serving.await {
        Ok(served) => served?,
        Err(e) => tracing::error!(error = %e, "HTTP server task failed"),
    }
    Ok(())
}
