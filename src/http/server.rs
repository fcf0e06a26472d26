//! HTTP server setup and dialogue handlers.
//!
//! # Responsibilities
//! - Create the Axum router for dialogue, speech, health and admin routes
//! - Wire up middleware (tracing, timeout, request ID)
//! - Turn a dialogue stream into a streaming response body
//! - Serve until the shutdown broadcast fires

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin::setup_admin_router;
use crate::config::{AdminConfig, DialogueConfig};
use crate::dialogue::{
    AudioUpload, DialogueError, DialogueMode, DialoguePipeline, DialogueStream, RequestContext, SpeechDialogue,
    SpeechReply,
};
use crate::http::request::{request_id, AudioQuery, DialogueRequest, SpeechForm};
use crate::http::response::ApiError;
use crate::lifecycle::Services;
use crate::load_balancer::EndpointPool;
use crate::synthesis::AudioFormat;

/// Room for the multipart framing and text fields around the audio file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<DialoguePipeline>,
    pub speech: Arc<SpeechDialogue>,
    pub pool: Arc<EndpointPool>,
    pub admin: AdminConfig,
    pub default_format: AudioFormat,
}

/// HTTP front of the dialogue service.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &DialogueConfig, services: &Services) -> Self {
        let state = AppState {
            pipeline: services.pipeline.clone(),
            speech: services.speech.clone(),
            pool: services.pool.clone(),
            admin: config.admin.clone(),
            default_format: config.synthesis.default_format,
        };
        let router = build_router(state, Duration::from_secs(config.server.request_timeout_secs));
        Self { router }
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` fires; in-flight requests are drained.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.speech.max_file_size().saturating_add(MULTIPART_OVERHEAD));
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/v1/dialogue/text", post(dialogue_text))
        .route("/v1/dialogue/audio", post(dialogue_audio))
        .route("/v1/dialogue/speech", post(dialogue_speech).layer(upload_limit.clone()))
        .route("/v1/dialogue/speech/text", post(dialogue_speech_text).layer(upload_limit))
        .with_state(state.clone());

    if state.admin.enabled {
        router = router.merge(setup_admin_router(state));
    }

    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(request_timeout))
            .layer(PropagateRequestIdLayer::x_request_id()),
    )
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let available = state.pool.endpoints().iter().any(|e| e.can_accept_request());
    Json(json!({
        "status": if available { "ok" } else { "degraded" },
        "endpoints": state.pool.len(),
    }))
}

async fn dialogue_text(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<DialogueRequest>,
) -> Result<Response, ApiError> {
    let ctx = RequestContext::new(request_id(&headers), body.session(), DialogueMode::Text);
    tracing::debug!(request_id = %ctx.request_id, session = %ctx.session.session_id, "Text dialogue");

    let stream = state.pipeline.stream_text(ctx, body.text);
    streaming_response(stream, "text/plain; charset=utf-8").await
}

async fn dialogue_audio(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AudioQuery>,
    Json(body): Json<DialogueRequest>,
) -> Result<Response, ApiError> {
    let format = query.format.unwrap_or(state.default_format);
    let ctx = RequestContext::new(request_id(&headers), body.session(), DialogueMode::Audio);
    tracing::debug!(
        request_id = %ctx.request_id,
        session = %ctx.session.session_id,
        format = %format,
        "Audio dialogue"
    );

    let stream = state.pipeline.stream_audio(ctx, body.text, format);
    streaming_response(stream, format.media_type()).await
}

async fn speech_parts(
    state: &AppState,
    headers: &HeaderMap,
    multipart: Multipart,
    mode: DialogueMode,
) -> Result<(RequestContext, AudioUpload), ApiError> {
    let form = SpeechForm::read(multipart, state.speech.max_file_size())
        .await
        .map_err(DialogueError::from)?;
    let (session, upload) = form.into_parts().map_err(DialogueError::from)?;
    Ok((RequestContext::new(request_id(headers), session, mode), upload))
}

/// Spoken query in, spoken answer out.
async fn dialogue_speech(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AudioQuery>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let format = query.format.unwrap_or(state.default_format);
    let (ctx, upload) = speech_parts(&state, &headers, multipart, DialogueMode::Audio).await?;
    tracing::debug!(request_id = %ctx.request_id, session = %ctx.session.session_id, format = %format, "Speech dialogue");

    let (transcription, stream) = state.speech.respond_audio(ctx, upload, format).await?;
    tracing::debug!(chars = transcription.chars().count(), "Speech transcribed");
    streaming_response(stream, format.media_type()).await
}

/// Spoken query in, transcript and full text answer out.
async fn dialogue_speech_text(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<SpeechReply>, ApiError> {
    let (ctx, upload) = speech_parts(&state, &headers, multipart, DialogueMode::Text).await?;
    Ok(Json(state.speech.respond_text(ctx, upload).await?))
}

/// Wait for the first item so failures before any output get a proper
/// status; later failures abort the body.
async fn streaming_response<T>(
    mut stream: DialogueStream<T>,
    content_type: &'static str,
) -> Result<Response, ApiError>
where
    T: Into<Bytes> + Send + 'static,
{
    let first = match stream.next().await {
        Some(Ok(first)) => first,
        Some(Err(e)) => return Err(ApiError(e)),
        None => return Ok(StatusCode::NO_CONTENT.into_response()),
    };

    let body = stream::once(async move { Ok(first) }).chain(stream);
    Ok(([(header::CONTENT_TYPE, content_type)], Body::from_stream(body)).into_response())
}
