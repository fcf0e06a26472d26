//! Streaming synthesis over the endpoint pool.
//!
//! # Responsibilities
//! - Issue one synthesis call per sentence against a pooled endpoint
//! - Fail over to another endpoint while no audio has been produced
//! - Report every outcome back to the pool
//! - Warm up connections to every endpoint

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::join_all;
use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use url::Url;

use crate::config::SynthesisConfig;
use crate::load_balancer::{Endpoint, EndpointGuard, EndpointPool};
use crate::observability::metrics;
use crate::synthesis::error::{SynthesisError, SynthesisResult};
use crate::synthesis::voice::{AudioFormat, SynthesisRequest, VoiceSettings};

/// Raw audio bytes of one sentence, in order.
pub type AudioChunks = BoxStream<'static, SynthesisResult<Bytes>>;

/// Error bodies are cut to this many characters before logging.
const MAX_ERROR_BODY_CHARS: usize = 200;

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Best-effort connection warm-up. Never fails.
    async fn prepare(&self);

    /// Start synthesizing `text`. Resolves once the first audio byte is in
    /// hand (or the call failed for good); the rest arrives on the stream.
    async fn synthesize(&self, text: &str, format: AudioFormat) -> SynthesisResult<AudioChunks>;
}

#[derive(Debug, Clone)]
struct VoiceProfile {
    voice_id: String,
    language: String,
    style: String,
    settings: VoiceSettings,
}

/// HTTP synthesis client bound to an endpoint pool.
#[derive(Debug, Clone)]
pub struct SynthesisClient {
    pool: Arc<EndpointPool>,
    http: reqwest::Client,
    voice: VoiceProfile,
    api_key_header: String,
    request_timeout: Duration,
    warmup_timeout: Duration,
}

impl SynthesisClient {
    pub fn new(pool: Arc<EndpointPool>, config: &SynthesisConfig) -> Self {
        Self {
            pool,
            http: reqwest::Client::new(),
            voice: VoiceProfile {
                voice_id: config.voice_id.clone(),
                language: config.language.clone(),
                style: config.style.clone(),
                settings: VoiceSettings::from(&config.voice_settings),
            },
            api_key_header: config.api_key_header.clone(),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            warmup_timeout: Duration::from_millis(config.warmup_timeout_ms),
        }
    }

    pub fn pool(&self) -> &Arc<EndpointPool> {
        &self.pool
    }

    fn stream_url(&self, endpoint: &Endpoint) -> SynthesisResult<Url> {
        endpoint
            .api_url(["v1", "text-to-speech", self.voice.voice_id.as_str(), "stream"])
            .ok_or_else(|| SynthesisError::InvalidUrl {
                endpoint: endpoint.id.clone(),
            })
    }

    /// One attempt on one endpoint, up to and including the first chunk.
    async fn attempt(
        &self,
        guard: &EndpointGuard,
        text: &str,
        format: AudioFormat,
    ) -> SynthesisResult<(reqwest::Response, Option<Bytes>)> {
        let url = self.stream_url(guard)?;
        let body = SynthesisRequest {
            text,
            language: &self.voice.language,
            style: &self.voice.style,
            output_format: format,
            voice_settings: self.voice.settings,
            include_phonemes: false,
        };

        let request = self
            .http
            .post(url)
            .header(self.api_key_header.as_str(), guard.api_key())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, format.media_type())
            .json(&body)
            .send();

        let mut response = match time::timeout(self.request_timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(source)) => {
                return Err(SynthesisError::Transport {
                    endpoint: guard.id.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(SynthesisError::Timeout {
                    endpoint: guard.id.clone(),
                    timeout: self.request_timeout,
                })
            }
        };

        let status = response.status();
        if !status.is_success() {
            let message = match time::timeout(self.request_timeout, response.text()).await {
                Ok(Ok(text)) => text.chars().take(MAX_ERROR_BODY_CHARS).collect(),
                _ => String::new(),
            };
            return Err(SynthesisError::Status {
                endpoint: guard.id.clone(),
                status: status.as_u16(),
                message,
            });
        }

        let first = next_chunk(&mut response, &guard.id, self.request_timeout).await?;
        Ok((response, first))
    }
}

async fn next_chunk(
    response: &mut reqwest::Response,
    endpoint: &str,
    timeout: Duration,
) -> SynthesisResult<Option<Bytes>> {
    match time::timeout(timeout, response.chunk()).await {
        Ok(Ok(chunk)) => Ok(chunk),
        Ok(Err(source)) => Err(SynthesisError::Transport {
            endpoint: endpoint.to_string(),
            source,
        }),
        Err(_) => Err(SynthesisError::Timeout {
            endpoint: endpoint.to_string(),
            timeout,
        }),
    }
}

/// Everything the body stream needs to keep reading and to report the
/// outcome. Dropping it releases the endpoint slot.
struct BodyState {
    response: reqwest::Response,
    guard: EndpointGuard,
    pool: Arc<EndpointPool>,
    timeout: Duration,
    first: Option<Bytes>,
    finished: bool,
}

fn body_stream(state: BodyState) -> AudioChunks {
    stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }
        if let Some(first) = state.first.take() {
            return Some((Ok(first), state));
        }

        match next_chunk(&mut state.response, &state.guard.id, state.timeout).await {
            Ok(Some(chunk)) => Some((Ok(chunk), state)),
            Ok(None) => {
                state.pool.report_success(&state.guard);
                metrics::record_synthesis_request(&state.guard.id, "success");
                None
            }
            Err(e) => {
                // Audio already reached the caller; this sentence cannot be retried.
                state.pool.report_failure(&state.guard, &e);
                metrics::record_synthesis_request(&state.guard.id, "failure");
                state.finished = true;
                Some((Err(e), state))
            }
        }
    })
    .boxed()
}

#[async_trait]
impl SpeechSynthesizer for SynthesisClient {
    async fn prepare(&self) {
        let probes = self.pool.endpoints().iter().map(|endpoint| {
            let mut url = endpoint.base_url.clone();
            url.set_path("/");
            let request = self.http.head(url).send();
            async move {
                match time::timeout(self.warmup_timeout, request).await {
                    Ok(Ok(response)) => {
                        tracing::debug!(endpoint = %endpoint.id, status = %response.status(), "Warm-up complete");
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(endpoint = %endpoint.id, error = %e, "Warm-up failed");
                    }
                    Err(_) => {
                        tracing::warn!(endpoint = %endpoint.id, "Warm-up timed out");
                    }
                }
            }
        });
        join_all(probes).await;
    }

    async fn synthesize(&self, text: &str, format: AudioFormat) -> SynthesisResult<AudioChunks> {
        let max_attempts = self.pool.len().max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let guard = self.pool.select()?;

            match self.attempt(&guard, text, format).await {
                Ok((response, Some(first))) => {
                    tracing::debug!(endpoint = %guard.id, attempt, chars = text.chars().count(), "Synthesis streaming");
                    return Ok(body_stream(BodyState {
                        response,
                        guard,
                        pool: self.pool.clone(),
                        timeout: self.request_timeout,
                        first: Some(first),
                        finished: false,
                    }));
                }
                Ok((_, None)) => {
                    self.pool.report_success(&guard);
                    metrics::record_synthesis_request(&guard.id, "success");
                    tracing::debug!(endpoint = %guard.id, "Synthesis returned no audio");
                    return Ok(stream::empty().boxed());
                }
                Err(e) => {
                    let class = self.pool.report_failure(&guard, &e);
                    metrics::record_synthesis_request(&guard.id, "failure");
                    drop(guard);

                    if !class.is_retryable() || attempt >= max_attempts {
                        return Err(e);
                    }
                    tracing::info!(attempt, class = %class, error = %e, "Retrying sentence on another endpoint");
                }
            }
        }
    }
}
