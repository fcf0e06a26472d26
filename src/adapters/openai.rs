//! OpenAI-compatible streaming chat completions.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time;

use crate::config::LlmConfig;
use crate::dialogue::error::LanguageModelError;
use crate::dialogue::model::{CompletionRequest, Message};
use crate::dialogue::ports::{LanguageModel, TokenStream};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
}

/// One line of a server-sent-events body.
#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Token(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseLine, LanguageModelError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    if data.is_empty() {
        return Ok(SseLine::Skip);
    }

    let chunk: ChatChunk =
        serde_json::from_str(data).map_err(|e| LanguageModelError::Stream(e.to_string()))?;
    let content: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .collect();
    if content.is_empty() {
        Ok(SseLine::Skip)
    } else {
        Ok(SseLine::Token(content))
    }
}

struct SseState {
    response: reqwest::Response,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
    done: bool,
}

impl SseState {
    /// Move every complete line out of the buffer. Returns true on `[DONE]`.
    fn drain_lines(&mut self) -> Result<bool, LanguageModelError> {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            match parse_sse_line(line.trim_end())? {
                SseLine::Token(token) => self.pending.push_back(token),
                SseLine::Done => return Ok(true),
                SseLine::Skip => {}
            }
        }
        Ok(false)
    }
}

fn token_stream(response: reqwest::Response) -> TokenStream {
    let state = SseState {
        response,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(token) = state.pending.pop_front() {
                return Some((Ok(token), state));
            }
            if state.done {
                return None;
            }

            match state.response.chunk().await {
                Ok(Some(bytes)) => {
                    state.buffer.extend_from_slice(&bytes);
                    match state.drain_lines() {
                        Ok(done) => state.done = done,
                        Err(e) => {
                            state.done = true;
                            state.pending.clear();
                            return Some((Err(e), state));
                        }
                    }
                }
                Ok(None) => {
                    // Body ended without [DONE]; flush a trailing line.
                    state.buffer.push(b'\n');
                    state.done = true;
                    if let Err(e) = state.drain_lines() {
                        return Some((Err(e), state));
                    }
                }
                Err(e) => {
                    state.done = true;
                    return Some((Err(LanguageModelError::Stream(e.to_string())), state));
                }
            }
        }
    })
    .boxed()
}

#[derive(Debug, Clone)]
pub struct OpenAiChatClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    connect_timeout: Duration,
}

impl OpenAiChatClient {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: format!("{}/v1/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatClient {
    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<TokenStream, LanguageModelError> {
        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            stream: true,
        };

        let send = self
            .http
            .post(&self.endpoint)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&body)
            .send();
        let response = time::timeout(self.connect_timeout, send)
            .await
            .map_err(|_| LanguageModelError::Timeout)?
            .map_err(|e| LanguageModelError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), model = %self.model, "Language model rejected request");
            return Err(LanguageModelError::Status {
                status: status.as_u16(),
                message,
            });
        }

        tracing::debug!(model = %self.model, messages = request.messages.len(), "Completion stream opened");
        Ok(token_stream(response))
    }
}
