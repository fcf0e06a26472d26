//! OpenAI-compatible audio transcription (`/v1/audio/transcriptions`).

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use tokio::time;

use crate::config::{LlmConfig, SttConfig};
use crate::dialogue::error::TranscriptionError;
use crate::dialogue::model::AudioUpload;
use crate::dialogue::ports::SpeechToText;

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Debug, Clone)]
pub struct WhisperClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl WhisperClient {
    /// Blank `base_url` and `api_key` are taken from the language-model backend.
    pub fn new(config: &SttConfig, llm: &LlmConfig) -> Self {
        let base_url = if config.base_url.trim().is_empty() {
            &llm.base_url
        } else {
            &config.base_url
        };
        let api_key = if config.api_key.trim().is_empty() {
            &llm.api_key
        } else {
            &config.api_key
        };
        Self {
            http: reqwest::Client::new(),
            endpoint: transcription_endpoint(base_url),
            api_key: api_key.clone(),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn form(&self, upload: &AudioUpload) -> Result<Form, TranscriptionError> {
        let file = Part::bytes(upload.audio.to_vec())
            .file_name(upload.file_name.clone())
            .mime_str(&upload.content_type)
            .map_err(|e| TranscriptionError::UnsupportedMedia(format!("{}: {e}", upload.content_type)))?;

        let mut form = Form::new()
            .text("model", self.model.clone())
            .text("response_format", "json");
        if let Some(language) = &upload.language {
            form = form.text("language", language.clone());
        }
        Ok(form.part("file", file))
    }
}

/// `https://host` and `https://host/v1/` both become `https://host/v1/audio/transcriptions`.
fn transcription_endpoint(base_url: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    let base = base.strip_suffix("/v1").unwrap_or(base);
    format!("{base}/v1/audio/transcriptions")
}

#[async_trait]
impl SpeechToText for WhisperClient {
    async fn transcribe(&self, upload: &AudioUpload) -> Result<String, TranscriptionError> {
        let send = self
            .http
            .post(&self.endpoint)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .multipart(self.form(upload)?)
            .send();

        let call = async {
            let response = send
                .await
                .map_err(|e| TranscriptionError::Request(e.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                tracing::warn!(status = status.as_u16(), model = %self.model, "Transcription rejected");
                return Err(TranscriptionError::Status {
                    status: status.as_u16(),
                    message,
                });
            }
            response
                .json::<TranscriptionResponse>()
                .await
                .map_err(|e| TranscriptionError::Malformed(e.to_string()))
        };

        let body = time::timeout(self.timeout, call)
            .await
            .map_err(|_| TranscriptionError::Timeout)??;
        tracing::info!(chars = body.text.chars().count(), model = %self.model, "Transcription finished");
        Ok(body.text)
    }
}
