//! Spoken queries: check the upload, transcribe it, answer through the
//! regular pipeline.

use bytes::Bytes;
use futures_util::StreamExt;
use serde::Serialize;
use std::sync::Arc;

use crate::config::SttConfig;
use crate::dialogue::context::RequestContext;
use crate::dialogue::error::{DialogueError, TranscriptionError};
use crate::dialogue::model::AudioUpload;
use crate::dialogue::pipeline::{DialoguePipeline, DialogueStream};
use crate::dialogue::ports::SpeechToText;
use crate::observability::stage::{traced, Stage};
use crate::synthesis::AudioFormat;

/// Transcript of a spoken query with the full text answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpeechReply {
    pub transcription: String,
    pub response: String,
}

#[derive(Clone)]
pub struct SpeechDialogue {
    stt: Arc<dyn SpeechToText>,
    pipeline: Arc<DialoguePipeline>,
    max_file_size: usize,
    default_language: Option<String>,
}

impl SpeechDialogue {
    pub fn new(stt: Arc<dyn SpeechToText>, pipeline: Arc<DialoguePipeline>, config: &SttConfig) -> Self {
        let language = config.language.trim();
        Self {
            stt,
            pipeline,
            max_file_size: config.max_file_size_bytes,
            default_language: (!language.is_empty()).then(|| language.to_string()),
        }
    }

    pub fn max_file_size(&self) -> usize {
        self.max_file_size
    }

    /// Reject non-audio, empty and oversized uploads; fill in the language.
    pub fn validate(&self, mut upload: AudioUpload) -> Result<AudioUpload, TranscriptionError> {
        let top_level = upload.content_type.split('/').next().unwrap_or_default().trim();
        if !top_level.eq_ignore_ascii_case("audio") {
            return Err(TranscriptionError::UnsupportedMedia(upload.content_type));
        }
        if upload.audio.is_empty() {
            return Err(TranscriptionError::InvalidUpload("empty audio file".to_string()));
        }
        if upload.audio.len() > self.max_file_size {
            return Err(TranscriptionError::TooLarge {
                max: self.max_file_size,
            });
        }

        upload.language = upload
            .language
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .or_else(|| self.default_language.clone());
        Ok(upload)
    }

    pub async fn transcribe(
        &self,
        ctx: &RequestContext,
        upload: AudioUpload,
    ) -> Result<String, DialogueError> {
        let upload = self.validate(upload)?;
        tracing::debug!(
            request_id = %ctx.request_id,
            file = %upload.file_name,
            bytes = upload.audio.len(),
            "Transcribing upload"
        );
        let text = traced(ctx, Stage::Transcribe, self.stt.transcribe(&upload)).await?;
        Ok(text.trim().to_string())
    }

    /// Transcribe, then stream the spoken answer.
    pub async fn respond_audio(
        &self,
        ctx: RequestContext,
        upload: AudioUpload,
        format: AudioFormat,
    ) -> Result<(String, DialogueStream<Bytes>), DialogueError> {
        let transcription = self.transcribe(&ctx, upload).await?;
        let stream = self.pipeline.stream_audio(ctx, transcription.clone(), format);
        Ok((transcription, stream))
    }

    /// Transcribe, then collect the whole text answer. Persistence has
    /// finished by the time this returns.
    pub async fn respond_text(
        &self,
        ctx: RequestContext,
        upload: AudioUpload,
    ) -> Result<SpeechReply, DialogueError> {
        let transcription = self.transcribe(&ctx, upload).await?;
        let mut stream = self.pipeline.stream_text(ctx, transcription.clone());
        let mut response = String::new();
        while let Some(token) = stream.next().await {
            response.push_str(&token?);
        }
        Ok(SpeechReply {
            transcription,
            response,
        })
    }
}
