//! Request bodies and request-id extraction.

use axum::extract::multipart::{Multipart, MultipartError};
use axum::http::{HeaderMap, StatusCode};
use serde::Deserialize;

use crate::dialogue::{AudioUpload, ConversationSession, TranscriptionError};
use crate::synthesis::AudioFormat;

pub const X_REQUEST_ID: &str = "x-request-id";

#[derive(Debug, Clone, Deserialize)]
pub struct DialogueRequest {
    pub session_id: String,
    pub user_id: String,
    #[serde(default)]
    pub persona_id: Option<String>,
    pub text: String,
}

impl DialogueRequest {
    pub fn session(&self) -> ConversationSession {
        let session = ConversationSession::new(&self.session_id, &self.user_id);
        match &self.persona_id {
            Some(persona) => session.with_persona(persona),
            None => session,
        }
    }
}

/// Multipart fields of a spoken query: `file` (or `audio`), `session_id`,
/// `user_id`, and optionally `persona_id` and `language`.
#[derive(Debug, Default)]
pub struct SpeechForm {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub persona_id: Option<String>,
    pub language: Option<String>,
    pub upload: Option<(String, String, bytes::Bytes)>,
}

impl SpeechForm {
    pub async fn read(mut multipart: Multipart, max_size: usize) -> Result<Self, TranscriptionError> {
        let invalid = |e: MultipartError| {
            if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                TranscriptionError::TooLarge { max: max_size }
            } else {
                TranscriptionError::InvalidUpload(e.body_text())
            }
        };

        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await.map_err(invalid)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" | "audio" => {
                    let file_name = field.file_name().unwrap_or("audio").to_string();
                    let content_type = field
                        .content_type()
                        .unwrap_or("application/octet-stream")
                        .to_string();
                    let audio = field.bytes().await.map_err(invalid)?;
                    form.upload = Some((file_name, content_type, audio));
                }
                "session_id" | "user_id" | "persona_id" | "language" => {
                    let text = field.text().await.map_err(invalid)?;
                    let value = Some(text.trim().to_string()).filter(|v| !v.is_empty());
                    match name.as_str() {
                        "session_id" => form.session_id = value,
                        "user_id" => form.user_id = value,
                        "persona_id" => form.persona_id = value,
                        _ => form.language = value,
                    }
                }
                _ => {}
            }
        }
        Ok(form)
    }

    /// Split into the session and the recording; both ids and the file are required.
    pub fn into_parts(self) -> Result<(ConversationSession, AudioUpload), TranscriptionError> {
        let missing = |field: &str| TranscriptionError::InvalidUpload(format!("missing field '{field}'"));
        let session_id = self.session_id.ok_or_else(|| missing("session_id"))?;
        let user_id = self.user_id.ok_or_else(|| missing("user_id"))?;
        let (file_name, content_type, audio) = self.upload.ok_or_else(|| missing("file"))?;

        let session = ConversationSession::new(session_id, user_id);
        let session = match self.persona_id {
            Some(persona) => session.with_persona(persona),
            None => session,
        };
        Ok((
            session,
            AudioUpload {
                file_name,
                content_type,
                audio,
                language: self.language,
            },
        ))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AudioQuery {
    pub format: Option<AudioFormat>,
}

/// The id set by the request-id layer, or "unknown" when absent.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}
