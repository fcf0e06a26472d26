//! Error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::dialogue::{DialogueError, TranscriptionError};
use crate::synthesis::SynthesisError;

/// A dialogue that failed before its first chunk.
#[derive(Debug)]
pub struct ApiError(pub DialogueError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            DialogueError::EmptyQuery => StatusCode::BAD_REQUEST,
            DialogueError::Synthesis(SynthesisError::Pool(_)) => StatusCode::SERVICE_UNAVAILABLE,
            DialogueError::Synthesis(_) | DialogueError::Generation(_) => StatusCode::BAD_GATEWAY,
            DialogueError::Store(_) | DialogueError::Retrieval(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            DialogueError::Transcription(e) => match e {
                TranscriptionError::InvalidUpload(_) | TranscriptionError::UnsupportedMedia(_) => {
                    StatusCode::BAD_REQUEST
                }
                TranscriptionError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                TranscriptionError::Timeout => StatusCode::GATEWAY_TIMEOUT,
                TranscriptionError::Request(_)
                | TranscriptionError::Status { .. }
                | TranscriptionError::Malformed(_) => StatusCode::BAD_GATEWAY,
            },
        }
    }
}

impl From<DialogueError> for ApiError {
    fn from(e: DialogueError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
