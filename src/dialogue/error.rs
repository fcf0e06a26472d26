//! Dialogue error types.

use thiserror::Error;

use crate::synthesis::SynthesisError;

#[derive(Debug, Error)]
pub enum LanguageModelError {
    #[error("language model request failed: {0}")]
    Request(String),

    #[error("language model returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed language model stream: {0}")]
    Stream(String),

    #[error("language model timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("retrieval failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    #[error("only audio uploads are accepted, got '{0}'")]
    UnsupportedMedia(String),

    #[error("audio upload exceeds {max} bytes")]
    TooLarge { max: usize },

    #[error("transcription request failed: {0}")]
    Request(String),

    #[error("transcription backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed transcription response: {0}")]
    Malformed(String),

    #[error("transcription timed out")]
    Timeout,
}

/// Terminal error of one dialogue stream.
#[derive(Debug, Error)]
pub enum DialogueError {
    #[error("query must not be blank")]
    EmptyQuery,

    #[error("conversation store: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error("generation failed: {0}")]
    Generation(#[from] LanguageModelError),

    #[error("synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("transcription failed: {0}")]
    Transcription(#[from] TranscriptionError),
}

pub type DialogueResult<T> = Result<T, DialogueError>;
