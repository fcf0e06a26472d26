//! Collaborators the pipeline consumes through narrow interfaces.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::dialogue::error::{LanguageModelError, RetrievalError, StoreError, TranscriptionError};
use crate::dialogue::model::{
    AudioUpload, CompletionRequest, ConversationSession, ConversationTurn, MemoryRetrievalResult,
    RetrievalContext, SessionId,
};

/// Lazily generated tokens. Not restartable.
pub type TokenStream = BoxStream<'static, Result<String, LanguageModelError>>;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<TokenStream, LanguageModelError>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn save(&self, turn: ConversationTurn) -> Result<ConversationTurn, StoreError>;

    /// Up to `limit` most recent turns of the session, oldest first.
    async fn find_recent(
        &self,
        session_id: &SessionId,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError>;
}

#[async_trait]
pub trait RetrievalService: Send + Sync {
    async fn retrieve(
        &self,
        session_id: &SessionId,
        query: &str,
        top_k: usize,
    ) -> Result<RetrievalContext, RetrievalError>;

    async fn retrieve_memories(
        &self,
        session: &ConversationSession,
        query: &str,
        top_k: usize,
    ) -> Result<MemoryRetrievalResult, RetrievalError>;
}

#[async_trait]
pub trait ConversationCounter: Send + Sync {
    /// Increment and return the new count.
    async fn increment(&self, session_id: &SessionId) -> Result<u64, StoreError>;

    async fn get(&self, session_id: &SessionId) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait MemoryExtractor: Send + Sync {
    async fn extract(&self, session: &ConversationSession) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, upload: &AudioUpload) -> Result<String, TranscriptionError>;
}
