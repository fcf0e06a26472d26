//! Per-request input preparation and its once-only cache.

use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::config::PipelineConfig;
use crate::dialogue::error::DialogueError;
use crate::dialogue::model::{
    ConversationContext, ConversationSession, ConversationTurn, MemoryRetrievalResult,
    RetrievalContext,
};
use crate::dialogue::ports::{ConversationStore, RetrievalService};

/// Everything downstream stages read about the current request.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineInputs {
    pub session: ConversationSession,
    pub current_turn: ConversationTurn,
    pub retrieval: RetrievalContext,
    pub memories: MemoryRetrievalResult,
    pub history: ConversationContext,
}

/// Runs the external lookups that make up [`PipelineInputs`].
#[derive(Clone)]
pub struct InputsPreparer {
    store: Arc<dyn ConversationStore>,
    retrieval: Arc<dyn RetrievalService>,
    history_limit: usize,
    context_top_k: usize,
    memory_top_k: usize,
}

impl InputsPreparer {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        retrieval: Arc<dyn RetrievalService>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            retrieval,
            history_limit: config.history_limit,
            context_top_k: config.context_top_k,
            memory_top_k: config.memory_top_k,
        }
    }

    /// Retrieval, memories and history are fetched concurrently; any failure fails the request.
    pub async fn prepare(
        &self,
        session: &ConversationSession,
        query: &str,
    ) -> Result<PipelineInputs, DialogueError> {
        if query.trim().is_empty() {
            return Err(DialogueError::EmptyQuery);
        }

        let (retrieval, memories, history) = tokio::try_join!(
            async {
                self.retrieval
                    .retrieve(&session.session_id, query, self.context_top_k)
                    .await
                    .map_err(DialogueError::from)
            },
            async {
                self.retrieval
                    .retrieve_memories(session, query, self.memory_top_k)
                    .await
                    .map_err(DialogueError::from)
            },
            async {
                self.store
                    .find_recent(&session.session_id, self.history_limit)
                    .await
                    .map_err(DialogueError::from)
            },
        )?;

        Ok(PipelineInputs {
            session: session.clone(),
            current_turn: ConversationTurn::new(session.session_id.clone(), query),
            retrieval,
            memories,
            history: ConversationContext::new(history),
        })
    }
}

/// Computes the inputs at most once per request, however many stages ask.
#[derive(Debug, Default)]
pub struct InputsCache {
    cell: OnceCell<Arc<PipelineInputs>>,
}

impl InputsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_prepare(
        &self,
        preparer: &InputsPreparer,
        session: &ConversationSession,
        query: &str,
    ) -> Result<Arc<PipelineInputs>, DialogueError> {
        self.cell
            .get_or_try_init(|| async { preparer.prepare(session, query).await.map(Arc::new) })
            .await
            .cloned()
    }

    pub fn get(&self) -> Option<Arc<PipelineInputs>> {
        self.cell.get().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryConversationStore, KeywordRetrieval};
    use crate::dialogue::model::SessionId;

    fn preparer(store: Arc<InMemoryConversationStore>) -> InputsPreparer {
        let retrieval = Arc::new(KeywordRetrieval::new(store.clone()));
        InputsPreparer::new(store, retrieval, &PipelineConfig::default())
    }

    #[tokio::test]
    async fn test_cache_prepares_once() {
        let store = Arc::new(InMemoryConversationStore::new());
        let preparer = preparer(store.clone());
        let session = ConversationSession::new("s1", "u1");
        let cache = InputsCache::new();

        let first = cache.get_or_prepare(&preparer, &session, "hello").await.unwrap();
        // A second call with a different query must not recompute.
        let second = cache.get_or_prepare(&preparer, &session, "other").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.current_turn.query, "hello");
        assert_eq!(store.find_calls(), 1);
    }

    #[tokio::test]
    async fn test_history_and_retrieval_loaded() {
        let store = Arc::new(InMemoryConversationStore::new());
        let sid = SessionId::new("s1");
        store
            .save(ConversationTurn::new(sid.clone(), "tell me about tea").with_response("Tea is nice."))
            .await
            .unwrap();

        let inputs = preparer(store)
            .prepare(&ConversationSession::new("s1", "u1"), "more tea please")
            .await
            .unwrap();
        assert_eq!(inputs.history.turns.len(), 1);
        assert_eq!(inputs.retrieval.documents.len(), 1);
    }

    #[tokio::test]
    async fn test_blank_query_short_circuits() {
        let store = Arc::new(InMemoryConversationStore::new());
        let err = preparer(store.clone())
            .prepare(&ConversationSession::new("s1", "u1"), " ")
            .await
            .unwrap_err();
        assert!(matches!(err, DialogueError::EmptyQuery));
        assert_eq!(store.find_calls(), 0);
    }
}
