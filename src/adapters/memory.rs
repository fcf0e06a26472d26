//! In-process implementations of the conversation ports.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::dialogue::error::{RetrievalError, StoreError};
use crate::dialogue::model::{
    ConversationSession, ConversationTurn, MemoryRetrievalResult, RetrievalContext,
    RetrievalDocument, SessionId,
};
use crate::dialogue::ports::{ConversationCounter, ConversationStore, MemoryExtractor, RetrievalService};

/// Turns kept per session in insertion order.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    sessions: DashMap<SessionId, Vec<ConversationTurn>>,
    find_calls: AtomicUsize,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self, session_id: &SessionId) -> Vec<ConversationTurn> {
        self.sessions
            .get(session_id)
            .map(|turns| turns.clone())
            .unwrap_or_default()
    }

    /// How many times `find_recent` was called.
    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn save(&self, turn: ConversationTurn) -> Result<ConversationTurn, StoreError> {
        self.sessions
            .entry(turn.session_id.clone())
            .or_default()
            .push(turn.clone());
        Ok(turn)
    }

    async fn find_recent(
        &self,
        session_id: &SessionId,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        self.find_calls.fetch_add(1, Ordering::Relaxed);
        let turns = self.turns(session_id);
        let skip = turns.len().saturating_sub(limit);
        Ok(turns.into_iter().skip(skip).collect())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryConversationCounter {
    counts: DashMap<SessionId, u64>,
}

impl InMemoryConversationCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationCounter for InMemoryConversationCounter {
    async fn increment(&self, session_id: &SessionId) -> Result<u64, StoreError> {
        let mut count = self.counts.entry(session_id.clone()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn get(&self, session_id: &SessionId) -> Result<u64, StoreError> {
        Ok(self.counts.get(session_id).map(|c| *c).unwrap_or(0))
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

/// Whitespace-token overlap between two texts.
pub fn keyword_score(query: &str, candidate: &str) -> usize {
    tokenize(query).intersection(&tokenize(candidate)).count()
}

/// Ranks a session's previous queries by keyword overlap with the new one.
/// Memory retrieval is not backed by anything and returns nothing.
#[derive(Debug, Clone)]
pub struct KeywordRetrieval {
    store: Arc<InMemoryConversationStore>,
}

impl KeywordRetrieval {
    pub fn new(store: Arc<InMemoryConversationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RetrievalService for KeywordRetrieval {
    async fn retrieve(
        &self,
        session_id: &SessionId,
        query: &str,
        top_k: usize,
    ) -> Result<RetrievalContext, RetrievalError> {
        let mut documents: Vec<_> = self
            .store
            .turns(session_id)
            .into_iter()
            .filter_map(|turn| {
                let score = keyword_score(query, &turn.query);
                (score > 0).then(|| RetrievalDocument {
                    id: turn.id.to_string(),
                    content: turn.query,
                    score: score as f64,
                })
            })
            .collect();
        documents.sort_by(|a, b| b.score.total_cmp(&a.score));
        documents.truncate(top_k);

        Ok(RetrievalContext {
            query: query.to_string(),
            documents,
        })
    }

    async fn retrieve_memories(
        &self,
        _session: &ConversationSession,
        _query: &str,
        _top_k: usize,
    ) -> Result<MemoryRetrievalResult, RetrievalError> {
        Ok(MemoryRetrievalResult::default())
    }
}

/// Logs the extraction trigger. Stands in for a real extraction backend.
#[derive(Debug, Default)]
pub struct LoggingMemoryExtractor {
    triggered: AtomicUsize,
}

impl LoggingMemoryExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn triggered(&self) -> usize {
        self.triggered.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MemoryExtractor for LoggingMemoryExtractor {
    async fn extract(&self, session: &ConversationSession) -> Result<(), StoreError> {
        self.triggered.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            session = %session.session_id,
            user = %session.user_id,
            "Memory extraction triggered"
        );
        Ok(())
    }
}
