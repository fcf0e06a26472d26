//! Persistence after the response has been delivered.

use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::MemoryConfig;
use crate::dialogue::context::RequestContext;
use crate::dialogue::error::DialogueError;
use crate::dialogue::inputs::PipelineInputs;
use crate::dialogue::ports::{ConversationCounter, ConversationStore, MemoryExtractor};
use crate::observability::stage::{traced, Stage};

#[derive(Clone)]
pub struct PostProcessor {
    store: Arc<dyn ConversationStore>,
    counter: Arc<dyn ConversationCounter>,
    extractor: Arc<dyn MemoryExtractor>,
    extraction_threshold: u64,
}

impl PostProcessor {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        counter: Arc<dyn ConversationCounter>,
        extractor: Arc<dyn MemoryExtractor>,
        config: &MemoryConfig,
    ) -> Self {
        Self {
            store,
            counter,
            extractor,
            // Validation rejects zero; never divide by it anyway.
            extraction_threshold: config.extraction_threshold.max(1),
        }
    }

    /// Save the answered turn, bump the counter, extract memories every N turns.
    pub async fn persist(&self, inputs: &PipelineInputs, response: String) -> Result<(), DialogueError> {
        let turn = inputs.current_turn.clone().with_response(response);
        self.store.save(turn).await?;

        let count = self.counter.increment(&inputs.session.session_id).await?;
        if count % self.extraction_threshold == 0 {
            self.extractor.extract(&inputs.session).await?;
        }
        Ok(())
    }

    /// Run persistence on its own task so caller cancellation cannot abort
    /// it. Failures are logged and dropped.
    pub fn spawn(&self, ctx: RequestContext, inputs: Arc<PipelineInputs>, response: String) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let result = traced(&ctx, Stage::Persist, this.persist(&inputs, response)).await;
            if let Err(e) = result {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    session = %ctx.session.session_id,
                    error = %e,
                    "Post-processing failed; response was already delivered"
                );
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{
        InMemoryConversationCounter, InMemoryConversationStore, LoggingMemoryExtractor,
    };
    use crate::dialogue::model::{
        ConversationContext, ConversationSession, ConversationTurn, MemoryRetrievalResult,
        RetrievalContext,
    };

    fn inputs() -> PipelineInputs {
        let session = ConversationSession::new("s1", "u1");
        PipelineInputs {
            current_turn: ConversationTurn::new(session.session_id.clone(), "hi"),
            session,
            retrieval: RetrievalContext::empty("hi"),
            memories: MemoryRetrievalResult::default(),
            history: ConversationContext::default(),
        }
    }

    #[tokio::test]
    async fn test_extracts_every_threshold_turns() {
        let store = Arc::new(InMemoryConversationStore::new());
        let extractor = Arc::new(LoggingMemoryExtractor::new());
        let processor = PostProcessor::new(
            store.clone(),
            Arc::new(InMemoryConversationCounter::new()),
            extractor.clone(),
            &MemoryConfig { extraction_threshold: 2 },
        );

        let inputs = inputs();
        for i in 0..5 {
            processor.persist(&inputs, format!("answer {i}")).await.unwrap();
        }

        let saved = store.turns(&inputs.session.session_id);
        assert_eq!(saved.len(), 5);
        assert_eq!(saved[4].response.as_deref(), Some("answer 4"));
        assert_eq!(extractor.triggered(), 2);
    }
}
