//! Per-request context passed explicitly to every stage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::dialogue::model::ConversationSession;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogueMode {
    Text,
    Audio,
}

impl DialogueMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DialogueMode::Text => "text",
            DialogueMode::Audio => "audio",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub session: ConversationSession,
    pub mode: DialogueMode,
    started_at: Instant,
    first_emitted: Arc<AtomicBool>,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>, session: ConversationSession, mode: DialogueMode) -> Self {
        Self {
            request_id: request_id.into(),
            session,
            mode,
            started_at: Instant::now(),
            first_emitted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Record first-chunk latency. Only the first call per request counts.
    pub fn mark_first_emission(&self) -> bool {
        if self.first_emitted.swap(true, Ordering::AcqRel) {
            return false;
        }
        let elapsed = self.elapsed();
        metrics::record_first_chunk(self.mode.as_str(), elapsed.as_secs_f64());
        tracing::debug!(
            request_id = %self.request_id,
            mode = self.mode.as_str(),
            elapsed_ms = elapsed.as_millis() as u64,
            "First chunk emitted"
        );
        true
    }

    pub fn has_emitted(&self) -> bool {
        self.first_emitted.load(Ordering::Acquire)
    }
}
