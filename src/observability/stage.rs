//! Stage middleware: wraps a stage future with a span, timing and outcome.

use std::fmt::Display;
use std::future::Future;
use std::time::Instant;
use tracing::Instrument;

use crate::dialogue::context::RequestContext;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Transcribe,
    Prepare,
    Generate,
    Assemble,
    Synthesize,
    Persist,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Transcribe => "transcribe",
            Stage::Prepare => "prepare",
            Stage::Generate => "generate",
            Stage::Assemble => "assemble",
            Stage::Synthesize => "synthesize",
            Stage::Persist => "persist",
        }
    }
}

/// Run `fut` inside a stage span and record its duration.
pub async fn traced<F, T, E>(ctx: &RequestContext, stage: Stage, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    let span = tracing::debug_span!(
        "stage",
        stage = stage.as_str(),
        request_id = %ctx.request_id,
        session = %ctx.session.session_id,
    );
    let started = Instant::now();
    let result = fut.instrument(span.clone()).await;
    let elapsed = started.elapsed();
    metrics::record_stage_duration(stage.as_str(), elapsed.as_secs_f64());

    span.in_scope(|| match &result {
        Ok(_) => tracing::debug!(elapsed_ms = elapsed.as_millis() as u64, "Stage finished"),
        Err(e) => tracing::warn!(elapsed_ms = elapsed.as_millis() as u64, error = %e, "Stage failed"),
    });
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::context::DialogueMode;
    use crate::dialogue::model::ConversationSession;

    #[tokio::test]
    async fn test_traced_passes_result_through() {
        let ctx = RequestContext::new("r", ConversationSession::new("s", "u"), DialogueMode::Text);
        let ok: Result<u32, String> = traced(&ctx, Stage::Prepare, async { Ok(7) }).await;
        assert_eq!(ok, Ok(7));
        let err: Result<u32, String> = traced(&ctx, Stage::Persist, async { Err("boom".into()) }).await;
        assert_eq!(err, Err("boom".to_string()));
    }
}
