//! Per-request orchestration: tokens to sentences to ordered audio.
//!
//! Every stage runs as its own task and talks to the next over a bounded
//! channel. Items are `Result`s; the first `Err` travels downstream and ends
//! the request. All tasks live in the returned [`DialogueStream`]'s
//! `JoinSet`, so dropping the stream aborts them and every endpoint slot
//! held by an in-flight synthesis is released.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

use crate::config::PipelineConfig;
use crate::dialogue::assembler::SentenceAssembler;
use crate::dialogue::context::RequestContext;
use crate::dialogue::error::DialogueError;
use crate::dialogue::inputs::{InputsCache, InputsPreparer};
use crate::dialogue::ports::LanguageModel;
use crate::dialogue::post_process::PostProcessor;
use crate::dialogue::prompt::PromptBuilder;
use crate::observability::metrics;
use crate::observability::stage::{traced, Stage};
use crate::synthesis::{AudioFormat, SpeechSynthesizer};

pub type StageItem<T> = Result<T, DialogueError>;

/// Output of one dialogue request. Ends after the response has been
/// persisted; ends early with an `Err` item on failure.
pub struct DialogueStream<T> {
    ctx: RequestContext,
    rx: mpsc::Receiver<StageItem<T>>,
    tasks: JoinSet<()>,
    outcome: Option<&'static str>,
}

impl<T> DialogueStream<T> {
    fn new(ctx: RequestContext, rx: mpsc::Receiver<StageItem<T>>, tasks: JoinSet<()>) -> Self {
        Self {
            ctx,
            rx,
            tasks,
            outcome: None,
        }
    }

    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    /// Abort every stage of this request. Dropping the stream does the same.
    pub fn cancel(&mut self) {
        self.tasks.abort_all();
        self.finish("cancelled");
    }

    fn finish(&mut self, outcome: &'static str) {
        if self.outcome.is_some() {
            return;
        }
        self.outcome = Some(outcome);
        metrics::record_dialogue_request(self.ctx.mode.as_str(), outcome);
        tracing::info!(
            request_id = %self.ctx.request_id,
            session = %self.ctx.session.session_id,
            mode = self.ctx.mode.as_str(),
            outcome,
            elapsed_ms = self.ctx.elapsed().as_millis() as u64,
            "Dialogue finished"
        );
    }
}

// No field is structurally pinned.
impl<T> Unpin for DialogueStream<T> {}

impl<T> Stream for DialogueStream<T> {
    type Item = StageItem<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = this.rx.poll_recv(cx);
        match &polled {
            Poll::Ready(Some(Ok(_))) => {
                this.ctx.mark_first_emission();
            }
            Poll::Ready(Some(Err(_))) => this.finish("error"),
            Poll::Ready(None) => this.finish("ok"),
            Poll::Pending => {}
        }
        polled
    }
}

impl<T> Drop for DialogueStream<T> {
    fn drop(&mut self) {
        self.finish("cancelled");
    }
}

/// Forward every item downstream and keep a copy. The copies come back only
/// when the input ended cleanly and every item was delivered.
async fn tee<T: Clone>(
    input: &mut mpsc::Receiver<StageItem<T>>,
    output: &mpsc::Sender<StageItem<T>>,
) -> Option<Vec<T>> {
    let mut seen = Vec::new();
    while let Some(item) = input.recv().await {
        let failed = item.is_err();
        if let Ok(value) = &item {
            seen.push(value.clone());
        }
        if output.send(item).await.is_err() || failed {
            return None;
        }
    }
    Some(seen)
}

async fn assemble(
    tokens: &mut mpsc::Receiver<StageItem<String>>,
    sentences: &mpsc::Sender<StageItem<String>>,
) -> Result<(), DialogueError> {
    let mut assembler = SentenceAssembler::new();
    while let Some(token) = tokens.recv().await {
        for sentence in assembler.push(&token?) {
            if sentences.send(Ok(sentence)).await.is_err() {
                return Ok(());
            }
        }
    }
    if let Some(rest) = assembler.finish() {
        let _ = sentences.send(Ok(rest)).await;
    }
    Ok(())
}

#[derive(Clone)]
pub struct DialoguePipeline {
    preparer: InputsPreparer,
    prompt: PromptBuilder,
    model: Arc<dyn LanguageModel>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    post: PostProcessor,
    capacity: usize,
}

impl DialoguePipeline {
    pub fn new(
        preparer: InputsPreparer,
        prompt: PromptBuilder,
        model: Arc<dyn LanguageModel>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        post: PostProcessor,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            preparer,
            prompt,
            model,
            synthesizer,
            post,
            capacity: config.channel_capacity.max(1),
        }
    }

    /// Stream the model's tokens as they arrive.
    pub fn stream_text(&self, ctx: RequestContext, text: impl Into<String>) -> DialogueStream<String> {
        let mut tasks = JoinSet::new();
        let cache = Arc::new(InputsCache::new());
        let (out_tx, out_rx) = mpsc::channel(self.capacity);

        let mut tokens = self.spawn_generation(&mut tasks, &ctx, cache.clone(), text.into());

        let this = self.clone();
        let task_ctx = ctx.clone();
        tasks.spawn(async move {
            if let Some(tokens) = tee(&mut tokens, &out_tx).await {
                this.persist(&task_ctx, &cache, tokens.concat()).await;
            }
        });

        DialogueStream::new(ctx, out_rx, tasks)
    }

    /// Stream audio sentence by sentence, in the order the sentences were
    /// generated.
    pub fn stream_audio(
        &self,
        ctx: RequestContext,
        text: impl Into<String>,
        format: AudioFormat,
    ) -> DialogueStream<Bytes> {
        let mut tasks = JoinSet::new();
        let cache = Arc::new(InputsCache::new());
        let (out_tx, out_rx) = mpsc::channel(self.capacity);

        let tokens = self.spawn_generation(&mut tasks, &ctx, cache.clone(), text.into());
        let mut sentences = self.spawn_assembly(&mut tasks, &ctx, tokens);

        // Fan-out: synthesis reads every sentence, persistence gets the transcript.
        let (synth_tx, synth_rx) = mpsc::channel(self.capacity);
        let (transcript_tx, transcript_rx) = oneshot::channel();
        tasks.spawn(async move {
            if let Some(transcript) = tee(&mut sentences, &synth_tx).await {
                let _ = transcript_tx.send(transcript);
            }
        });

        let this = self.clone();
        let task_ctx = ctx.clone();
        tasks.spawn(async move {
            match this.synthesize_all(&task_ctx, synth_rx, &out_tx, format).await {
                Ok(true) => {
                    if let Ok(transcript) = transcript_rx.await {
                        this.persist(&task_ctx, &cache, transcript.join(" ")).await;
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    let _ = out_tx.send(Err(e)).await;
                }
            }
        });

        DialogueStream::new(ctx, out_rx, tasks)
    }

    fn spawn_generation(
        &self,
        tasks: &mut JoinSet<()>,
        ctx: &RequestContext,
        cache: Arc<InputsCache>,
        query: String,
    ) -> mpsc::Receiver<StageItem<String>> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let this = self.clone();
        let ctx = ctx.clone();
        tasks.spawn(async move {
            let generated = traced(&ctx, Stage::Generate, this.generate(&ctx, &cache, &query, &tx)).await;
            if let Err(e) = generated {
                let _ = tx.send(Err(e)).await;
            }
        });
        rx
    }

    fn spawn_assembly(
        &self,
        tasks: &mut JoinSet<()>,
        ctx: &RequestContext,
        mut tokens: mpsc::Receiver<StageItem<String>>,
    ) -> mpsc::Receiver<StageItem<String>> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let ctx = ctx.clone();
        tasks.spawn(async move {
            if let Err(e) = traced(&ctx, Stage::Assemble, assemble(&mut tokens, &tx)).await {
                let _ = tx.send(Err(e)).await;
            }
        });
        rx
    }

    /// Prepare inputs once, query the model once, forward its tokens.
    async fn generate(
        &self,
        ctx: &RequestContext,
        cache: &InputsCache,
        query: &str,
        tokens: &mpsc::Sender<StageItem<String>>,
    ) -> Result<(), DialogueError> {
        let inputs = traced(
            ctx,
            Stage::Prepare,
            cache.get_or_prepare(&self.preparer, &ctx.session, query),
        )
        .await?;
        let request = self.prompt.build(&inputs)?;
        let mut stream = self.model.stream_completion(request).await?;

        while let Some(token) = stream.next().await {
            if tokens.send(Ok(token?)).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    /// Synthesize sentences strictly one after another. Returns `Ok(false)`
    /// when the caller went away.
    async fn synthesize_all(
        &self,
        ctx: &RequestContext,
        mut sentences: mpsc::Receiver<StageItem<String>>,
        out: &mpsc::Sender<StageItem<Bytes>>,
        format: AudioFormat,
    ) -> Result<bool, DialogueError> {
        // Warm up while the first sentence is still being generated.
        let ((), mut next) = tokio::join!(self.synthesizer.prepare(), sentences.recv());

        while let Some(sentence) = next {
            let sentence = sentence?;
            let mut chunks = traced(
                ctx,
                Stage::Synthesize,
                self.synthesizer.synthesize(&sentence, format),
            )
            .await?;
            while let Some(chunk) = chunks.next().await {
                if out.send(Ok(chunk?)).await.is_err() {
                    return Ok(false);
                }
            }
            next = sentences.recv().await;
        }
        Ok(true)
    }

    /// Persistence runs on a detached task; the stream waits for it but a
    /// dropped stream does not abort it.
    async fn persist(&self, ctx: &RequestContext, cache: &InputsCache, response: String) {
        let Some(inputs) = cache.get() else {
            return;
        };
        if let Err(e) = self.post.spawn(ctx.clone(), inputs, response).await {
            tracing::warn!(
                request_id = %ctx.request_id,
                error = %e,
                "Post-processing task did not complete"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{
        InMemoryConversationCounter, InMemoryConversationStore, KeywordRetrieval,
        LoggingMemoryExtractor,
    };
    use crate::config::MemoryConfig;
    use crate::dialogue::context::DialogueMode;
    use crate::dialogue::error::LanguageModelError;
    use crate::dialogue::model::{CompletionRequest, ConversationSession, SessionId};
    use crate::dialogue::ports::TokenStream;
    use crate::load_balancer::endpoint::test_support::endpoint;
    use crate::load_balancer::{EndpointGuard, EndpointPool, LowestCredit};
    use crate::observability::events::EventBus;
    use crate::synthesis::{AudioChunks, SynthesisError, SynthesisResult};
    use async_trait::async_trait;
    use futures_util::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct ScriptedModel {
        tokens: Vec<Result<&'static str, &'static str>>,
        calls: AtomicUsize,
    }

    impl ScriptedModel {
        fn new(tokens: Vec<Result<&'static str, &'static str>>) -> Arc<Self> {
            Arc::new(Self {
                tokens,
                calls: AtomicUsize::new(0),
            })
        }

        fn ok(tokens: &[&'static str]) -> Arc<Self> {
            Self::new(tokens.iter().map(|t| Ok(*t)).collect())
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn stream_completion(&self, _request: CompletionRequest) -> Result<TokenStream, LanguageModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let items: Vec<_> = self
                .tokens
                .iter()
                .map(|t| {
                    t.map(str::to_string)
                        .map_err(|e| LanguageModelError::Stream(e.to_string()))
                })
                .collect();
            Ok(stream::iter(items).boxed())
        }
    }

    /// Answers each sentence with a fixed chunk after a per-sentence delay.
    struct DelayedSynth {
        script: Vec<(&'static str, &'static str, Duration)>,
        prepared: AtomicUsize,
    }

    #[async_trait]
    impl SpeechSynthesizer for DelayedSynth {
        async fn prepare(&self) {
            self.prepared.fetch_add(1, Ordering::SeqCst);
        }

        async fn synthesize(&self, text: &str, _format: AudioFormat) -> SynthesisResult<AudioChunks> {
            let (_, chunk, delay) = self
                .script
                .iter()
                .find(|(sentence, _, _)| *sentence == text)
                .copied()
                .ok_or_else(|| SynthesisError::Status {
                    endpoint: "mock".into(),
                    status: 400,
                    message: format!("unexpected sentence {text}"),
                })?;
            tokio::time::sleep(delay).await;
            Ok(stream::iter([Ok(Bytes::from_static(chunk.as_bytes()))]).boxed())
        }
    }

    /// Holds a real endpoint slot and never finishes after its first chunk.
    struct StallingSynth {
        pool: Arc<EndpointPool>,
    }

    #[async_trait]
    impl SpeechSynthesizer for StallingSynth {
        async fn prepare(&self) {}

        async fn synthesize(&self, _text: &str, _format: AudioFormat) -> SynthesisResult<AudioChunks> {
            let guard: EndpointGuard = self.pool.select()?;
            Ok(stream::unfold((guard, false), |(guard, sent)| async move {
                if sent {
                    futures_util::future::pending::<()>().await;
                }
                Some((Ok(Bytes::from_static(b"A")), (guard, true)))
            })
            .boxed())
        }
    }

    fn pipeline(
        model: Arc<dyn LanguageModel>,
        synth: Arc<dyn SpeechSynthesizer>,
    ) -> (DialoguePipeline, Arc<InMemoryConversationStore>) {
        let store = Arc::new(InMemoryConversationStore::new());
        let config = PipelineConfig::default();
        let preparer = InputsPreparer::new(
            store.clone(),
            Arc::new(KeywordRetrieval::new(store.clone())),
            &config,
        );
        let post = PostProcessor::new(
            store.clone(),
            Arc::new(InMemoryConversationCounter::new()),
            Arc::new(LoggingMemoryExtractor::new()),
            &MemoryConfig::default(),
        );
        let pipeline = DialoguePipeline::new(preparer, PromptBuilder::default(), model, synth, post, &config);
        (pipeline, store)
    }

    fn ctx(mode: DialogueMode) -> RequestContext {
        RequestContext::new("req-1", ConversationSession::new("s1", "u1"), mode)
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_emitted_in_sentence_order() {
        let model = ScriptedModel::ok(&["Hi", "!", " How", " are", " you", "?"]);
        let synth = Arc::new(DelayedSynth {
            script: vec![
                ("Hi!", "A", Duration::from_millis(50)),
                ("How are you?", "B", Duration::from_millis(5)),
            ],
            prepared: AtomicUsize::new(0),
        });
        let (pipeline, store) = pipeline(model.clone(), synth.clone());

        let chunks: Vec<_> = pipeline
            .stream_audio(ctx(DialogueMode::Audio), "hello there", AudioFormat::Mp3)
            .collect()
            .await;
        let chunks: Vec<_> = chunks.into_iter().map(|c| c.unwrap()).collect();
        assert_eq!(chunks, [Bytes::from_static(b"A"), Bytes::from_static(b"B")]);

        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(synth.prepared.load(Ordering::SeqCst), 1);
        // Generation and persistence share one prepared input set.
        assert_eq!(store.find_calls(), 1);
        let saved = store.turns(&SessionId::new("s1"));
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].query, "hello there");
        assert_eq!(saved[0].response.as_deref(), Some("Hi! How are you?"));
    }

    #[tokio::test]
    async fn test_text_stream_forwards_tokens_and_persists() {
        let model = ScriptedModel::ok(&["Hel", "lo", " world"]);
        let synth = Arc::new(DelayedSynth {
            script: vec![],
            prepared: AtomicUsize::new(0),
        });
        let (pipeline, store) = pipeline(model, synth.clone());

        let mut stream = pipeline.stream_text(ctx(DialogueMode::Text), "greet me");
        let mut tokens = Vec::new();
        while let Some(token) = stream.next().await {
            tokens.push(token.unwrap());
        }
        assert!(stream.context().has_emitted());
        assert_eq!(tokens, ["Hel", "lo", " world"]);
        assert_eq!(synth.prepared.load(Ordering::SeqCst), 0);

        let saved = store.turns(&SessionId::new("s1"));
        assert_eq!(saved[0].response.as_deref(), Some("Hello world"));
    }

    #[tokio::test]
    async fn test_generation_error_ends_stream() {
        let model = ScriptedModel::new(vec![Ok("Partial"), Err("model crashed")]);
        let synth = Arc::new(DelayedSynth {
            script: vec![],
            prepared: AtomicUsize::new(0),
        });
        let (pipeline, store) = pipeline(model, synth);

        let items: Vec<_> = pipeline.stream_text(ctx(DialogueMode::Text), "hi").collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().unwrap(), "Partial");
        assert!(matches!(items[1], Err(DialogueError::Generation(_))));
        assert!(store.turns(&SessionId::new("s1")).is_empty());
    }

    #[tokio::test]
    async fn test_synthesis_error_is_terminal() {
        let model = ScriptedModel::ok(&["Known. ", "Unknown."]);
        let synth = Arc::new(DelayedSynth {
            script: vec![("Known.", "K", Duration::ZERO)],
            prepared: AtomicUsize::new(0),
        });
        let (pipeline, store) = pipeline(model, synth);

        let items: Vec<_> = pipeline
            .stream_audio(ctx(DialogueMode::Audio), "hi", AudioFormat::Wav)
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &Bytes::from_static(b"K"));
        assert!(matches!(items[1], Err(DialogueError::Synthesis(_))));
        assert!(store.turns(&SessionId::new("s1")).is_empty());
    }

    #[tokio::test]
    async fn test_blank_query_fails_before_generation() {
        let model = ScriptedModel::ok(&["never"]);
        let synth = Arc::new(DelayedSynth {
            script: vec![],
            prepared: AtomicUsize::new(0),
        });
        let (pipeline, _) = pipeline(model.clone(), synth);

        let items: Vec<_> = pipeline.stream_text(ctx(DialogueMode::Text), "  ").collect().await;
        assert!(matches!(items.as_slice(), [Err(DialogueError::EmptyQuery)]));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dropped_stream_releases_endpoint_slots() {
        let pool = Arc::new(EndpointPool::new(
            vec![endpoint("a", 4), endpoint("b", 4)],
            Box::new(LowestCredit::new()),
            EventBus::default(),
            Duration::from_secs(10),
        ));
        let model = ScriptedModel::ok(&["Hi!", " How are you?"]);
        let synth = Arc::new(StallingSynth { pool: pool.clone() });
        let (pipeline, store) = pipeline(model, synth);

        let mut stream = pipeline.stream_audio(ctx(DialogueMode::Audio), "hi", AudioFormat::Pcm);
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, Bytes::from_static(b"A"));
        assert_eq!(pool.total_active_requests(), 1);

        drop(stream);
        for _ in 0..100 {
            if pool.total_active_requests() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(pool.total_active_requests(), 0);
        assert!(store.turns(&SessionId::new("s1")).is_empty());
    }
}
