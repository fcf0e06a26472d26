//! Dialogue subsystem.
//!
//! # Data Flow
//! ```text
//! audio upload → speech.rs (SpeechToText) ─┐
//! (session, query) ◀───────────────────────┘
//!     → inputs.rs (history + retrieval + memories, once per request)
//!     → prompt.rs (system prompt, history, query)
//!     → LanguageModel token stream
//!         → text mode: tokens → caller
//!         → audio mode: assembler.rs (sentences)
//!             → SpeechSynthesizer, one sentence at a time → caller
//!     → post_process.rs (save turn, count, maybe extract memories)
//! ```
//!
//! # Design Decisions
//! - One task per stage, bounded channels between them
//! - Token and sentence streams are produced once and fanned out explicitly
//! - Sentences are synthesized sequentially so audio order equals text order
//! - Persistence failures are logged, never surfaced

pub mod assembler;
pub mod context;
pub mod error;
pub mod inputs;
pub mod model;
pub mod pipeline;
pub mod ports;
pub mod post_process;
pub mod prompt;
pub mod speech;

pub use assembler::SentenceAssembler;
pub use context::{DialogueMode, RequestContext};
pub use error::{
    DialogueError, DialogueResult, LanguageModelError, RetrievalError, StoreError,
    TranscriptionError,
};
pub use inputs::{InputsCache, InputsPreparer, PipelineInputs};
pub use model::{AudioUpload, ConversationSession, ConversationTurn, SessionId};
pub use pipeline::{DialoguePipeline, DialogueStream};
pub use ports::{
    ConversationCounter, ConversationStore, LanguageModel, MemoryExtractor, RetrievalService,
    SpeechToText, TokenStream,
};
pub use post_process::PostProcessor;
pub use prompt::PromptBuilder;
pub use speech::{SpeechDialogue, SpeechReply};
