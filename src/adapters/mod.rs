//! Concrete collaborators for the dialogue pipeline.
//!
//! # Design Decisions
//! - Storage, counting and retrieval stay in process for the server binary
//! - The language model is any OpenAI-compatible streaming endpoint
//! - Speech input goes to the same family's transcription endpoint

pub mod memory;
pub mod openai;
pub mod whisper;

pub use memory::{
    InMemoryConversationCounter, InMemoryConversationStore, KeywordRetrieval,
    LoggingMemoryExtractor,
};
pub use openai::OpenAiChatClient;
pub use whisper::WhisperClient;
