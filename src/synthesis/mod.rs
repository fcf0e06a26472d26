//! Speech synthesis subsystem.
//!
//! # Data Flow
//! ```text
//! Sentence
//!     → client.rs (select endpoint from pool, POST streaming request)
//!     → first audio byte received? no → report failure, try next endpoint
//!     → yes → stream remaining chunks, report outcome when the body ends
//! ```
//!
//! # Design Decisions
//! - Failover only before the first byte so no audio is ever duplicated
//! - Client errors end the sentence immediately
//! - Attempts per sentence are bounded by pool size
//! - The endpoint slot lives inside the body stream; dropping it releases the slot

pub mod client;
pub mod error;
pub mod voice;

pub use client::{AudioChunks, SpeechSynthesizer, SynthesisClient};
pub use error::{SynthesisError, SynthesisResult};
pub use voice::{AudioFormat, VoiceSettings};
