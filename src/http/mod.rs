//! HTTP surface of the dialogue service.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, trace, timeout)
//!     → request.rs (JSON body → session + query,
//!                   or multipart upload → session + recording → transcript)
//!     → DialoguePipeline stream
//!     → first item Err? → response.rs (status + JSON error)
//!     → otherwise streamed body, one chunk per token or audio chunk
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{DialogueRequest, X_REQUEST_ID};
pub use server::{build_router, AppState, HttpServer};
