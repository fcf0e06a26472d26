//! Conversation domain types.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who is talking to whom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSession {
    pub session_id: SessionId,
    pub user_id: String,
    pub persona_id: Option<String>,
}

impl ConversationSession {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: SessionId::new(session_id),
            user_id: user_id.into(),
            persona_id: None,
        }
    }

    pub fn with_persona(mut self, persona_id: impl Into<String>) -> Self {
        self.persona_id = Some(persona_id.into());
        self
    }
}

/// One user query and, once answered, the assistant response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: Uuid,
    pub session_id: SessionId,
    pub query: String,
    pub response: Option<String>,
    pub created_at: SystemTime,
}

impl ConversationTurn {
    pub fn new(session_id: SessionId, query: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            query: query.into(),
            response: None,
            created_at: SystemTime::now(),
        }
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }
}

/// Recent turns of a session, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationContext {
    pub turns: Vec<ConversationTurn>,
}

impl ConversationContext {
    pub fn new(turns: Vec<ConversationTurn>) -> Self {
        Self { turns }
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalDocument {
    pub id: String,
    pub content: String,
    pub score: f64,
}

/// Documents ranked for one query, best first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalContext {
    pub query: String,
    pub documents: Vec<RetrievalDocument>,
}

impl RetrievalContext {
    pub fn empty(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            documents: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Experiential,
    Factual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub memory_type: MemoryType,
    pub content: String,
    pub importance: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryRetrievalResult {
    pub experiential: Vec<Memory>,
    pub factual: Vec<Memory>,
}

impl MemoryRetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.experiential.is_empty() && self.factual.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Chat messages handed to the language model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
}

/// An uploaded recording waiting to be transcribed.
#[derive(Debug, Clone)]
pub struct AudioUpload {
    pub file_name: String,
    pub content_type: String,
    pub audio: Bytes,
    /// Language hint; `None` lets the backend detect it.
    pub language: Option<String>,
}
