//! Prompt construction from prepared inputs.

use crate::config::PromptConfig;
use crate::dialogue::error::DialogueError;
use crate::dialogue::inputs::PipelineInputs;
use crate::dialogue::model::{CompletionRequest, Memory, MemoryRetrievalResult, Message, RetrievalContext};

pub const FALLBACK_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

const MEMORIES_TITLE: &str = "Known about the user:";
const EXPERIENTIAL_TITLE: &str = "Experiences:";
const FACTUAL_TITLE: &str = "Facts:";
const CONTEXT_TITLE: &str = "Reference:";

#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    system_prompt: String,
    common_prompt: String,
}

impl PromptBuilder {
    pub fn new(system_prompt: impl Into<String>, common_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            common_prompt: common_prompt.into(),
        }
    }

    pub fn from_config(config: &PromptConfig) -> Self {
        Self::new(config.system_prompt.clone(), config.common_prompt.clone())
    }

    /// System prompt, then answered history as user/assistant pairs, then the query.
    pub fn build(&self, inputs: &PipelineInputs) -> Result<CompletionRequest, DialogueError> {
        let query = inputs.current_turn.query.trim();
        if query.is_empty() {
            return Err(DialogueError::EmptyQuery);
        }

        let mut messages = vec![Message::system(
            self.system_message(&inputs.retrieval, &inputs.memories),
        )];
        for turn in &inputs.history.turns {
            if let Some(response) = turn.response.as_deref().filter(|r| !r.trim().is_empty()) {
                messages.push(Message::user(turn.query.clone()));
                messages.push(Message::assistant(response));
            }
        }
        messages.push(Message::user(query));

        Ok(CompletionRequest { messages })
    }

    pub fn system_message(&self, context: &RetrievalContext, memories: &MemoryRetrievalResult) -> String {
        let blocks = [
            self.system_prompt.trim().to_string(),
            self.common_prompt.trim().to_string(),
            memory_block(memories),
            context_block(context),
        ];
        let joined = blocks
            .iter()
            .filter(|b| !b.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n\n");

        if joined.is_empty() {
            FALLBACK_SYSTEM_PROMPT.to_string()
        } else {
            joined
        }
    }
}

fn memory_section(title: &str, memories: &[Memory]) -> Option<String> {
    let lines: Vec<_> = memories
        .iter()
        .map(|m| m.content.trim())
        .filter(|c| !c.is_empty())
        .map(|c| format!("- {c}"))
        .collect();
    (!lines.is_empty()).then(|| format!("{title}\n{}", lines.join("\n")))
}

fn memory_block(memories: &MemoryRetrievalResult) -> String {
    let sections: Vec<_> = [
        memory_section(EXPERIENTIAL_TITLE, &memories.experiential),
        memory_section(FACTUAL_TITLE, &memories.factual),
    ]
    .into_iter()
    .flatten()
    .collect();

    if sections.is_empty() {
        String::new()
    } else {
        format!("{MEMORIES_TITLE}\n\n{}", sections.join("\n\n"))
    }
}

fn context_block(context: &RetrievalContext) -> String {
    let lines: Vec<_> = context
        .documents
        .iter()
        .map(|d| d.content.trim())
        .filter(|c| !c.is_empty())
        .collect();
    if lines.is_empty() {
        String::new()
    } else {
        format!("{CONTEXT_TITLE}\n{}", lines.join("\n"))
    }
}
