//! Context assembly.
//!
//! Merges retrieved evidence with a bounded, chronologically ordered slice of
//! conversation history into the input handed to the synthesizer.

use super::retriever::RetrievalResult;
use crate::history::{ConversationTurn, TurnRole};
use crate::llm::ChatMessage;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer the user's question \
using only the information in the provided context. If the context does not contain the \
answer, say that you do not know.";

/// Everything the language model sees for one question.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisInput {
    pub question: String,
    /// Evidence texts joined in received (best-first) order.
    pub context: String,
    pub evidence: Vec<RetrievalResult>,
    /// Oldest first.
    pub history: Vec<ConversationTurn>,
}

impl SynthesisInput {
    pub fn new(
        question: impl Into<String>,
        evidence: Vec<RetrievalResult>,
        history: Vec<ConversationTurn>,
    ) -> Self {
        let context = evidence
            .iter()
            .map(|e| e.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        Self {
            question: question.into(),
            context,
            evidence,
            history,
        }
    }

    /// Renders provider messages: instructions with context, history, question.
    pub fn to_messages(&self, system_prompt: Option<&str>) -> Vec<ChatMessage> {
        let instructions = system_prompt
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);

        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage::system(format!(
            "{}\n\nContext:\n{}",
            instructions, self.context
        )));
        for turn in &self.history {
            messages.push(match turn.role {
                TurnRole::User => ChatMessage::user(turn.content.clone()),
                TurnRole::Assistant => ChatMessage::assistant(turn.content.clone()),
            });
        }
        messages.push(ChatMessage::user(self.question.clone()));
        messages
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssembledContext {
    /// Nothing was retrieved; the synthesizer must not run.
    NoEvidence,
    Ready(SynthesisInput),
}

#[derive(Debug, Clone, Copy)]
pub struct ContextAssembler {
    history_limit: usize,
}

impl ContextAssembler {
    pub fn new(history_limit: usize) -> Self {
        Self { history_limit }
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    pub fn build_context(
        &self,
        query: &str,
        evidence: Vec<RetrievalResult>,
        mut history: Vec<ConversationTurn>,
    ) -> AssembledContext {
        if evidence.is_empty() {
            return AssembledContext::NoEvidence;
        }

        // Callers may hand turns over in any order.
        history.sort_by_key(|turn| turn.position);
        let skip = history.len().saturating_sub(self.history_limit);
        history.drain(..skip);

        AssembledContext::Ready(SynthesisInput::new(query, evidence, history))
    }
}
