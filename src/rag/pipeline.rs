//! One question in, one answer out.

use serde::{Deserialize, Serialize};

use super::context_builder::{AssembledContext, ContextAssembler};
use super::retriever::{RetrievalResult, Retriever};
use super::synthesizer::{AnswerSynthesizer, SynthesisKind};
use crate::core::config::MessageSettings;
use crate::history::ConversationTurn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcome {
    NoEvidence,
    Synthesized,
    Unusable,
    SynthesisFailed,
    RetrievalFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub outcome: AnswerOutcome,
    pub evidence: Vec<RetrievalResult>,
}

impl Answer {
    fn message(text: &str, outcome: AnswerOutcome) -> Self {
        Self {
            text: text.to_string(),
            outcome,
            evidence: Vec::new(),
        }
    }
}

pub struct RagPipeline {
    retriever: Retriever,
    assembler: ContextAssembler,
    synthesizer: AnswerSynthesizer,
    top_k: usize,
    query_prefix: Option<String>,
    no_evidence_message: String,
    apology_message: String,
}

impl RagPipeline {
    pub fn new(
        retriever: Retriever,
        assembler: ContextAssembler,
        synthesizer: AnswerSynthesizer,
        top_k: usize,
        messages: &MessageSettings,
    ) -> Self {
        Self {
            retriever,
            assembler,
            synthesizer,
            top_k,
            query_prefix: None,
            no_evidence_message: messages.no_evidence.clone(),
            apology_message: messages.apology.clone(),
        }
    }

    pub fn with_query_prefix(mut self, prefix: Option<String>) -> Self {
        self.query_prefix = prefix.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn history_limit(&self) -> usize {
        self.assembler.history_limit()
    }

    fn prefixed(&self, query: &str) -> String {
        match &self.query_prefix {
            Some(prefix) => format!("{} {}", prefix.trim_end(), query),
            None => query.to_string(),
        }
    }

    /// Runs retrieval, assembly and synthesis. Never fails: degraded paths
    /// come back as messages with the matching outcome.
    pub async fn answer(&self, query: &str, history: &[ConversationTurn]) -> Answer {
        let question = self.prefixed(query);

        let evidence = match self.retriever.search(&question, self.top_k).await {
            Ok(evidence) => evidence,
            Err(e) => {
                tracing::error!("Retrieval from '{}' failed: {}", self.retriever.collection(), e);
                return Answer::message(&self.apology_message, AnswerOutcome::RetrievalFailed);
            }
        };

        let input = match self.assembler.build_context(&question, evidence, history.to_vec()) {
            AssembledContext::NoEvidence => {
                tracing::info!("No evidence found for query");
                return Answer::message(&self.no_evidence_message, AnswerOutcome::NoEvidence);
            }
            AssembledContext::Ready(input) => input,
        };

        let synthesis = self.synthesizer.synthesize(&input).await;
        let outcome = match synthesis.kind {
            SynthesisKind::Answered => AnswerOutcome::Synthesized,
            SynthesisKind::Unusable => AnswerOutcome::Unusable,
            SynthesisKind::Failed => AnswerOutcome::SynthesisFailed,
        };

        Answer {
            text: synthesis.text,
            outcome,
            evidence: input.evidence,
        }
    }
}
