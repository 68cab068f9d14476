//! Answer synthesis. Fail-open: every outcome is user-facing text.

use std::sync::Arc;

use super::context_builder::SynthesisInput;
use super::error::SynthesisError;
use crate::llm::LanguageModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisKind {
    Answered,
    /// The model answered with nothing usable; `text` is the fallback message.
    Unusable,
    /// The model call failed; `text` is the apology.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Synthesis {
    pub text: String,
    pub kind: SynthesisKind,
}

pub struct AnswerSynthesizer {
    model: Arc<dyn LanguageModel>,
    unusable_message: String,
    apology_message: String,
}

impl AnswerSynthesizer {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        unusable_message: impl Into<String>,
        apology_message: impl Into<String>,
    ) -> Self {
        Self {
            model,
            unusable_message: unusable_message.into(),
            apology_message: apology_message.into(),
        }
    }

    pub async fn generate(&self, input: &SynthesisInput) -> String {
        self.synthesize(input).await.text
    }

    pub async fn synthesize(&self, input: &SynthesisInput) -> Synthesis {
        match self.try_generate(input).await {
            Ok(text) => Synthesis {
                text,
                kind: SynthesisKind::Answered,
            },
            Err(SynthesisError::Unusable) => {
                tracing::warn!("{} returned no usable answer", self.model.name());
                Synthesis {
                    text: self.unusable_message.clone(),
                    kind: SynthesisKind::Unusable,
                }
            }
            Err(e) => {
                tracing::error!("Answer generation failed via {}: {}", self.model.name(), e);
                Synthesis {
                    text: self.apology_message.clone(),
                    kind: SynthesisKind::Failed,
                }
            }
        }
    }

    async fn try_generate(&self, input: &SynthesisInput) -> Result<String, SynthesisError> {
        let response = self
            .model
            .complete(input)
            .await
            .map_err(SynthesisError::Provider)?;
        response.into_text().ok_or(SynthesisError::Unusable)
    }
}
