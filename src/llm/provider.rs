use async_trait::async_trait;

use super::types::ModelResponse;
use super::ProviderError;
use crate::rag::SynthesisInput;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// provider name for logs (e.g. "ollama", "openai_compatible")
    fn name(&self) -> &str;

    /// one vector per input, in input order
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    async fn embed_one(&self, input: &str) -> Result<Vec<f32>, ProviderError> {
        self.embed(&[input.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Decode("no embedding returned".to_string()))
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    /// single non-streaming completion grounded on `input`
    async fn complete(&self, input: &SynthesisInput) -> Result<ModelResponse, ProviderError>;
}

/// Rejects embedding responses that do not line up with the request.
pub(crate) fn check_embedding_count(
    inputs: usize,
    embeddings: &[Vec<f32>],
) -> Result<(), ProviderError> {
    if embeddings.len() != inputs {
        return Err(ProviderError::Decode(format!(
            "expected {} embeddings, got {}",
            inputs,
            embeddings.len()
        )));
    }
    if embeddings.iter().any(Vec::is_empty) {
        return Err(ProviderError::Decode("empty embedding vector".to_string()));
    }
    Ok(())
}
