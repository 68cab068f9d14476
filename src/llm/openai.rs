use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::provider::{check_embedding_count, Embedder, LanguageModel};
use super::types::{ChatOptions, ModelResponse};
use super::{check_status, http_client, ProviderError};
use crate::rag::SynthesisInput;

/// Any server speaking the OpenAI REST dialect (LM Studio, vLLM, OpenAI).
#[derive(Clone)]
pub struct OpenAiCompatibleProvider {
    base_url: String,
    model: String,
    options: ChatOptions,
    client: Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        base_url: &str,
        model: &str,
        timeout: Duration,
        api_key: Option<&str>,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            options: ChatOptions::default(),
            client: http_client(timeout, api_key)?,
        })
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        "openai_compatible"
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = json!({
            "model": self.model,
            "input": inputs,
        });

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        let mut payload: EmbeddingsResponse = check_status(res)
            .await?
            .json()
            .await
            .map_err(ProviderError::from_reqwest)?;

        // `index` is optional on some servers; when present it wins over list order.
        if payload.data.iter().all(|item| item.index.is_some()) {
            payload.data.sort_by_key(|item| item.index);
        }
        let embeddings: Vec<Vec<f32>> =
            payload.data.into_iter().map(|item| item.embedding).collect();

        check_embedding_count(inputs.len(), &embeddings)?;
        Ok(embeddings)
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        "openai_compatible"
    }

    async fn complete(&self, input: &SynthesisInput) -> Result<ModelResponse, ProviderError> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let mut body = json!({
            "model": self.model,
            "messages": input.to_messages(self.options.system_prompt.as_deref()),
            "stream": false,
        });
        if let Some(obj) = body.as_object_mut() {
            if let Some(t) = self.options.temperature {
                obj.insert("temperature".to_string(), json!(t));
            }
            if let Some(n) = self.options.max_tokens {
                obj.insert("max_tokens".to_string(), json!(n));
            }
        }

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        let payload: Value = check_status(res)
            .await?
            .json()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let Some(choice) = payload["choices"].get(0) else {
            return Err(ProviderError::Decode("response has no choices".to_string()));
        };
        let content = choice["message"]["content"].as_str().unwrap_or_default();
        Ok(ModelResponse::from_content(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::RetrievalResult;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn input() -> SynthesisInput {
        SynthesisInput::new(
            "Who wrote it?",
            vec![RetrievalResult::new(
                "It was written by Somchai.",
                0.8,
                Some("book.txt".to_string()),
            )],
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn embeddings_are_reordered_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "list",
                "data": [
                    { "object": "embedding", "index": 1, "embedding": [0.0, 1.0] },
                    { "object": "embedding", "index": 0, "embedding": [1.0, 0.0] }
                ]
            })))
            .mount(&server)
            .await;

        let provider = OpenAiCompatibleProvider::new(
            &server.uri(),
            "text-embedding-3-small",
            Duration::from_secs(5),
            Some("sk-test"),
        )
        .expect("client");
        let vectors = provider
            .embed(&["first".to_string(), "second".to_string()])
            .await
            .expect("embed");
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn structured_completion_is_detected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({ "model": "local-model", "max_tokens": 256 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "index": 0,
                    "message": {
                        "role": "assistant",
                        "content": "{\"answer\": \"Somchai\", \"confidence\": 0.7}"
                    }
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAiCompatibleProvider::new(
            &server.uri(),
            "local-model",
            Duration::from_secs(5),
            None,
        )
        .expect("client")
            .with_options(ChatOptions {
                max_tokens: Some(256),
                ..ChatOptions::default()
            });
        let response = provider.complete(&input()).await.expect("complete");
        assert!(matches!(
            &response,
            ModelResponse::Structured { answer: Some(a), .. } if a == "Somchai"
        ));
    }

    #[tokio::test]
    async fn empty_choices_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let provider =
            OpenAiCompatibleProvider::new(&server.uri(), "m", Duration::from_secs(5), None)
                .expect("client");
        assert!(matches!(
            provider.complete(&input()).await,
            Err(ProviderError::Decode(_))
        ));
    }
}
