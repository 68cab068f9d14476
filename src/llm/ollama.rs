use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::provider::{check_embedding_count, Embedder, LanguageModel};
use super::types::{ChatOptions, ModelResponse};
use super::{check_status, http_client, ProviderError};
use crate::rag::SynthesisInput;

/// Ollama's native REST API (`/api/embed`, `/api/chat`).
#[derive(Clone)]
pub struct OllamaProvider {
    base_url: String,
    model: String,
    options: ChatOptions,
    client: Client,
}

impl OllamaProvider {
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
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

#[async_trait]
impl Embedder for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/api/embed", self.base_url);
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
        let payload: EmbedResponse = check_status(res)
            .await?
            .json()
            .await
            .map_err(ProviderError::from_reqwest)?;

        check_embedding_count(inputs.len(), &payload.embeddings)?;
        Ok(payload.embeddings)
    }
}

#[async_trait]
impl LanguageModel for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, input: &SynthesisInput) -> Result<ModelResponse, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);

        let mut options = Map::new();
        if let Some(t) = self.options.temperature {
            options.insert("temperature".to_string(), json!(t));
        }
        if let Some(n) = self.options.max_tokens {
            options.insert("num_predict".to_string(), json!(n));
        }

        let mut body = json!({
            "model": self.model,
            "messages": input.to_messages(self.options.system_prompt.as_deref()),
            "stream": false,
        });
        if !options.is_empty() {
            body["options"] = Value::Object(options);
        }

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        let payload: ChatResponse = check_status(res)
            .await?
            .json()
            .await
            .map_err(ProviderError::from_reqwest)?;

        Ok(ModelResponse::from_content(&payload.message.content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::RetrievalResult;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> OllamaProvider {
        OllamaProvider::new(&server.uri(), "bge-m3:latest", Duration::from_secs(5), None)
            .expect("client")
    }

    fn input() -> SynthesisInput {
        SynthesisInput::new(
            "What is the capital?",
            vec![RetrievalResult::new("Bangkok is the capital.", 0.9, None)],
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn embed_posts_batch_and_returns_vectors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .and(body_partial_json(json!({ "model": "bge-m3:latest", "input": ["a", "b"] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "bge-m3:latest",
                "embeddings": [[0.1, 0.2], [0.3, 0.4]]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let vectors = provider(&server)
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .expect("embed");
        assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    }

    #[tokio::test]
    async fn embed_count_mismatch_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "embeddings": [[0.1]] })),
            )
            .mount(&server)
            .await;

        let err = provider(&server)
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .expect_err("one vector for two inputs");
        assert!(matches!(err, ProviderError::Decode(_)));
    }

    #[tokio::test]
    async fn http_failure_maps_to_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
            .mount(&server)
            .await;

        let err = provider(&server).embed_one("q").await.expect_err("500");
        match err {
            ProviderError::Status { status, body } => {
                assert_eq!(status, 500);
                assert!(body.contains("not loaded"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn chat_sends_grounded_messages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({ "stream": false, "options": { "temperature": 0.2 } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": { "role": "assistant", "content": "Bangkok." },
                "done": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let llm = provider(&server).with_options(ChatOptions {
            temperature: Some(0.2),
            ..ChatOptions::default()
        });
        let response = llm.complete(&input()).await.expect("complete");
        assert_eq!(response, ModelResponse::Text("Bangkok.".to_string()));

        let requests = server.received_requests().await.expect("recorded");
        let sent: Value = serde_json::from_slice(&requests[0].body).expect("json body");
        let messages = sent["messages"].as_array().expect("messages");
        assert_eq!(messages.first().map(|m| m["role"].clone()), Some(json!("system")));
        assert_eq!(
            messages.last().map(|m| m["content"].clone()),
            Some(json!("What is the capital?"))
        );
    }

    #[tokio::test]
    async fn unreachable_server_is_reported() {
        let llm = OllamaProvider::new("http://127.0.0.1:9", "m", Duration::from_secs(2), None)
            .expect("client");
        let err = llm.complete(&input()).await.expect_err("nothing listens on port 9");
        assert!(matches!(
            err,
            ProviderError::Unreachable(_) | ProviderError::Timeout(_)
        ));
    }
}
