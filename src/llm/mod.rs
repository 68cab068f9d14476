//! External inference providers: embedding models and chat language models.

pub mod ollama;
pub mod openai;
pub mod provider;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use thiserror::Error;

use crate::core::config::{EmbedderSettings, LlmSettings, ProviderKind};

pub use ollama::OllamaProvider;
pub use openai::OpenAiCompatibleProvider;
pub use provider::{Embedder, LanguageModel};
pub use types::{ChatMessage, ChatOptions, ModelResponse, Role};

/// Failure talking to an embedding or language-model endpoint.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider unreachable: {0}")]
    Unreachable(String),
    #[error("provider timed out: {0}")]
    Timeout(String),
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(err.to_string())
        } else if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else {
            ProviderError::Unreachable(err.to_string())
        }
    }
}

/// Returns the response untouched on 2xx, otherwise a `Status` error with the body.
pub(crate) async fn check_status(
    res: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    Err(ProviderError::Status {
        status: status.as_u16(),
        body,
    })
}

pub(crate) fn http_client(
    timeout: Duration,
    api_key: Option<&str>,
) -> Result<Client, ProviderError> {
    let mut headers = HeaderMap::new();
    if let Some(key) = api_key.map(str::trim).filter(|k| !k.is_empty()) {
        let value = HeaderValue::from_str(&format!("Bearer {}", key))
            .map_err(|e| ProviderError::Unreachable(format!("invalid API key header: {}", e)))?;
        headers.insert(AUTHORIZATION, value);
    }
    Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .build()
        .map_err(ProviderError::from_reqwest)
}

pub fn build_embedder(settings: &EmbedderSettings) -> Result<Arc<dyn Embedder>, ProviderError> {
    let timeout = Duration::from_secs(settings.timeout_secs);
    let api_key = settings.api_key.as_deref();
    Ok(match settings.provider {
        ProviderKind::Ollama => Arc::new(OllamaProvider::new(
            &settings.base_url,
            &settings.model,
            timeout,
            api_key,
        )?),
        ProviderKind::OpenaiCompatible => Arc::new(OpenAiCompatibleProvider::new(
            &settings.base_url,
            &settings.model,
            timeout,
            api_key,
        )?),
    })
}

pub fn build_language_model(
    settings: &LlmSettings,
) -> Result<Arc<dyn LanguageModel>, ProviderError> {
    let timeout = Duration::from_secs(settings.timeout_secs);
    let api_key = settings.api_key.as_deref();
    let options = ChatOptions {
        system_prompt: settings.system_prompt.clone(),
        temperature: settings.temperature,
        max_tokens: settings.max_tokens,
    };
    Ok(match settings.provider {
        ProviderKind::Ollama => Arc::new(
            OllamaProvider::new(&settings.base_url, &settings.model, timeout, api_key)?
                .with_options(options),
        ),
        ProviderKind::OpenaiCompatible => Arc::new(
            OpenAiCompatibleProvider::new(&settings.base_url, &settings.model, timeout, api_key)?
                .with_options(options),
        ),
    })
}
