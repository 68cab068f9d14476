use std::path::PathBuf;

use thiserror::Error;

use super::settings::{IndexBackend, Settings};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("invalid configuration value for '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: &str, reason: impl Into<String>) -> SettingsError {
    SettingsError::Invalid {
        field: field.to_string(),
        reason: reason.into(),
    }
}

pub fn validate_settings(settings: &Settings) -> Result<(), SettingsError> {
    settings
        .chunking
        .chunking_config()
        .validate()
        .map_err(|e| invalid("chunking", e.to_string()))?;
    validate_range("chunking.embed_batch_size", settings.chunking.embed_batch_size, 1, 2048)?;

    validate_non_empty("index.collection", &settings.index.collection)?;
    validate_range("index.dims", settings.index.dims, 1, 65_536)?;
    if settings.index.backend == IndexBackend::Qdrant {
        validate_http_url("index.qdrant_url", &settings.index.qdrant_url)?;
    }

    validate_http_url("embedder.base_url", &settings.embedder.base_url)?;
    validate_non_empty("embedder.model", &settings.embedder.model)?;
    validate_http_url("llm.base_url", &settings.llm.base_url)?;
    validate_non_empty("llm.model", &settings.llm.model)?;
    if let Some(temperature) = settings.llm.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(invalid("llm.temperature", "must be between 0.0 and 2.0"));
        }
    }

    validate_range("retrieval.top_k", settings.retrieval.top_k, 1, 100)?;
    validate_range(
        "conversation.history_limit",
        settings.conversation.history_limit,
        0,
        1_000,
    )?;
    validate_range("dispatch.max_concurrent", settings.dispatch.max_concurrent, 1, 1_024)?;
    validate_range("dispatch.queue_capacity", settings.dispatch.queue_capacity, 1, 10_000)?;

    for (field, secs) in [
        ("index.timeout_secs", settings.index.timeout_secs),
        ("embedder.timeout_secs", settings.embedder.timeout_secs),
        ("llm.timeout_secs", settings.llm.timeout_secs),
        ("retrieval.embed_timeout_secs", settings.retrieval.embed_timeout_secs),
        ("dispatch.idle_timeout_secs", settings.dispatch.idle_timeout_secs),
        ("transport.reply_ttl_secs", settings.transport.reply_ttl_secs),
        ("transport.chat_timeout_secs", settings.transport.chat_timeout_secs),
    ] {
        validate_range(field, secs as usize, 1, 86_400)?;
    }

    if let Some(url) = &settings.transport.reply_url {
        validate_http_url("transport.reply_url", url)?;
    }

    validate_non_empty("messages.no_evidence", &settings.messages.no_evidence)?;
    validate_non_empty("messages.unusable_answer", &settings.messages.unusable_answer)?;
    validate_non_empty("messages.apology", &settings.messages.apology)?;

    Ok(())
}

fn validate_range(field: &str, value: usize, min: usize, max: usize) -> Result<(), SettingsError> {
    if value < min || value > max {
        return Err(invalid(
            field,
            format!("must be between {} and {} (got {})", min, max, value),
        ));
    }
    Ok(())
}

fn validate_non_empty(field: &str, value: &str) -> Result<(), SettingsError> {
    if value.trim().is_empty() {
        return Err(invalid(field, "must not be empty"));
    }
    Ok(())
}

fn validate_http_url(field: &str, value: &str) -> Result<(), SettingsError> {
    if !(value.starts_with("http://") || value.starts_with("https://")) {
        return Err(invalid(field, "must be an http(s) URL"));
    }
    Ok(())
}
