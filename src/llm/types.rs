use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
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

/// Generation knobs shared by the chat providers.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Overrides the built-in grounding instructions.
    pub system_prompt: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

/// What a language model handed back.
///
/// Some models answer with a JSON object instead of prose; the synthesizer
/// is the only place that resolves either shape into text.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelResponse {
    Text(String),
    Structured {
        answer: Option<String>,
        metadata: Map<String, Value>,
    },
}

impl ModelResponse {
    /// Classifies raw completion content.
    pub fn from_content(content: &str) -> Self {
        let trimmed = content.trim();
        if trimmed.starts_with('{') {
            if let Ok(Value::Object(mut object)) = serde_json::from_str::<Value>(trimmed) {
                if let Some(answer) = object.remove("answer") {
                    let answer = match answer {
                        Value::String(s) => Some(s),
                        Value::Null => None,
                        other => Some(other.to_string()),
                    };
                    return ModelResponse::Structured {
                        answer,
                        metadata: object,
                    };
                }
            }
        }
        ModelResponse::Text(content.to_string())
    }

    /// Trimmed answer text, or `None` when there is nothing usable.
    pub fn into_text(self) -> Option<String> {
        let text = match self {
            ModelResponse::Text(text) => text,
            ModelResponse::Structured { answer, .. } => answer?,
        };
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}
