use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::chat::{ChatJob, WebhookReply};
use crate::core::errors::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub events: Vec<WebhookEvent>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub user_id: Option<String>,
    pub reply_token: Option<String>,
    pub text: Option<String>,
}

/// Acknowledges immediately; answers are pushed to the reply endpoint later.
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<WebhookPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let transport = &state.settings.transport;
    let Some(reply_url) = transport.reply_url.as_deref() else {
        return Err(ApiError::ServiceUnavailable(
            "transport.reply_url is not configured".to_string(),
        ));
    };
    let ttl = Duration::from_secs(transport.reply_ttl_secs);

    for event in payload.events {
        let (Some(user_id), Some(reply_token), Some(text)) =
            (event.user_id, event.reply_token, event.text)
        else {
            tracing::debug!("Ignoring incomplete '{}' event", event.kind);
            continue;
        };
        if event.kind != "message" || text.trim().is_empty() {
            tracing::debug!("Ignoring '{}' event from '{}'", event.kind, user_id);
            continue;
        }

        let reply = WebhookReply::new(
            state.reply_client.clone(),
            reply_url,
            transport.reply_access_token.clone(),
            reply_token,
            ttl,
        );
        if let Err(e) = state
            .dispatcher
            .submit(ChatJob::new(user_id.clone(), text.trim(), Box::new(reply)))
        {
            tracing::warn!("Dropped webhook message from '{}': {}", user_id, e);
        }
    }

    Ok(Json(json!({"message": "OK"})))
}
