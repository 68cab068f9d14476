use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::chat::{ChatJob, OneshotReply};
use crate::core::errors::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub user_id: String,
    pub message: String,
}

/// Answers one message synchronously. If the client goes away the reply
/// receiver is dropped, which cancels the in-flight synthesis.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = payload.user_id.trim();
    let message = payload.message.trim();
    if user_id.is_empty() {
        return Err(ApiError::BadRequest("user_id must not be empty".to_string()));
    }
    if message.is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }

    let (reply, rx) = OneshotReply::channel();
    state
        .dispatcher
        .submit(ChatJob::new(user_id, message, Box::new(reply)))?;

    let wait = Duration::from_secs(state.settings.transport.chat_timeout_secs);
    match tokio::time::timeout(wait, rx).await {
        Ok(Ok(reply)) => Ok(Json(reply)),
        Ok(Err(_)) => Err(ApiError::Internal("no answer was produced".to_string())),
        Err(_) => Err(ApiError::Timeout(format!(
            "no answer within {} seconds",
            wait.as_secs()
        ))),
    }
}
