use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let collection = &state.settings.index.collection;
    let points = match state.index.count(collection).await {
        Ok(count) => Some(count),
        Err(e) => {
            tracing::warn!("Health check could not count '{}': {}", collection, e);
            None
        }
    };

    Json(json!({
        "status": "ok",
        "index": state.index.name(),
        "collection": collection,
        "points": points,
        "active_conversations": state.dispatcher.active_identities(),
    }))
}
