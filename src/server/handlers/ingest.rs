use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::core::errors::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub source_id: String,
    pub text: String,
}

pub async fn ingest(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<IngestRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.source_id.trim().is_empty() {
        return Err(ApiError::BadRequest("source_id must not be empty".to_string()));
    }
    let report = state
        .ingestor
        .ingest_text(payload.source_id.trim(), &payload.text)
        .await?;
    Ok(Json(report))
}
