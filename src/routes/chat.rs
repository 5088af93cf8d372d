use axum::{extract::State, routing::post, Json, Router};

use super::extract::ApiJson;
use super::AppState;
use crate::error::AppError;
use crate::orchestrator::{ChatOutcome, ChatRequest};

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/chat", post(chat))
}

/// Missing context or recommendations answer 200 with `success: false`.
async fn chat(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ChatRequest>,
) -> Result<Json<ChatOutcome>, AppError> {
    Ok(Json(state.orchestrator.chat(request).await?))
}
