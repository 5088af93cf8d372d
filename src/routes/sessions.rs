use axum::{
    extract::State,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;

use super::extract::{ApiJson, ApiPath, ApiQuery};
use super::AppState;
use crate::error::AppError;
use crate::orchestrator::{FilterRequest, FilteredView, PlantedView, SessionView};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/recommendations/sessions/{session_id}", get(session))
        .route(
            "/recommendations/sessions/{session_id}/crops/{index}/planted",
            patch(set_planted),
        )
        .route("/recommendations/sessions/{session_id}/filter", post(filter))
        .route("/recommendations/sessions/{session_id}/filtered", get(filtered_for_session))
        .route("/recommendations/filtered/{filter_id}", get(filtered))
}

/// `?planted=true|false` sets the flag; without it the flag is flipped.
#[derive(Debug, Deserialize)]
struct PlantedQuery {
    planted: Option<bool>,
}

async fn session(
    State(state): State<AppState>,
    ApiPath(session_id): ApiPath<String>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(state.orchestrator.session(&session_id).await?))
}

async fn set_planted(
    State(state): State<AppState>,
    ApiPath((session_id, index)): ApiPath<(String, usize)>,
    ApiQuery(params): ApiQuery<PlantedQuery>,
) -> Result<Json<PlantedView>, AppError> {
    let view = state
        .orchestrator
        .set_planted(&session_id, index, params.planted)
        .await?;
    Ok(Json(view))
}

async fn filter(
    State(state): State<AppState>,
    ApiPath(session_id): ApiPath<String>,
    ApiJson(request): ApiJson<FilterRequest>,
) -> Result<Json<FilteredView>, AppError> {
    Ok(Json(state.orchestrator.filter_session(&session_id, request).await?))
}

async fn filtered_for_session(
    State(state): State<AppState>,
    ApiPath(session_id): ApiPath<String>,
) -> Result<Json<Vec<FilteredView>>, AppError> {
    Ok(Json(state.orchestrator.filtered_for_session(&session_id).await?))
}

async fn filtered(
    State(state): State<AppState>,
    ApiPath(filter_id): ApiPath<String>,
) -> Result<Json<FilteredView>, AppError> {
    Ok(Json(state.orchestrator.filtered(&filter_id).await?))
}
