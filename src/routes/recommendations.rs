//! Sensor-scoped recommendation endpoints: context analysis, generation,
//! the hardware readings flow, and per-sensor history.

use axum::{
    extract::State,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::info;

use super::extract::{ApiJson, ApiPath, ApiQuery};
use super::AppState;
use crate::error::AppError;
use crate::models::SensorData;
use crate::orchestrator::{
    ContextAnalysisView, DeletionReport, GeneratedRecommendations, HardwareRecommendations,
    RecommendationRequest, SessionView,
};

// ---

const DEFAULT_HISTORY_LIMIT: usize = 10;

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/recommendations/generate", post(generate))
        .route(
            "/recommendations/hardware/{sensor_id}/readings",
            post(hardware_readings),
        )
        .route(
            "/recommendations/{sensor_id}/context-analysis",
            get(context_analysis),
        )
        .route("/recommendations/{sensor_id}/latest", get(latest))
        .route("/recommendations/{sensor_id}/history", get(history))
        .route("/recommendations/{sensor_id}/data", delete(delete_data))
}

#[derive(Debug, Deserialize)]
struct ContextQuery {
    #[serde(default)]
    refresh: bool,
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    user_id: Option<String>,
    limit: Option<usize>,
}

async fn context_analysis(
    State(state): State<AppState>,
    ApiPath(sensor_id): ApiPath<String>,
    ApiQuery(params): ApiQuery<ContextQuery>,
) -> Result<Json<ContextAnalysisView>, AppError> {
    // ---
    info!(%sensor_id, refresh = params.refresh, "GET context analysis");
    let view = state
        .orchestrator
        .context_analysis(&sensor_id, params.user_id, params.refresh)
        .await?;
    Ok(Json(view))
}

async fn generate(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<RecommendationRequest>,
) -> Result<Json<GeneratedRecommendations>, AppError> {
    Ok(Json(state.orchestrator.generate(request).await?))
}

async fn hardware_readings(
    State(state): State<AppState>,
    ApiPath(sensor_id): ApiPath<String>,
    ApiJson(readings): ApiJson<SensorData>,
) -> Result<Json<HardwareRecommendations>, AppError> {
    let result = state
        .orchestrator
        .hardware_readings(&sensor_id, readings)
        .await?;
    Ok(Json(result))
}

async fn latest(
    State(state): State<AppState>,
    ApiPath(sensor_id): ApiPath<String>,
    ApiQuery(params): ApiQuery<UserQuery>,
) -> Result<Json<SessionView>, AppError> {
    let session = state
        .orchestrator
        .latest_session(&sensor_id, params.user_id)
        .await?;
    Ok(Json(session))
}

async fn history(
    State(state): State<AppState>,
    ApiPath(sensor_id): ApiPath<String>,
    ApiQuery(params): ApiQuery<HistoryQuery>,
) -> Result<Json<Vec<SessionView>>, AppError> {
    // ---
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).max(1);
    let sessions = state
        .orchestrator
        .session_history(&sensor_id, params.user_id, Some(limit))
        .await?;
    Ok(Json(sessions))
}

async fn delete_data(
    State(state): State<AppState>,
    ApiPath(sensor_id): ApiPath<String>,
    ApiQuery(params): ApiQuery<UserQuery>,
) -> Result<Json<DeletionReport>, AppError> {
    let report = state
        .orchestrator
        .delete_sensor_data(&sensor_id, params.user_id)
        .await?;
    Ok(Json(report))
}
