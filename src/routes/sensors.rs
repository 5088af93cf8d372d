use axum::{
    extract::State,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use tracing::info;

use super::extract::{ApiJson, ApiPath};
use super::AppState;
use crate::error::{parse_id, AppError};
use crate::models::{NewSensorLocation, SensorData, SensorLocation};
use crate::store::DocId;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/sensors/locations", post(create).get(list))
        .route("/sensors/locations/{sensor_id}", get(fetch))
        .route("/sensors/locations/{sensor_id}/update", put(update_readings))
        .route("/sensors/locations/{sensor_id}/current", get(current_readings))
}

#[derive(Serialize)]
struct SensorUpdateResponse {
    message: &'static str,
    sensors: SensorData,
}

async fn create(
    State(state): State<AppState>,
    ApiJson(new): ApiJson<NewSensorLocation>,
) -> Result<Json<SensorLocation>, AppError> {
    // ---
    if new.name.trim().is_empty() || new.location.trim().is_empty() {
        return Err(AppError::BadRequest(
            "Sensor name and location are required".to_string(),
        ));
    }
    let created = state.sensors.create(new).await?;
    info!(sensor_id = %created.sensor_id, location = %created.doc.location, "sensor location created");
    Ok(Json(created))
}

async fn list(State(state): State<AppState>) -> Result<Json<Vec<SensorLocation>>, AppError> {
    Ok(Json(state.sensors.list().await?))
}

async fn load(state: &AppState, sensor_id: &str) -> Result<(DocId, SensorLocation), AppError> {
    let id: DocId = parse_id(sensor_id, "sensor_id")?;
    let sensor = state
        .sensors
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found("Sensor location"))?;
    Ok((id, sensor))
}

async fn fetch(
    State(state): State<AppState>,
    ApiPath(sensor_id): ApiPath<String>,
) -> Result<Json<SensorLocation>, AppError> {
    let (_, sensor) = load(&state, &sensor_id).await?;
    Ok(Json(sensor))
}

/// Overwrites the snapshot; no other workflow runs.
async fn update_readings(
    State(state): State<AppState>,
    ApiPath(sensor_id): ApiPath<String>,
    ApiJson(sensors): ApiJson<SensorData>,
) -> Result<Json<SensorUpdateResponse>, AppError> {
    // ---
    let id: DocId = parse_id(&sensor_id, "sensor_id")?;
    if !state.sensors.replace_snapshot(id, sensors).await? {
        return Err(AppError::not_found("Sensor location"));
    }
    info!(%sensor_id, "sensor readings updated");
    Ok(Json(SensorUpdateResponse {
        message: "Sensor data updated successfully",
        sensors,
    }))
}

async fn current_readings(
    State(state): State<AppState>,
    ApiPath(sensor_id): ApiPath<String>,
) -> Result<Json<SensorData>, AppError> {
    let (_, sensor) = load(&state, &sensor_id).await?;
    Ok(Json(sensor.doc.snapshot_or_default()))
}
