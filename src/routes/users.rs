use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};

use super::extract::{ApiJson, ApiPath};
use super::AppState;
use crate::error::AppError;
use crate::models::{NewUser, User};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/users/register", post(register))
        .route("/users/{user_id}", get(fetch))
}

/// Registering the same first and last name again returns the existing user.
async fn register(
    State(state): State<AppState>,
    ApiJson(new): ApiJson<NewUser>,
) -> Result<Json<User>, AppError> {
    // ---
    if new.first_name.trim().is_empty() || new.last_name.trim().is_empty() {
        return Err(AppError::BadRequest(
            "First and last name are required".to_string(),
        ));
    }
    let user = state
        .users
        .register(NewUser {
            first_name: new.first_name.trim().to_string(),
            last_name: new.last_name.trim().to_string(),
        })
        .await?;
    Ok(Json(user))
}

async fn fetch(
    State(state): State<AppState>,
    ApiPath(user_id): ApiPath<String>,
) -> Result<Json<User>, AppError> {
    state
        .users
        .get_by_user_id(&user_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("User"))
}
