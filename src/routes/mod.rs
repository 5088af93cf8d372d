//! Routes gateway.
//!
//! Each sibling module owns one resource and exports a `router()` over the
//! shared [`AppState`]. Handlers stay thin: they extract, delegate to a
//! repository or the [`Orchestrator`], and let [`crate::error::AppError`]
//! produce error responses.

use std::sync::Arc;

use axum::Router;

use crate::llm::LanguageModel;
use crate::orchestrator::Orchestrator;
use crate::repos::{SensorRepository, UserRepository};
use crate::store::SharedStore;
use crate::thumbnails::ThumbnailLookup;

mod chat;
mod extract;
mod health;
mod recommendations;
mod sensors;
mod sessions;
mod users;

// ---

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub sensors: SensorRepository,
    pub users: UserRepository,
}

impl AppState {
    pub fn new(
        store: SharedStore,
        model: Arc<dyn LanguageModel>,
        thumbnails: Arc<dyn ThumbnailLookup>,
        start_month: Option<u32>,
    ) -> Self {
        // ---
        Self {
            orchestrator: Arc::new(Orchestrator::new(store.clone(), model, thumbnails, start_month)),
            sensors: SensorRepository::new(store.clone()),
            users: UserRepository::new(store),
        }
    }
}

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(sensors::router())
        .merge(users::router())
        .merge(recommendations::router())
        .merge(sessions::router())
        .merge(chat::router())
        .merge(health::router())
        .with_state(state)
}
