//! `piliseed`: sensor-driven crop recommendation backend.
//!
//! Library gateway (EMBP). The binary in `main.rs` and the integration tests
//! build the service from what is exported here; sibling modules reach each
//! other through `crate::` paths only.

pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod prompts;
pub mod repos;
pub mod routes;
pub mod schema;
pub mod store;
pub mod thumbnails;

pub use config::Config;
pub use error::AppError;
pub use routes::{router, AppState};
