//! Request-level error taxonomy and its HTTP mapping.

use std::fmt::Display;

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::llm::ModelError;
use crate::store::{InvalidDocId, StoreError};

// ---

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid {0}")]
    InvalidId(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{context}: {source}")]
    Model {
        context: String,
        #[source]
        source: ModelError,
    },

    #[error("{context}: {source}")]
    Store {
        context: String,
        #[source]
        source: StoreError,
    },
}

impl AppError {
    pub fn not_found(what: impl Display) -> Self {
        AppError::NotFound(format!("{what} not found"))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidId(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Model { .. } | AppError::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Plain store access outside any workflow step.
impl From<StoreError> for AppError {
    fn from(source: StoreError) -> Self {
        AppError::Store {
            context: "Database operation failed".to_string(),
            source,
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

/// Attach a step description to component errors.
pub trait Context<T> {
    fn context(self, context: impl Display) -> Result<T, AppError>;
}

impl<T> Context<T> for Result<T, ModelError> {
    fn context(self, context: impl Display) -> Result<T, AppError> {
        self.map_err(|source| AppError::Model {
            context: context.to_string(),
            source,
        })
    }
}

impl<T> Context<T> for Result<T, StoreError> {
    fn context(self, context: impl Display) -> Result<T, AppError> {
        self.map_err(|source| AppError::Store {
            context: context.to_string(),
            source,
        })
    }
}

/// Parse a path id, naming the kind of id in the error.
pub fn parse_id<T>(raw: &str, kind: &str) -> Result<T, AppError>
where
    T: std::str::FromStr<Err = InvalidDocId>,
{
    raw.parse()
        .map_err(|_| AppError::InvalidId(format!("{kind} format")))
}

#[derive(Serialize)]
struct ErrorBody {
    status: u16,
    detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // ---
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::debug!("client error {}: {}", status.as_u16(), self);
        }

        let body = ErrorBody {
            status: status.as_u16(),
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
