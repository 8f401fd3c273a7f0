use axum::response::{IntoResponse, Response};
use axum::{http::StatusCode, Json};
use serde_json::json;
use thiserror::Error;

use crate::recurrence::RecurrenceError;

/// Failures reported by a backend adapter.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("malformed row: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unknown column {column} on {table}")]
    UnknownColumn { table: &'static str, column: String },

    #[error("column {column} on {table} cannot hold {found}")]
    TypeMismatch {
        table: &'static str,
        column: &'static str,
        found: &'static str,
    },

    #[error("unknown procedure {0}")]
    UnknownProcedure(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("no row with id {id} in {table}")]
    RowNotFound { table: &'static str, id: String },

    #[error("new row violates row-level policy for {0}")]
    Policy(&'static str),

    #[error("no authenticated session")]
    Unauthenticated,

    #[error("database connection poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("User not authenticated")]
    Auth,

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("Permission denied")]
    Forbidden,

    #[error("{0}")]
    Backend(String),

    #[error("Attachment storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl AppError {
    pub fn not_found(what: impl Into<String>) -> Self {
        AppError::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Auth => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Backend(_) | AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unauthenticated => AppError::Auth,
            BackendError::Policy(_) => AppError::Forbidden,
            other => AppError::Backend(other.to_string()),
        }
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Backend(err.to_string())
    }
}

impl From<RecurrenceError> for AppError {
    fn from(err: RecurrenceError) -> Self {
        AppError::Validation(err.to_string())
    }
}
