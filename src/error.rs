use std::collections::BTreeMap;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;
use utoipa::ToSchema;

/// FieldErrors
///
/// Field-level validation messages keyed by the offending input field.
/// Serialized as `{"title": ["..."], "author": ["..."]}` so clients can show them inline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct FieldErrors(pub BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }
}

impl From<validator::ValidationErrors> for FieldErrors {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut out = FieldErrors::new();
        for (field, errs) in errors.field_errors() {
            for err in errs.iter() {
                let message = err
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Invalid value ({}).", err.code));
                out.add(&field.to_string(), message);
            }
        }
        out
    }
}

/// RepositoryError
///
/// Failures raised by the persistence layer. Handlers never see raw driver errors;
/// they go through the `From<RepositoryError> for AppError` mapping below.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0} already exists")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type RepoResult<T> = Result<T, RepositoryError>;

/// AppError
///
/// The HTTP-facing error taxonomy. Every variant maps to exactly one status code.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("authentication required")]
    Unauthenticated,

    /// The inner string is only logged; the client receives a generic message.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed")]
    Validation(FieldErrors),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// Persistence failure. Logged in full, reported generically.
    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict(what) => AppError::Conflict(format!("{what} already exists")),
            RepositoryError::NotFound(what) => AppError::NotFound(what),
            RepositoryError::Database(e) => AppError::Integrity(e.to_string()),
            RepositoryError::Corrupt(msg) => AppError::Integrity(msg),
        }
    }
}

impl From<FieldErrors> for AppError {
    fn from(errors: FieldErrors) -> Self {
        AppError::Validation(errors)
    }
}

/// ErrorResponse
///
/// JSON body returned for every failed request.
#[derive(Debug, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<FieldErrors>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message, errors) = match self {
            AppError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                "Authentication credentials were not provided or are invalid.".to_string(),
                None,
            ),
            AppError::Forbidden(reason) => {
                tracing::warn!(%reason, "request forbidden");
                (
                    StatusCode::FORBIDDEN,
                    "forbidden",
                    "You do not have permission to perform this action.".to_string(),
                    None,
                )
            }
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "not_found",
                format!("{what} not found"),
                None,
            ),
            AppError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                "Please correct the errors below.".to_string(),
                Some(errors),
            ),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg, None),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg, None),
            AppError::Integrity(detail) => {
                tracing::error!(%detail, "persistence failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "integrity_error",
                    "An error occurred while saving your changes.".to_string(),
                    None,
                )
            }
            AppError::Internal(detail) => {
                tracing::error!(%detail, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                    None,
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error.to_string(),
            message,
            errors,
        });

        (status, body).into_response()
    }
}
