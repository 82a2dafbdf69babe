//! Typed error kinds (spec.md §7) mapped to HTTP status codes.
//!
//! Domain code returns `AppError`; the CLI boundary and background tasks use
//! `anyhow::Result`, the same split the teacher uses throughout
//! `crates/bridge` (`thiserror` types inside, `anyhow::Context` at the edges).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("malformed request body: {0}")]
    Decoding(String),

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("upstream call failed: {0}")]
    Upstream(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] anyhow::Error),

    #[error("not found")]
    NotFound,

    #[error("migration {0} is dirty; refusing to start")]
    DirtyMigration(i32),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Authentication(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::Decoding(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::MethodNotAllowed => {
                (StatusCode::METHOD_NOT_ALLOWED, self.to_string())
            }
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::Persistence(err) => {
                tracing::error!(error = %err, "persistence error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
            AppError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::DirtyMigration(v) => {
                tracing::error!(version = v, "dirty migration, refusing to serve");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
        };

        let body = Json(json!({ "status": status.as_u16(), "message": message }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
