use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// AppError
///
/// The single failure type shared by services, repositories and handlers. Every
/// variant is scoped to the request that produced it; none is fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Malformed or reserved input, or a uniqueness clash on a user/catalog field.
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    #[error("{0}")]
    NotFound(String),

    /// The confirmation code did not match or has expired.
    #[error("invalid or expired confirmation code")]
    Authentication,

    /// No usable bearer token on a request that needs one.
    #[error("authentication credentials were not provided or are invalid")]
    Unauthenticated,

    #[error("you do not have permission to perform this action")]
    Forbidden,

    #[error("{0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Shorthand for a field-level validation failure.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(what: &str) -> Self {
        Self::NotFound(format!("{what} not found"))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } | Self::Authentication => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            // Field-level detail, keyed by the offending field.
            Self::Validation { field, message } => {
                let mut errors = serde_json::Map::new();
                errors.insert(field.clone(), json!([message]));
                serde_json::Value::Object(errors)
            }
            Self::Database(e) => {
                tracing::error!("database error: {:?}", e);
                json!({ "detail": "internal server error" })
            }
            Self::Internal(e) => {
                tracing::error!("internal error: {}", e);
                json!({ "detail": "internal server error" })
            }
            other => json!({ "detail": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
