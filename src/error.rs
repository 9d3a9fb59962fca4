use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Error surfaced to API callers. Dispatch-time validation failures are all
/// 403 with a plain `{ "message": ... }` body; `code` is kept for logs and
/// metrics labels only.
#[derive(Debug, Clone)]
pub struct AppError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn invalid_api_key() -> Self {
        Self::new(StatusCode::FORBIDDEN, "invalid_api_key", "invalid api key")
    }

    pub fn insufficient_credits() -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            "insufficient_credits",
            "insufficient credits",
        )
    }

    pub fn unknown_model(slug: &str) -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            "unknown_model",
            format!("unknown model: {slug}"),
        )
    }

    pub fn no_provider_configured(slug: &str) -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            "no_provider_configured",
            format!("no provider configured for model: {slug}"),
        )
    }

    pub fn provider_unavailable(provider: &str) -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            "provider_unavailable",
            format!("no adapter registered for provider: {provider}"),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            message: self.message,
        };
        (self.status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
