use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced out of the domain layer. Route handlers map these
/// straight to HTTP responses via `IntoResponse`; background tasks
/// (the scheduled-task drainer, the admission loop) use `is_transient`
/// to decide whether a failed attempt is worth a retry.
#[derive(Error, Debug)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not authenticated: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("gone: {0}")]
    Gone(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("database error: {0}")]
    DbError(#[from] sqlx::Error),

    #[error("database error: {0}")]
    DbWriteError(#[from] crate::infra::db::DatabaseWriteError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a caller should expect a retry of the same operation to
    /// plausibly succeed (lock contention, a transient database error) as
    /// opposed to a terminal outcome (bad input, a business-rule conflict).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::DbError(_) | Error::DbWriteError(_) | Error::Internal(_)
        )
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) | Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Gone(_) => StatusCode::GONE,
            Error::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::DbError(_) | Error::DbWriteError(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
