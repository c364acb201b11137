use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub code: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{1}")]
    Unauthorized(&'static str, String),
    #[error("{1}")]
    Forbidden(&'static str, String),
    #[error("{1}")]
    BadRequest(&'static str, String),
    #[error("{1}")]
    NotFound(&'static str, String),
    #[error("{1}")]
    Conflict(&'static str, String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn invalid_credentials() -> Self {
        ApiError::Unauthorized("INVALID_CREDENTIALS", "Email or password is incorrect".into())
    }

    pub fn token_missing() -> Self {
        ApiError::Unauthorized("TOKEN_MISSING", "Access token required".into())
    }

    pub fn token_invalid() -> Self {
        ApiError::Forbidden("TOKEN_INVALID", "Invalid or expired token".into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden("FORBIDDEN", message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::BadRequest("VALIDATION_ERROR", message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound("NOT_FOUND", message.into())
    }

    pub fn email_taken() -> Self {
        ApiError::BadRequest("EMAIL_TAKEN", "This email is already in use".into())
    }

    pub fn slot_unavailable() -> Self {
        ApiError::BadRequest("SLOT_UNAVAILABLE", "This time slot is not available".into())
    }

    /// A concurrent transaction won; the request may be retried as is.
    pub fn concurrent_update() -> Self {
        ApiError::Conflict(
            "CONCURRENT_UPDATE",
            "The record was modified concurrently, please retry".into(),
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(..) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(..) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(..) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(..) => StatusCode::NOT_FOUND,
            ApiError::Conflict(..) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn to_error_response(code: &str, message: &str) -> Json<ErrorResponse> {
        Json(ErrorResponse {
            success: false,
            code: code.to_string(),
            message: message.to_string(),
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            ApiError::Unauthorized(code, msg)
            | ApiError::Forbidden(code, msg)
            | ApiError::BadRequest(code, msg)
            | ApiError::NotFound(code, msg)
            | ApiError::Conflict(code, msg) => ApiError::to_error_response(code, msg),
            ApiError::Internal(detail) => {
                // Details stay in the log; clients get a generic message.
                tracing::error!(error = %detail, "request failed");
                ApiError::to_error_response("INTERNAL", "Internal server error")
            }
        };
        (status, body).into_response()
    }
}

pub fn db_error(e: sqlx::Error) -> ApiError {
    ApiError::Internal(format!("db error: {e}"))
}

fn sqlstate(e: &sqlx::Error) -> Option<String> {
    e.as_database_error()
        .and_then(|d| d.code())
        .map(|c| c.into_owned())
}

/// Maps the database errors that mean "someone else already holds this slot".
/// 40001 is a serialization failure, 23P01 an exclusion constraint violation.
/// Only use this where the write actually claims a slot.
pub fn booking_db_error(e: sqlx::Error) -> ApiError {
    match sqlstate(&e).as_deref() {
        Some("40001") | Some("23P01") => ApiError::slot_unavailable(),
        _ => db_error(e),
    }
}

/// Serializable transactions that do not claim a slot: a serialization
/// failure is a retryable 409, everything else is internal.
pub fn tx_db_error(e: sqlx::Error) -> ApiError {
    match sqlstate(&e).as_deref() {
        Some("40001") => ApiError::concurrent_update(),
        _ => db_error(e),
    }
}

/// Unique violations on `users.email` become a 400 instead of a 500.
pub fn user_write_error(e: sqlx::Error) -> ApiError {
    let unique = e
        .as_database_error()
        .map(|d| d.is_unique_violation())
        .unwrap_or(false);
    if unique {
        ApiError::email_taken()
    } else {
        db_error(e)
    }
}
