//! Shared API types: the JSON error envelope used by most endpoints, and the
//! plain-text success/failure convention §7 carries for the handful of
//! synchronous ticket endpoints (`/create_jira_ticket`, `/jira_comment`,
//! `/jira_formatted_list/<id>`).

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Standard JSON API error response, grounded on the teacher's
/// `api/types.rs::ApiError` (constructors + `IntoResponse`), trimmed of the
/// `utoipa`/`validator` integration this project doesn't depend on.
#[derive(Debug)]
pub enum ApiError {
    BadRequest { code: String, message: String },
    NotFound { code: String, message: String },
    Conflict { code: String, message: String },
    ServiceUnavailable { message: String },
    Internal { message: String },
}

impl ApiError {
    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BadRequest { code: code.into(), message: message.into() }
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotFound { code: code.into(), message: message.into() }
    }

    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict { code: code.into(), message: message.into() }
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, code, message) = match self {
            Self::BadRequest { code, message } => (StatusCode::BAD_REQUEST, "bad_request", code, message),
            Self::NotFound { code, message } => (StatusCode::NOT_FOUND, "not_found", code, message),
            Self::Conflict { code, message } => (StatusCode::CONFLICT, "conflict", code, message),
            Self::ServiceUnavailable { message } => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", "SERVICE_UNAVAILABLE".to_string(), message)
            }
            Self::Internal { message } => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "INTERNAL".to_string(), message),
        };
        (status, Json(serde_json::json!({"error": error_type, "code": code, "message": message}))).into_response()
    }
}

/// A plain-text human-readable message, the success shape for
/// `/create_jira_ticket` and `/jira_comment` (§6, §7 "Synchronous endpoints
/// return a plain-text human-readable message on success").
pub struct PlainText(pub String);

impl IntoResponse for PlainText {
    fn into_response(self) -> Response {
        (StatusCode::OK, self.0).into_response()
    }
}

/// A bad-input rejection in the same plain-text convention, "a matching 4xx
/// with a short reason" (§7).
pub struct PlainTextError(pub StatusCode, pub String);

impl IntoResponse for PlainTextError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}
