//! Problem Details (RFC 7807) responses for pipeline errors.

use crate::errors::Error;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

/// A pipeline error on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl ApiError {
    /// HTTP status for the wrapped error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            Error::InvalidState { .. } => StatusCode::CONFLICT,
            Error::InvalidSelection { .. }
            | Error::InvalidToken { .. }
            | Error::InvalidAddress { .. } => StatusCode::BAD_REQUEST,
            Error::RuleNotFound { .. }
            | Error::ExecutionNotFound { .. }
            | Error::OrderNotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    problem_type: &'static str,
    title: String,
    status: u16,
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        let body = ProblemDetails {
            problem_type: "about:blank",
            title: status.canonical_reason().unwrap_or("Error").to_string(),
            status: status.as_u16(),
            detail: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
