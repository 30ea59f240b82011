//! API error handling.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::CoreError;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

/// API error type that converts to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

/// HTTP status for a core error.
pub fn status_for(err: &CoreError) -> StatusCode {
    match err {
        CoreError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        CoreError::Computation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CoreError::WorkerExited { .. } | CoreError::MalformedWorkerOutput(_) => StatusCode::BAD_GATEWAY,
        CoreError::DispatchTimeout { .. }
        | CoreError::ShuttingDown
        | CoreError::WorkerInitTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::CallTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        CoreError::SpawnFailure { .. } | CoreError::Io(_) | CoreError::Json(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            tracing::warn!(code = err.code(), error = %err, "Request failed");
        }
        ApiError::new(status, err.code(), err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}
