//! Error responses for the HTTP API.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use enqueuer_core::DispatchError;
use serde::Serialize;

/// Anything `/enqueue` can answer with other than success.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Body was not a JSON object with the expected fields.
    #[error("invalid request body: {0}")]
    InvalidRequest(String),
    /// The request outlived the listener's request timeout.
    #[error("request timed out")]
    RequestTimeout,
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    ok: bool,
    error: ErrorDetail<'a>,
}

#[derive(Debug, Serialize)]
struct ErrorDetail<'a> {
    kind: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    task: Option<&'a str>,
}

impl ApiError {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::RequestTimeout => "request_timeout",
            Self::Dispatch(e) => e.kind(),
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::RequestTimeout => StatusCode::SERVICE_UNAVAILABLE,
            Self::Dispatch(e) => match e {
                DispatchError::UnknownService { .. }
                | DispatchError::MalformedPayload { .. }
                | DispatchError::InvalidSchedule { .. }
                | DispatchError::InvalidIdempotencyKey { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                DispatchError::DuplicateTask { .. } => StatusCode::CONFLICT,
                DispatchError::DispatchPermissionDenied { .. }
                | DispatchError::QueueInternalError { .. } => StatusCode::BAD_GATEWAY,
                DispatchError::QueueUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (field, task) = match &self {
            Self::InvalidRequest(_) | Self::RequestTimeout => (None, None),
            Self::Dispatch(e) => (
                e.field(),
                match e {
                    DispatchError::DuplicateTask { task } => Some(task.as_str()),
                    _ => None,
                },
            ),
        };
        let body = ErrorBody {
            ok: false,
            error: ErrorDetail {
                kind: self.kind(),
                message: self.to_string(),
                field,
                task,
            },
        };
        (self.status(), Json(body)).into_response()
    }
}
