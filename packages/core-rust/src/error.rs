//! Error taxonomy for the dispatch pipeline.
//!
//! [`DispatchError`] is what callers see. Validation and queue failures are
//! produced by their own components ([`ValidationError`], [`QueueError`]) and
//! converted at the pipeline boundary.

use crate::naming::TaskIdentity;

/// Errors raised while building the service registry at startup.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid descriptor for service '{service}': {reason}")]
    InvalidDescriptor { service: String, reason: String },
    #[error("service '{0}' registered more than once")]
    DuplicateService(String),
    #[error("no services configured")]
    Empty,
}

/// Client-input faults detected before any network call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("unknown service: {name}")]
    UnknownService { name: String },
    #[error("malformed payload: {reason}")]
    MalformedPayload { reason: String },
    #[error("invalid schedule_in_s: {reason}")]
    InvalidSchedule { reason: String },
    #[error("invalid idempotency_key: {reason}")]
    InvalidIdempotencyKey { reason: String },
}

impl ValidationError {
    /// Name of the request field the error refers to.
    #[must_use]
    pub fn field(&self) -> &'static str {
        match self {
            Self::UnknownService { .. } => "service",
            Self::MalformedPayload { .. } => "payload",
            Self::InvalidSchedule { .. } => "schedule_in_s",
            Self::InvalidIdempotencyKey { .. } => "idempotency_key",
        }
    }
}

/// Failure modes reported by a [`TaskQueue`](crate::queue::TaskQueue).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// A task with the requested name exists or is inside the dedup window.
    #[error("task already exists: {name}")]
    AlreadyExists { name: String },
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },
    #[error("queue unavailable: {message}")]
    Unavailable { message: String },
    #[error("queue error: {message}")]
    Internal { message: String },
}

/// Caller-facing outcome of a failed enqueue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown service: {name}")]
    UnknownService { name: String },
    #[error("malformed payload: {reason}")]
    MalformedPayload { reason: String },
    #[error("invalid schedule_in_s: {reason}")]
    InvalidSchedule { reason: String },
    #[error("invalid idempotency_key: {reason}")]
    InvalidIdempotencyKey { reason: String },
    #[error("task {task} already exists")]
    DuplicateTask { task: String },
    #[error("queue rejected the task creation: {message}")]
    DispatchPermissionDenied { message: String },
    #[error("queue unavailable after {attempts} attempt(s): {message}")]
    QueueUnavailable { message: String, attempts: u32 },
    #[error("queue error: {message}")]
    QueueInternalError { message: String },
}

impl DispatchError {
    /// Stable machine-readable kind, used in responses and metric labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownService { .. } => "unknown_service",
            Self::MalformedPayload { .. } => "malformed_payload",
            Self::InvalidSchedule { .. } => "invalid_schedule",
            Self::InvalidIdempotencyKey { .. } => "invalid_idempotency_key",
            Self::DuplicateTask { .. } => "duplicate_task",
            Self::DispatchPermissionDenied { .. } => "dispatch_permission_denied",
            Self::QueueUnavailable { .. } => "queue_unavailable",
            Self::QueueInternalError { .. } => "queue_internal_error",
        }
    }

    /// Request field the error refers to, for client-input faults.
    #[must_use]
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::UnknownService { .. } => Some("service"),
            Self::MalformedPayload { .. } => Some("payload"),
            Self::InvalidSchedule { .. } => Some("schedule_in_s"),
            Self::InvalidIdempotencyKey { .. } => Some("idempotency_key"),
            _ => None,
        }
    }

    /// True for faults caused by the caller's input. These are never retried.
    #[must_use]
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            Self::UnknownService { .. }
                | Self::MalformedPayload { .. }
                | Self::InvalidSchedule { .. }
                | Self::InvalidIdempotencyKey { .. }
        )
    }

    /// True when another attempt may succeed. Whether it is *safe* to retry
    /// also depends on the task having a deterministic identity.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::QueueUnavailable { .. })
    }

    /// Maps a queue failure, filling in the identity for duplicates.
    #[must_use]
    pub fn from_queue(err: QueueError, identity: Option<&TaskIdentity>, attempts: u32) -> Self {
        match err {
            QueueError::AlreadyExists { name } => Self::DuplicateTask {
                task: identity.map_or(name, |id| id.as_str().to_string()),
            },
            QueueError::PermissionDenied { message } => Self::DispatchPermissionDenied { message },
            QueueError::Unavailable { message } => Self::QueueUnavailable { message, attempts },
            QueueError::Internal { message } => Self::QueueInternalError { message },
        }
    }
}

impl From<ValidationError> for DispatchError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::UnknownService { name } => Self::UnknownService { name },
            ValidationError::MalformedPayload { reason } => Self::MalformedPayload { reason },
            ValidationError::InvalidSchedule { reason } => Self::InvalidSchedule { reason },
            ValidationError::InvalidIdempotencyKey { reason } => {
                Self::InvalidIdempotencyKey { reason }
            }
        }
    }
}
