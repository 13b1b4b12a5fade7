//! Deterministic task identities for deduplication.
//!
//! With an idempotency key the task name is
//! `projects/{project}/locations/{region}/queues/{queue}/tasks/{service}-{key}`.
//! Service names never contain `-`, so the first hyphen of the task id
//! separates service from key and distinct pairs cannot produce the same id.

use std::fmt;

use serde::Serialize;

use crate::request::IdempotencyKey;
use crate::service::ServiceDescriptor;

/// Project and region that every queue of this deployment lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueScope {
    pub project_id: String,
    pub location: String,
}

impl QueueScope {
    #[must_use]
    pub fn new(project_id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            location: location.into(),
        }
    }

    /// Full resource path of `queue` within this scope.
    #[must_use]
    pub fn queue_path(&self, queue: &str) -> String {
        format!(
            "projects/{}/locations/{}/queues/{}",
            self.project_id, self.location, queue
        )
    }
}

/// Fully-qualified task resource name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TaskIdentity(String);

impl TaskIdentity {
    #[cfg(test)]
    pub(crate) fn from_raw(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The trailing task id segment.
    #[must_use]
    pub fn task_id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for TaskIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives the task identity for a request.
///
/// Returns `None` without a key: the queue then assigns a random name and the
/// request is not deduplicated.
#[must_use]
pub fn derive_identity(
    scope: &QueueScope,
    descriptor: &ServiceDescriptor,
    key: Option<&IdempotencyKey>,
) -> Option<TaskIdentity> {
    key.map(|key| {
        TaskIdentity(format!(
            "{}/tasks/{}-{}",
            scope.queue_path(descriptor.queue_name()),
            descriptor.name(),
            key.as_str()
        ))
    })
}
