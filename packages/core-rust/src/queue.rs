//! Seam to the external task queue.

use async_trait::async_trait;

use crate::error::QueueError;
use crate::task::TaskSpec;

/// Created task, as reported by the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    /// Full task resource name.
    pub name: String,
}

/// Creates tasks in the queue collaborator.
///
/// Implementations translate their transport failures into [`QueueError`].
/// They must not retry on their own: whether a retry is safe depends on the
/// task carrying a deterministic name, which only the caller decides.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Creates `task` and returns its handle.
    async fn create_task(&self, task: &TaskSpec) -> Result<TaskHandle, QueueError>;

    /// Backend name, for logs and health output.
    fn backend(&self) -> &'static str;
}
