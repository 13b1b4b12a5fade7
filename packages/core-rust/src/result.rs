use serde::Serialize;

use crate::queue::TaskHandle;
use crate::request::ValidatedRequest;

/// Successful enqueue, in its wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnqueueResult {
    pub ok: bool,
    pub task: String,
    pub service: String,
    pub queue: String,
    pub deadline_s: u32,
    /// Key the worker receives in `X-Idempotency-Key`; generated when the
    /// caller sent none.
    pub idempotency_key: String,
}

impl EnqueueResult {
    #[must_use]
    pub fn format(
        handle: TaskHandle,
        request: &ValidatedRequest<'_>,
        idempotency_key: String,
    ) -> Self {
        Self {
            ok: true,
            task: handle.name,
            service: request.descriptor.name().to_string(),
            queue: request.descriptor.queue_name().to_string(),
            deadline_s: request.descriptor.dispatch_deadline_secs(),
            idempotency_key,
        }
    }
}
