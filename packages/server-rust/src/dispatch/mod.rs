//! Enqueue pipeline and queue backends.
//!
//! - [`Dispatcher`]: validate → name → build → create → format, with a
//!   bounded timeout on every create call and capped retries for tasks that
//!   carry a deterministic identity
//! - [`cloud_tasks`]: Cloud Tasks REST backend
//! - [`memory`]: in-process backend for local runs and tests

pub mod cloud_tasks;
pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use enqueuer_core::{
    derive_identity, task, validate, Clock, DispatchError, EnqueueRequest, EnqueueResult,
    QueueError, QueueScope, ServiceRegistry, TaskHandle, TaskQueue, TaskSpec,
};
use metrics::{counter, histogram};
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::observability::names;

pub use cloud_tasks::{CloudTasksConfig, CloudTasksQueue};
pub use memory::InMemoryTaskQueue;

/// Bounded retry of transient create failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following failed attempt number `attempt`
    /// (1-based): `base * 2^(attempt-1)`, capped at `max_backoff`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(1 << exp)
            .min(self.max_backoff)
    }
}

/// Settings shared by every request handled by a [`Dispatcher`].
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub scope: QueueScope,
    /// Service account that signs the identity token for worker calls.
    pub principal: String,
    /// Upper bound on one create call. Independent of worker deadlines.
    pub create_timeout: Duration,
    pub retry: RetryPolicy,
    /// Upper bound on all create attempts of one request, backoff included.
    /// Must stay below the HTTP request timeout so the caller sees the
    /// queue error rather than a cut connection.
    pub request_budget: Duration,
}

/// Smallest time left in the budget that is still worth another attempt.
const MIN_ATTEMPT_WINDOW: Duration = Duration::from_millis(100);

/// Turns enqueue requests into created tasks.
///
/// Holds only read-only state, so one instance serves all requests
/// concurrently.
pub struct Dispatcher {
    registry: Arc<ServiceRegistry>,
    queue: Arc<dyn TaskQueue>,
    clock: Arc<dyn Clock>,
    config: DispatcherConfig,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        registry: Arc<ServiceRegistry>,
        queue: Arc<dyn TaskQueue>,
        clock: Arc<dyn Clock>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            registry,
            queue,
            clock,
            config,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    #[must_use]
    pub fn queue_backend(&self) -> &'static str {
        self.queue.backend()
    }

    /// Runs one request through the pipeline.
    ///
    /// Nothing reaches the queue unless validation passes.
    ///
    /// # Errors
    ///
    /// Returns the [`DispatchError`] for the first failing stage.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<EnqueueResult, DispatchError> {
        let span = info_span!(
            "enqueue",
            service = %request.service,
            task = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );
        let service = request.service.clone();

        let result = self.run(request).instrument(span.clone()).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        span.record("outcome", outcome);
        // Unknown names are folded into one label to bound cardinality.
        let service_label = if self.registry.resolve(&service).is_ok() {
            service
        } else {
            "unknown".to_string()
        };
        counter!(names::REQUESTS_TOTAL, "service" => service_label, "outcome" => outcome)
            .increment(1);

        result
    }

    async fn run(&self, request: EnqueueRequest) -> Result<EnqueueResult, DispatchError> {
        let validated = validate(request, &self.registry).inspect_err(|e| {
            debug!(error = %e, field = e.field(), "request rejected");
        })?;

        let identity = derive_identity(
            &self.config.scope,
            validated.descriptor,
            validated.idempotency_key.as_ref(),
        );
        let spec = task::build(
            &validated,
            identity,
            &self.config.scope,
            &self.config.principal,
            self.clock.now(),
        )?;

        let handle = self.create(&spec, validated.descriptor.name()).await?;
        tracing::Span::current().record("task", handle.name.as_str());
        info!(
            queue = validated.descriptor.queue_name(),
            scheduled = spec.schedule_time.is_some(),
            deduplicating = spec.identity.is_some(),
            "task created"
        );

        Ok(EnqueueResult::format(handle, &validated, spec.idempotency_key))
    }

    /// Creates `spec`, retrying transient failures only when the task has a
    /// deterministic name. Without one a retry could create a second task.
    ///
    /// Attempts and backoff together never outlast `request_budget`; the
    /// last attempt is shortened to fit.
    async fn create(&self, spec: &TaskSpec, service: &str) -> Result<TaskHandle, DispatchError> {
        let retry_safe = spec.identity.is_some();
        let max_attempts = if retry_safe {
            self.config.retry.max_attempts.max(1)
        } else {
            1
        };

        let budget_end = Instant::now() + self.config.request_budget;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let remaining = budget_end.saturating_duration_since(Instant::now());
            let started = Instant::now();
            let outcome = self
                .create_once(spec, self.config.create_timeout.min(remaining))
                .await;
            histogram!(names::CREATE_DURATION_SECONDS, "service" => service.to_string())
                .record(started.elapsed().as_secs_f64());

            let label = match &outcome {
                Ok(_) => "ok",
                Err(QueueError::AlreadyExists { .. }) => "already_exists",
                Err(QueueError::PermissionDenied { .. }) => "permission_denied",
                Err(QueueError::Unavailable { .. }) => "unavailable",
                Err(QueueError::Internal { .. }) => "internal",
            };
            counter!(
                names::CREATE_ATTEMPTS_TOTAL,
                "service" => service.to_string(),
                "outcome" => label
            )
            .increment(1);

            let err = match outcome {
                Ok(handle) => return Ok(handle),
                Err(err) => err,
            };

            match &err {
                QueueError::Unavailable { message } if attempt < max_attempts => {
                    let delay = self.config.retry.backoff(attempt);
                    if Instant::now() + delay + MIN_ATTEMPT_WINDOW < budget_end {
                        warn!(attempt, ?delay, error = %message, "queue unavailable, retrying");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    warn!(attempt, error = %message, "queue unavailable; request budget spent");
                }
                QueueError::Unavailable { message } if !retry_safe => {
                    warn!(error = %message, "queue unavailable; not retried without an idempotency key");
                }
                QueueError::AlreadyExists { name } if attempt > 1 => {
                    warn!(task = %name, attempt, "task exists after a failed attempt; an earlier attempt may have created it");
                }
                _ => {}
            }
            return Err(DispatchError::from_queue(err, spec.identity.as_ref(), attempt));
        }
    }

    async fn create_once(&self, spec: &TaskSpec, timeout: Duration) -> Result<TaskHandle, QueueError> {
        match tokio::time::timeout(timeout, self.queue.create_task(spec)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(QueueError::Unavailable {
                message: format!("create call timed out after {}ms", timeout.as_millis()),
            }),
        }
    }
}
