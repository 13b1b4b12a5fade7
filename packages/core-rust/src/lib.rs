//! Enqueuer core: service registry, request validation, deterministic task
//! naming, task specifications and the error taxonomy.
//!
//! Pipeline: [`validate`] → [`derive_identity`] → [`task::build`] →
//! [`TaskQueue::create_task`] → [`EnqueueResult::format`].

pub mod clock;
pub mod error;
pub mod naming;
pub mod queue;
pub mod registry;
pub mod request;
pub mod result;
pub mod service;
pub mod task;
pub mod validate;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{DispatchError, QueueError, RegistryError, ValidationError};
pub use naming::{derive_identity, QueueScope, TaskIdentity};
pub use queue::{TaskHandle, TaskQueue};
pub use registry::{ServiceNotFound, ServiceRegistry};
pub use request::{EnqueueRequest, IdempotencyKey, ValidatedRequest};
pub use result::EnqueueResult;
pub use service::{ServiceDescriptor, ServiceDescriptorSpec};
pub use task::{HttpEnvelope, HttpMethod, IdentityTokenBinding, TaskSpec};
pub use validate::validate;
