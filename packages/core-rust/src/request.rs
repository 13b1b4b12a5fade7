//! Inbound enqueue request types.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::service::ServiceDescriptor;

/// Maximum accepted idempotency key length.
///
/// Together with the longest service name and the separator this stays inside
/// the 500-character task id limit of the queue.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 400;

/// Longest accepted scheduling delay: 30 days.
pub const MAX_SCHEDULE_DELAY_SECS: u64 = 30 * 24 * 60 * 60;

/// Enqueue request as received on the wire.
///
/// Fields are kept loose (`payload` optional, `schedule_in_s` any number) so
/// that the validator, not the deserializer, decides which rule failed.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct EnqueueRequest {
    pub service: String,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default, alias = "delay_s", skip_serializing_if = "Option::is_none")]
    pub schedule_in_s: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl EnqueueRequest {
    /// Request for `service` carrying `payload`, with no delay or key.
    #[must_use]
    pub fn new(service: impl Into<String>, payload: Value) -> Self {
        Self {
            service: service.into(),
            payload: Some(payload),
            schedule_in_s: None,
            idempotency_key: None,
        }
    }

    #[must_use]
    pub fn with_schedule_in_s(mut self, secs: u64) -> Self {
        self.schedule_in_s = Some(Number::from(secs));
        self
    }

    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Caller-supplied deduplication key, checked to be safe as a task id segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Validates `raw` as an idempotency key.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the key is empty, too long, or
    /// contains characters other than ASCII letters, digits, `-` and `_`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        if raw.is_empty() {
            return Err("must not be empty".to_string());
        }
        if raw.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(format!(
                "must be at most {MAX_IDEMPOTENCY_KEY_LEN} characters"
            ));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(format!(
                "character {bad:?} not allowed; use letters, digits, '-' or '_'"
            ));
        }
        Ok(Self(raw.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A request that passed validation, bound to its resolved descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest<'r> {
    pub descriptor: &'r ServiceDescriptor,
    pub payload: Value,
    /// `None` means dispatch immediately.
    pub schedule_delay_secs: Option<u64>,
    pub idempotency_key: Option<IdempotencyKey>,
}
