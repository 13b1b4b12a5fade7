//! Request validation against the registry and structural rules.
//!
//! Rules run in a fixed order and stop at the first failure:
//! service, payload, schedule, idempotency key.

use serde_json::Value;

use crate::error::ValidationError;
use crate::registry::ServiceRegistry;
use crate::request::{EnqueueRequest, IdempotencyKey, ValidatedRequest, MAX_SCHEDULE_DELAY_SECS};

/// Validates `request` and resolves its service descriptor.
///
/// # Errors
///
/// Returns the first [`ValidationError`] in rule order.
pub fn validate(
    request: EnqueueRequest,
    registry: &ServiceRegistry,
) -> Result<ValidatedRequest<'_>, ValidationError> {
    let descriptor =
        registry
            .resolve(&request.service)
            .map_err(|_| ValidationError::UnknownService {
                name: request.service.clone(),
            })?;

    let payload = match request.payload {
        Some(payload @ (Value::Object(_) | Value::Array(_))) => payload,
        Some(Value::Null) | None => {
            return Err(ValidationError::MalformedPayload {
                reason: "payload is required".to_string(),
            })
        }
        Some(other) => {
            return Err(ValidationError::MalformedPayload {
                reason: format!("payload must be a JSON object or array, got {}", kind_of(&other)),
            })
        }
    };

    let schedule_delay_secs = match request.schedule_in_s {
        None => None,
        Some(n) => {
            let secs = n.as_u64().ok_or_else(|| ValidationError::InvalidSchedule {
                reason: format!("{n} is not a non-negative integer"),
            })?;
            if secs > MAX_SCHEDULE_DELAY_SECS {
                return Err(ValidationError::InvalidSchedule {
                    reason: format!("{secs} exceeds the maximum of {MAX_SCHEDULE_DELAY_SECS}"),
                });
            }
            (secs > 0).then_some(secs)
        }
    };

    let idempotency_key = request
        .idempotency_key
        .as_deref()
        .map(IdempotencyKey::parse)
        .transpose()
        .map_err(|reason| ValidationError::InvalidIdempotencyKey { reason })?;

    Ok(ValidatedRequest {
        descriptor,
        payload,
        schedule_delay_secs,
        idempotency_key,
    })
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
