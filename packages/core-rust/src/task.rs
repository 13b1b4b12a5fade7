//! Task specification assembly.
//!
//! [`build`] turns a validated request into the exact task handed to the
//! queue: HTTP envelope, identity-token binding, schedule time and dispatch
//! deadline. The payload is forwarded as serialized JSON without any schema
//! knowledge of the worker.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::ValidationError;
use crate::naming::{QueueScope, TaskIdentity};
use crate::request::ValidatedRequest;

pub const CONTENT_TYPE_HEADER: &str = "Content-Type";
pub const IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// HTTP method of the outbound worker call. Tasks are always POSTed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Post,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Post => "POST",
        }
    }
}

/// The HTTP request the queue will deliver to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpEnvelope {
    pub method: HttpMethod,
    pub url: String,
    /// Header name/value pairs in insertion order.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpEnvelope {
    /// First header value with a case-insensitive name match.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Principal that signs the outbound identity token and the audience it is
/// minted for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityTokenBinding {
    pub principal: String,
    pub audience: String,
}

/// Complete description of one unit of work for the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    /// Queue resource path the task is created in.
    pub parent: String,
    pub identity: Option<TaskIdentity>,
    pub http: HttpEnvelope,
    pub identity_token: IdentityTokenBinding,
    pub schedule_time: Option<DateTime<Utc>>,
    pub dispatch_deadline_secs: u32,
    /// Value sent in the idempotency header.
    pub idempotency_key: String,
}

/// Builds the [`TaskSpec`] for `request`.
///
/// # Errors
///
/// Returns [`ValidationError::MalformedPayload`] if the payload cannot be
/// serialized, or [`ValidationError::InvalidSchedule`] if the delay does not
/// fit the timestamp range.
pub fn build(
    request: &ValidatedRequest<'_>,
    identity: Option<TaskIdentity>,
    scope: &QueueScope,
    principal: &str,
    now: DateTime<Utc>,
) -> Result<TaskSpec, ValidationError> {
    let descriptor = request.descriptor;

    let body = serde_json::to_vec(&request.payload).map_err(|e| {
        ValidationError::MalformedPayload {
            reason: e.to_string(),
        }
    })?;

    // Workers dedupe on this header even when the queue name is random.
    let idempotency_key = request.idempotency_key.as_ref().map_or_else(
        || uuid::Uuid::new_v4().to_string(),
        |key| key.as_str().to_string(),
    );

    let schedule_time = match request.schedule_delay_secs {
        None => None,
        Some(secs) => {
            let delay = i64::try_from(secs)
                .ok()
                .and_then(Duration::try_seconds)
                .and_then(|d| now.checked_add_signed(d))
                .ok_or_else(|| ValidationError::InvalidSchedule {
                    reason: format!("{secs}s is out of range"),
                })?;
            Some(delay)
        }
    };

    Ok(TaskSpec {
        parent: scope.queue_path(descriptor.queue_name()),
        identity,
        http: HttpEnvelope {
            method: HttpMethod::Post,
            url: descriptor.destination_url().to_string(),
            headers: vec![
                (CONTENT_TYPE_HEADER.to_string(), JSON_CONTENT_TYPE.to_string()),
                (IDEMPOTENCY_HEADER.to_string(), idempotency_key.clone()),
            ],
            body,
        },
        identity_token: IdentityTokenBinding {
            principal: principal.to_string(),
            audience: descriptor.audience().to_string(),
        },
        schedule_time,
        dispatch_deadline_secs: descriptor.dispatch_deadline_secs(),
        idempotency_key,
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    use super::*;
    use crate::naming::derive_identity;
    use crate::registry::ServiceRegistry;
    use crate::request::EnqueueRequest;
    use crate::service::tests::spec;
    use crate::service::ServiceDescriptor;
    use crate::validate::validate;

    const PRINCIPAL: &str = "enqueuer@ortega-prod.iam.gserviceaccount.com";

    fn registry() -> ServiceRegistry {
        ServiceRegistry::from_descriptors(
            ["brain", "testimonios", "transcripciones", "regresos"]
                .into_iter()
                .map(|n| ServiceDescriptor::new(spec(n)).unwrap()),
        )
        .unwrap()
    }

    fn scope() -> QueueScope {
        QueueScope::new("ortega-prod", "us-central1")
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
    }

    fn build_for(req: EnqueueRequest, reg: &ServiceRegistry) -> TaskSpec {
        let v = validate(req, reg).unwrap();
        let identity = derive_identity(&scope(), v.descriptor, v.idempotency_key.as_ref());
        build(&v, identity, &scope(), PRINCIPAL, now()).unwrap()
    }

    #[test]
    fn every_service_binds_its_own_audience_and_url() {
        let reg = registry();
        for d in reg.descriptors() {
            let task = build_for(EnqueueRequest::new(d.name(), json!({"x": 1})), &reg);
            assert_eq!(task.identity_token.audience, d.audience());
            assert_eq!(task.identity_token.principal, PRINCIPAL);
            assert_eq!(task.http.url, d.destination_url());
            assert_eq!(task.http.method, HttpMethod::Post);
            assert_eq!(task.dispatch_deadline_secs, d.dispatch_deadline_secs());
            assert_eq!(
                task.parent,
                format!("projects/ortega-prod/locations/us-central1/queues/{}", d.queue_name())
            );
        }
    }

    #[test]
    fn headers_are_ordered_with_content_type_first() {
        let reg = registry();
        let task = build_for(
            EnqueueRequest::new("brain", json!({})).with_idempotency_key("CASE-1"),
            &reg,
        );
        assert_eq!(
            task.http.headers,
            vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("X-Idempotency-Key".to_string(), "CASE-1".to_string()),
            ]
        );
        assert_eq!(task.http.header("x-idempotency-key"), Some("CASE-1"));
        assert_eq!(task.idempotency_key, "CASE-1");
        assert!(task.identity.is_some());
    }

    #[test]
    fn missing_key_gets_a_fresh_header_value_and_no_identity() {
        let reg = registry();
        let a = build_for(EnqueueRequest::new("brain", json!({})), &reg);
        let b = build_for(EnqueueRequest::new("brain", json!({})), &reg);
        assert!(a.identity.is_none());
        assert!(uuid::Uuid::parse_str(&a.idempotency_key).is_ok());
        assert_ne!(a.idempotency_key, b.idempotency_key);
        assert_eq!(a.http.header(IDEMPOTENCY_HEADER), Some(a.idempotency_key.as_str()));
    }

    #[test]
    fn no_delay_means_no_schedule_time() {
        let reg = registry();
        let immediate = build_for(EnqueueRequest::new("brain", json!({})), &reg);
        assert_eq!(immediate.schedule_time, None);
        let zero = build_for(
            EnqueueRequest::new("brain", json!({})).with_schedule_in_s(0),
            &reg,
        );
        assert_eq!(zero.schedule_time, None);
    }

    #[test]
    fn delay_is_added_to_now() {
        let reg = registry();
        let task = build_for(
            EnqueueRequest::new("brain", json!({})).with_schedule_in_s(30),
            &reg,
        );
        assert_eq!(task.schedule_time, Some(now() + Duration::seconds(30)));
    }

    #[test]
    fn deadline_comes_from_descriptor_only() {
        let mut s = spec("regresos");
        s.dispatch_deadline_secs = 1800;
        let reg = ServiceRegistry::from_descriptors([ServiceDescriptor::new(s).unwrap()]).unwrap();
        let req: EnqueueRequest = serde_json::from_value(json!({
            "service": "regresos",
            "payload": {},
            "deadline_s": 60
        }))
        .unwrap();
        assert_eq!(build_for(req, &reg).dispatch_deadline_secs, 1800);
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            "[a-zA-Z0-9 ñé]{0,12}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,8}", inner, 0..6)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn body_round_trips_to_the_payload(inner in arb_json()) {
            let payload = json!({ "data": inner });
            let reg = registry();
            let task = build_for(EnqueueRequest::new("brain", payload.clone()), &reg);
            let decoded: Value = serde_json::from_slice(&task.http.body).unwrap();
            prop_assert_eq!(decoded, payload);
        }
    }
}
