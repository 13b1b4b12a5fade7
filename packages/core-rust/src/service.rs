//! Worker descriptors: where a task for a given service is delivered.
//!
//! A [`ServiceDescriptor`] is validated once, when it is constructed. Every
//! invariant that downstream authentication depends on (most importantly the
//! audience/destination relationship) is checked here so that request
//! handling never has to re-check it.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::RegistryError;

/// Maximum length of a service name.
pub const MAX_SERVICE_NAME_LEN: usize = 64;

/// Maximum length of a Cloud Tasks queue id.
pub const MAX_QUEUE_NAME_LEN: usize = 100;

/// Smallest dispatch deadline accepted for HTTP targets, in seconds.
pub const MIN_DISPATCH_DEADLINE_SECS: u32 = 15;

/// Largest dispatch deadline accepted for HTTP targets, in seconds.
pub const MAX_DISPATCH_DEADLINE_SECS: u32 = 1800;

/// Destination descriptor for one downstream worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDescriptor {
    name: String,
    queue_name: String,
    destination_url: String,
    audience: String,
    dispatch_deadline_secs: u32,
}

/// Unvalidated descriptor fields, as they come out of configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceDescriptorSpec {
    pub name: String,
    #[serde(alias = "queue")]
    pub queue_name: String,
    #[serde(alias = "url")]
    pub destination_url: String,
    #[serde(alias = "aud")]
    pub audience: String,
    #[serde(alias = "deadline_s")]
    pub dispatch_deadline_secs: u32,
}

impl ServiceDescriptor {
    /// Validates `spec` and builds an immutable descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidDescriptor`] naming the service and the
    /// violated rule when any field is out of range, or when the audience is
    /// not exactly the scheme and host of the destination URL.
    pub fn new(spec: ServiceDescriptorSpec) -> Result<Self, RegistryError> {
        let invalid = |reason: String| RegistryError::InvalidDescriptor {
            service: spec.name.clone(),
            reason,
        };

        if spec.name.is_empty() || spec.name.len() > MAX_SERVICE_NAME_LEN {
            return Err(invalid(format!(
                "name must be 1..={MAX_SERVICE_NAME_LEN} characters"
            )));
        }
        if !spec
            .name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        {
            return Err(invalid(
                "name may only contain lowercase letters, digits and '_'".to_string(),
            ));
        }

        if spec.queue_name.is_empty() || spec.queue_name.len() > MAX_QUEUE_NAME_LEN {
            return Err(invalid(format!(
                "queue name must be 1..={MAX_QUEUE_NAME_LEN} characters"
            )));
        }
        if !spec
            .queue_name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-')
        {
            return Err(invalid(
                "queue name may only contain letters, digits and '-'".to_string(),
            ));
        }

        if !(MIN_DISPATCH_DEADLINE_SECS..=MAX_DISPATCH_DEADLINE_SECS)
            .contains(&spec.dispatch_deadline_secs)
        {
            return Err(invalid(format!(
                "dispatch deadline {}s outside {MIN_DISPATCH_DEADLINE_SECS}..={MAX_DISPATCH_DEADLINE_SECS}",
                spec.dispatch_deadline_secs
            )));
        }

        let destination = parse_http_url(&spec.destination_url)
            .map_err(|e| invalid(format!("destination url: {e}")))?;
        let audience =
            parse_http_url(&spec.audience).map_err(|e| invalid(format!("audience: {e}")))?;

        if audience.path() != "/" || audience.query().is_some() || audience.fragment().is_some() {
            return Err(invalid(format!(
                "audience {} must be scheme and host only",
                spec.audience
            )));
        }
        if audience.scheme() != destination.scheme()
            || audience.host_str() != destination.host_str()
            || audience.port_or_known_default() != destination.port_or_known_default()
        {
            return Err(invalid(format!(
                "audience {} does not match the origin of {}",
                spec.audience, spec.destination_url
            )));
        }

        Ok(Self {
            // Trailing slash is dropped so the audience is byte-equal to the
            // origin the identity provider puts in the token.
            audience: spec.audience.trim_end_matches('/').to_string(),
            name: spec.name,
            queue_name: spec.queue_name,
            destination_url: spec.destination_url,
            dispatch_deadline_secs: spec.dispatch_deadline_secs,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    #[must_use]
    pub fn destination_url(&self) -> &str {
        &self.destination_url
    }

    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    #[must_use]
    pub fn dispatch_deadline_secs(&self) -> u32 {
        self.dispatch_deadline_secs
    }
}

fn parse_http_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("{raw}: {e}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("{raw}: scheme must be http or https"));
    }
    if url.host_str().is_none() {
        return Err(format!("{raw}: missing host"));
    }
    Ok(url)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn spec(name: &str) -> ServiceDescriptorSpec {
        ServiceDescriptorSpec {
            name: name.to_string(),
            queue_name: format!("queue-{name}"),
            destination_url: format!("https://{name}-abc123-uc.a.run.app/process"),
            audience: format!("https://{name}-abc123-uc.a.run.app"),
            dispatch_deadline_secs: 700,
        }
    }

    #[test]
    fn accepts_matching_audience() {
        let d = ServiceDescriptor::new(spec("brain")).unwrap();
        assert_eq!(d.name(), "brain");
        assert_eq!(d.queue_name(), "queue-brain");
        assert_eq!(d.audience(), "https://brain-abc123-uc.a.run.app");
        assert_eq!(
            d.destination_url(),
            "https://brain-abc123-uc.a.run.app/process"
        );
        assert_eq!(d.dispatch_deadline_secs(), 700);
    }

    #[test]
    fn trailing_slash_on_audience_is_normalized() {
        let mut s = spec("brain");
        s.audience.push('/');
        let d = ServiceDescriptor::new(s).unwrap();
        assert_eq!(d.audience(), "https://brain-abc123-uc.a.run.app");
    }

    #[test]
    fn rejects_audience_with_path() {
        let mut s = spec("brain");
        s.audience = "https://brain-abc123-uc.a.run.app/process".to_string();
        let err = ServiceDescriptor::new(s).unwrap_err();
        assert!(err.to_string().contains("scheme and host only"), "{err}");
    }

    #[test]
    fn rejects_audience_for_other_host() {
        let mut s = spec("brain");
        s.audience = "https://testimonios-abc123-uc.a.run.app".to_string();
        let err = ServiceDescriptor::new(s).unwrap_err();
        assert!(err.to_string().contains("does not match"), "{err}");
    }

    #[test]
    fn rejects_scheme_mismatch() {
        let mut s = spec("brain");
        s.audience = "http://brain-abc123-uc.a.run.app".to_string();
        assert!(ServiceDescriptor::new(s).is_err());
    }

    #[test]
    fn rejects_port_mismatch() {
        let mut s = spec("local");
        s.destination_url = "http://localhost:9000/run".to_string();
        s.audience = "http://localhost:9001".to_string();
        assert!(ServiceDescriptor::new(s).is_err());
    }

    #[test]
    fn rejects_hyphen_in_name() {
        let err = ServiceDescriptor::new(spec("back-office")).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidDescriptor { .. }));
    }

    #[test]
    fn rejects_deadline_out_of_range() {
        for deadline in [0, 14, 1801] {
            let mut s = spec("brain");
            s.dispatch_deadline_secs = deadline;
            assert!(ServiceDescriptor::new(s).is_err(), "deadline {deadline}");
        }
    }

    #[test]
    fn rejects_non_http_destination() {
        let mut s = spec("brain");
        s.destination_url = "ftp://brain-abc123-uc.a.run.app/process".to_string();
        assert!(ServiceDescriptor::new(s).is_err());
    }

    #[test]
    fn rejects_bad_queue_name() {
        let mut s = spec("brain");
        s.queue_name = "queue/brain".to_string();
        assert!(ServiceDescriptor::new(s).is_err());
    }

    #[test]
    fn spec_deserializes_short_field_names() {
        let s: ServiceDescriptorSpec = serde_json::from_str(
            r#"{"name":"brain","queue":"queue-brain","url":"https://b.run.app/p","aud":"https://b.run.app","deadline_s":700}"#,
        )
        .unwrap();
        assert_eq!(s.queue_name, "queue-brain");
        assert_eq!(s.dispatch_deadline_secs, 700);
    }
}
