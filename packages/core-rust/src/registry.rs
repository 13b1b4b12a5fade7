//! Immutable routing table from service name to [`ServiceDescriptor`].

use std::collections::HashMap;

use crate::error::RegistryError;
use crate::service::ServiceDescriptor;

/// Lookup miss returned by [`ServiceRegistry::resolve`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("service '{0}' is not registered")]
pub struct ServiceNotFound(pub String);

/// Read-only registry of known workers.
///
/// Built once at startup and shared by reference; there is no way to mutate
/// it afterwards. Adding a worker means adding a descriptor to configuration.
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    by_name: HashMap<String, ServiceDescriptor>,
}

impl ServiceRegistry {
    /// Builds a registry from already-validated descriptors.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateService`] if two descriptors share a
    /// name and [`RegistryError::Empty`] if there are none.
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = ServiceDescriptor>,
    ) -> Result<Self, RegistryError> {
        let mut by_name = HashMap::new();
        for descriptor in descriptors {
            let name = descriptor.name().to_string();
            if by_name.insert(name.clone(), descriptor).is_some() {
                return Err(RegistryError::DuplicateService(name));
            }
        }
        if by_name.is_empty() {
            return Err(RegistryError::Empty);
        }
        Ok(Self { by_name })
    }

    /// Looks up the descriptor for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceNotFound`] when no worker is registered under `name`.
    pub fn resolve(&self, name: &str) -> Result<&ServiceDescriptor, ServiceNotFound> {
        self.by_name
            .get(name)
            .ok_or_else(|| ServiceNotFound(name.to_string()))
    }

    /// Registered service names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Descriptors sorted by service name.
    #[must_use]
    pub fn descriptors(&self) -> Vec<&ServiceDescriptor> {
        let mut all: Vec<&ServiceDescriptor> = self.by_name.values().collect();
        all.sort_unstable_by(|a, b| a.name().cmp(b.name()));
        all
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::tests::spec;

    fn registry(names: &[&str]) -> ServiceRegistry {
        ServiceRegistry::from_descriptors(
            names
                .iter()
                .map(|n| ServiceDescriptor::new(spec(n)).unwrap()),
        )
        .unwrap()
    }

    #[test]
    fn resolve_registered_service() {
        let reg = registry(&["brain", "regresos"]);
        let d = reg.resolve("brain").unwrap();
        assert_eq!(d.queue_name(), "queue-brain");
    }

    #[test]
    fn resolve_unknown_service_is_not_found() {
        let reg = registry(&["brain"]);
        assert_eq!(
            reg.resolve("ghost").unwrap_err(),
            ServiceNotFound("ghost".to_string())
        );
    }

    #[test]
    fn resolve_is_case_sensitive() {
        let reg = registry(&["brain"]);
        assert!(reg.resolve("Brain").is_err());
    }

    #[test]
    fn names_are_sorted() {
        let reg = registry(&["transcripciones", "brain", "regresos"]);
        assert_eq!(reg.names(), vec!["brain", "regresos", "transcripciones"]);
        assert_eq!(reg.len(), 3);
        assert!(!reg.is_empty());
        let names: Vec<&str> = reg.descriptors().iter().map(|d| d.name()).collect();
        assert_eq!(names, reg.names());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = ServiceRegistry::from_descriptors([
            ServiceDescriptor::new(spec("brain")).unwrap(),
            ServiceDescriptor::new(spec("brain")).unwrap(),
        ])
        .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateService(name) if name == "brain"));
    }

    #[test]
    fn empty_registry_is_rejected() {
        let err = ServiceRegistry::from_descriptors(Vec::new()).unwrap_err();
        assert!(matches!(err, RegistryError::Empty));
    }
}
