//! Process configuration.
//!
//! Flags and environment variables are parsed once by [`AppConfig`]. The
//! service registry is built from the built-in worker table, per-worker
//! environment overrides and an optional services file. Nothing below the
//! binary reads the environment.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use enqueuer_core::{QueueScope, RegistryError, ServiceDescriptor, ServiceDescriptorSpec, ServiceRegistry};

use crate::dispatch::cloud_tasks::{CloudTasksConfig, DEFAULT_ENDPOINT};
use crate::dispatch::{DispatcherConfig, RetryPolicy};
use crate::network::NetworkConfig;
use crate::observability::LogFormat;

/// Errors raised while turning configuration into runtime objects.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is not valid: {reason}")]
    InvalidOverride {
        var: String,
        value: String,
        reason: String,
    },
    #[error("failed to read services file {}: {source}", path.display())]
    ServicesFileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("services file {} is not a JSON array of services: {source}", path.display())]
    ServicesFileFormat {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error(
        "CREATE_TIMEOUT_MS={create_timeout_ms} leaves no room under REQUEST_TIMEOUT_MS={request_timeout_ms}; \
         the request timeout must exceed the create timeout by at least {headroom_ms}ms"
    )]
    TimeoutBudget {
        create_timeout_ms: u64,
        request_timeout_ms: u64,
        headroom_ms: u64,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Part of the request timeout kept back from the create attempts so a
/// queue failure is still answered before the listener gives up.
pub const RESPONSE_HEADROOM: Duration = Duration::from_secs(1);

/// Which [`TaskQueue`](enqueuer_core::TaskQueue) implementation to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum QueueBackend {
    #[default]
    CloudTasks,
    /// In-process queue. Tasks are accepted but never delivered.
    Memory,
}

/// Command-line and environment configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "enqueuer", version, about = "Enqueues HTTP tasks for registered workers")]
pub struct AppConfig {
    /// Project that owns the task queues.
    #[arg(long, env = "PROJECT_ID")]
    pub project_id: String,

    #[arg(long, env = "TASKS_REGION", default_value = "us-central1")]
    pub tasks_region: String,

    /// Service account that signs the OIDC token sent to workers.
    #[arg(long, env = "CALLER_SA")]
    pub caller_sa: String,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Overall HTTP request timeout.
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = 30_000)]
    pub request_timeout_ms: u64,

    /// Timeout of a single task creation call.
    #[arg(long, env = "CREATE_TIMEOUT_MS", default_value_t = 10_000)]
    pub create_timeout_ms: u64,

    /// Attempts per task creation, used only when an idempotency key is given.
    #[arg(
        long,
        env = "CREATE_MAX_ATTEMPTS",
        default_value_t = 3,
        value_parser = clap::value_parser!(u32).range(1..=5)
    )]
    pub create_max_attempts: u32,

    #[arg(long, env = "QUEUE_BACKEND", value_enum, default_value_t = QueueBackend::CloudTasks)]
    pub queue_backend: QueueBackend,

    /// Cloud Tasks API base URL.
    #[arg(long, env = "CLOUD_TASKS_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub cloud_tasks_endpoint: String,

    /// JSON array of workers to add, or to replace built-ins by name.
    #[arg(long, env = "SERVICES_FILE")]
    pub services_file: Option<PathBuf>,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    /// Port for the Prometheus scrape endpoint. Disabled when unset.
    #[arg(long, env = "METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Comma-separated allowed CORS origins.
    #[arg(long, env = "CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    pub cors_origins: Vec<String>,
}

/// A worker that is registered unless overridden.
struct BuiltinWorker {
    name: &'static str,
    /// Suffix of the `QUEUE_`, `URL_`, `AUD_` and `DEADLINE_*_S` variables.
    env_key: &'static str,
    queue: &'static str,
    url: &'static str,
    audience: &'static str,
    deadline_secs: u32,
}

const BUILTIN_WORKERS: [BuiltinWorker; 4] = [
    BuiltinWorker {
        name: "brain",
        env_key: "BRAIN",
        queue: "queue-brain",
        url: "https://brain-pahip4iobq-uc.a.run.app/process",
        audience: "https://brain-pahip4iobq-uc.a.run.app",
        deadline_secs: 700,
    },
    BuiltinWorker {
        name: "testimonios",
        env_key: "TESTI",
        queue: "queue-testimonios",
        url: "https://testimonios-pahip4iobq-uc.a.run.app/generate-testimony",
        audience: "https://testimonios-pahip4iobq-uc.a.run.app",
        deadline_secs: 900,
    },
    BuiltinWorker {
        name: "transcripciones",
        env_key: "TRANS",
        queue: "queue-transcripciones",
        url: "https://transcripciones-pahip4iobq-uc.a.run.app/api/transcribe",
        audience: "https://transcripciones-pahip4iobq-uc.a.run.app",
        deadline_secs: 1800,
    },
    BuiltinWorker {
        name: "regresos",
        env_key: "REGRESOS",
        queue: "queue-regresos",
        url: "https://regresos-223080314602.us-central1.run.app/_tasks/process-pdf-back-questions-run",
        audience: "https://regresos-223080314602.us-central1.run.app",
        deadline_secs: 1800,
    },
];

impl BuiltinWorker {
    fn spec(&self, env: &impl Fn(&str) -> Option<String>) -> Result<ServiceDescriptorSpec, ConfigError> {
        let var = |prefix: &str| env(&format!("{prefix}_{}", self.env_key));

        let deadline_var = format!("DEADLINE_{}_S", self.env_key);
        let dispatch_deadline_secs = match env(&deadline_var) {
            None => self.deadline_secs,
            Some(raw) => raw.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidOverride {
                    var: deadline_var.clone(),
                    value: raw.clone(),
                    reason: e.to_string(),
                }
            })?,
        };

        Ok(ServiceDescriptorSpec {
            name: self.name.to_string(),
            queue_name: var("QUEUE").unwrap_or_else(|| self.queue.to_string()),
            destination_url: var("URL").unwrap_or_else(|| self.url.to_string()),
            audience: var("AUD").unwrap_or_else(|| self.audience.to_string()),
            dispatch_deadline_secs,
        })
    }
}

fn read_services_file(path: &Path) -> Result<Vec<ServiceDescriptorSpec>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ServicesFileRead {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::ServicesFileFormat {
        path: path.to_path_buf(),
        source,
    })
}

impl AppConfig {
    /// Checks that one full create attempt fits inside the request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::TimeoutBudget`] when the request timeout does
    /// not exceed the create timeout plus [`RESPONSE_HEADROOM`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let headroom_ms = u64::try_from(RESPONSE_HEADROOM.as_millis()).unwrap_or(u64::MAX);
        if self.create_timeout_ms.saturating_add(headroom_ms) > self.request_timeout_ms {
            return Err(ConfigError::TimeoutBudget {
                create_timeout_ms: self.create_timeout_ms,
                request_timeout_ms: self.request_timeout_ms,
                headroom_ms,
            });
        }
        Ok(())
    }

    /// Builds the immutable registry.
    ///
    /// `env` looks up per-worker overrides; the binary passes
    /// `std::env::var(..).ok()`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unparsable overrides, an unreadable or
    /// malformed services file, a name listed twice in that file, or any
    /// descriptor that fails validation.
    pub fn build_registry(
        &self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<ServiceRegistry, ConfigError> {
        let mut specs = BUILTIN_WORKERS
            .iter()
            .map(|w| w.spec(&env))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(path) = &self.services_file {
            let mut seen = HashSet::new();
            for extra in read_services_file(path)? {
                if !seen.insert(extra.name.clone()) {
                    return Err(RegistryError::DuplicateService(extra.name).into());
                }
                match specs.iter_mut().find(|s| s.name == extra.name) {
                    Some(existing) => *existing = extra,
                    None => specs.push(extra),
                }
            }
        }

        let descriptors = specs
            .into_iter()
            .map(ServiceDescriptor::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ServiceRegistry::from_descriptors(descriptors)?)
    }

    #[must_use]
    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            cors_origins: self.cors_origins.clone(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            ..NetworkConfig::default()
        }
    }

    #[must_use]
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            scope: QueueScope::new(&self.project_id, &self.tasks_region),
            principal: self.caller_sa.clone(),
            create_timeout: Duration::from_millis(self.create_timeout_ms),
            retry: RetryPolicy {
                max_attempts: self.create_max_attempts,
                ..RetryPolicy::default()
            },
            request_budget: Duration::from_millis(self.request_timeout_ms)
                .saturating_sub(RESPONSE_HEADROOM),
        }
    }

    #[must_use]
    pub fn cloud_tasks_config(&self) -> CloudTasksConfig {
        CloudTasksConfig {
            endpoint: self.cloud_tasks_endpoint.clone(),
            ..CloudTasksConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    const REQUIRED: [&str; 5] = [
        "enqueuer",
        "--project-id",
        "ortega-prod",
        "--caller-sa",
        "enqueuer@ortega-prod.iam.gserviceaccount.com",
    ];

    fn parse(extra: &[&str]) -> AppConfig {
        AppConfig::try_parse_from(REQUIRED.iter().chain(extra)).unwrap()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_of(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn services_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults() {
        let config = parse(&[]);
        assert_eq!(config.tasks_region, "us-central1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.create_max_attempts, 3);
        assert_eq!(config.queue_backend, QueueBackend::CloudTasks);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.cors_origins, vec!["*"]);
        assert!(config.metrics_port.is_none());

        let dispatcher = config.dispatcher_config();
        assert_eq!(
            dispatcher.scope.queue_path("queue-brain"),
            "projects/ortega-prod/locations/us-central1/queues/queue-brain"
        );
        assert_eq!(dispatcher.create_timeout, Duration::from_secs(10));
        assert_eq!(dispatcher.retry.max_attempts, 3);
        assert_eq!(dispatcher.request_budget, Duration::from_secs(29));

        let network = config.network_config();
        assert_eq!(network.request_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn create_timeout_must_fit_inside_the_request_timeout() {
        let err = parse(&["--request-timeout-ms", "10000"]).validate().unwrap_err();
        assert!(
            matches!(
                err,
                ConfigError::TimeoutBudget {
                    create_timeout_ms: 10_000,
                    request_timeout_ms: 10_000,
                    headroom_ms: 1_000
                }
            ),
            "{err}"
        );
        assert!(parse(&["--request-timeout-ms", "10999"]).validate().is_err());
        assert!(parse(&["--request-timeout-ms", "11000"]).validate().is_ok());
        assert!(parse(&["--request-timeout-ms", "500", "--create-timeout-ms", "100"])
            .validate()
            .is_err());
    }

    #[test]
    fn request_budget_follows_the_request_timeout() {
        let config = parse(&["--request-timeout-ms", "5000", "--create-timeout-ms", "2000"]);
        assert_eq!(config.dispatcher_config().request_budget, Duration::from_secs(4));
    }

    #[test]
    fn project_and_principal_are_required() {
        assert!(AppConfig::try_parse_from(["enqueuer", "--project-id", "p"]).is_err());
        assert!(AppConfig::try_parse_from(["enqueuer", "--caller-sa", "sa@p"]).is_err());
    }

    #[test]
    fn max_attempts_is_bounded() {
        assert!(AppConfig::try_parse_from(REQUIRED.iter().chain(&["--create-max-attempts", "0"])).is_err());
        assert!(AppConfig::try_parse_from(REQUIRED.iter().chain(&["--create-max-attempts", "6"])).is_err());
        assert_eq!(parse(&["--create-max-attempts", "5"]).create_max_attempts, 5);
    }

    #[test]
    fn backend_and_cors_parse() {
        let config = parse(&[
            "--queue-backend",
            "memory",
            "--cors-origins",
            "https://a.example,https://b.example",
        ]);
        assert_eq!(config.queue_backend, QueueBackend::Memory);
        assert_eq!(config.cors_origins, vec!["https://a.example", "https://b.example"]);
    }

    #[test]
    fn builtin_workers_register_with_original_defaults() {
        let registry = parse(&[]).build_registry(no_env).unwrap();
        assert_eq!(
            registry.names(),
            vec!["brain", "regresos", "testimonios", "transcripciones"]
        );

        let brain = registry.resolve("brain").unwrap();
        assert_eq!(brain.queue_name(), "queue-brain");
        assert_eq!(brain.destination_url(), "https://brain-pahip4iobq-uc.a.run.app/process");
        assert_eq!(brain.audience(), "https://brain-pahip4iobq-uc.a.run.app");
        assert_eq!(brain.dispatch_deadline_secs(), 700);
        assert_eq!(registry.resolve("testimonios").unwrap().dispatch_deadline_secs(), 900);
        assert_eq!(registry.resolve("regresos").unwrap().dispatch_deadline_secs(), 1800);
    }

    #[test]
    fn env_overrides_apply_per_worker() {
        let env = env_of(&[
            ("QUEUE_TESTI", "queue-testimonios-v2"),
            ("URL_TESTI", "https://testi-v2.example.com/generate"),
            ("AUD_TESTI", "https://testi-v2.example.com"),
            ("DEADLINE_TESTI_S", "600"),
        ]);
        let registry = parse(&[]).build_registry(env).unwrap();

        let testi = registry.resolve("testimonios").unwrap();
        assert_eq!(testi.queue_name(), "queue-testimonios-v2");
        assert_eq!(testi.destination_url(), "https://testi-v2.example.com/generate");
        assert_eq!(testi.audience(), "https://testi-v2.example.com");
        assert_eq!(testi.dispatch_deadline_secs(), 600);
        assert_eq!(registry.resolve("brain").unwrap().queue_name(), "queue-brain");
    }

    #[test]
    fn unparsable_deadline_override_is_fatal() {
        let err = parse(&[])
            .build_registry(env_of(&[("DEADLINE_BRAIN_S", "ten")]))
            .unwrap_err();
        assert!(
            matches!(&err, ConfigError::InvalidOverride { var, .. } if var == "DEADLINE_BRAIN_S"),
            "{err}"
        );
    }

    #[test]
    fn mismatched_audience_override_is_fatal() {
        let err = parse(&[])
            .build_registry(env_of(&[("AUD_BRAIN", "https://somewhere-else.example.com")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Registry(RegistryError::InvalidDescriptor { ref service, .. }) if service == "brain"
        ));
    }

    #[test]
    fn services_file_adds_and_replaces_workers() {
        let file = services_file(
            r#"[
                {"name": "reportes", "queue": "queue-reportes", "url": "https://reportes.example.com/run", "aud": "https://reportes.example.com", "deadline_s": 120},
                {"name": "brain", "queue_name": "queue-brain-v2", "destination_url": "https://brain-v2.example.com/process", "audience": "https://brain-v2.example.com", "dispatch_deadline_secs": 800}
            ]"#,
        );
        let path = file.path().to_str().unwrap().to_string();
        let registry = parse(&["--services-file", &path]).build_registry(no_env).unwrap();

        assert_eq!(registry.len(), 5);
        assert_eq!(registry.resolve("reportes").unwrap().dispatch_deadline_secs(), 120);
        let brain = registry.resolve("brain").unwrap();
        assert_eq!(brain.queue_name(), "queue-brain-v2");
        assert_eq!(brain.dispatch_deadline_secs(), 800);
    }

    #[test]
    fn services_file_rejects_repeated_names() {
        let file = services_file(
            r#"[
                {"name": "reportes", "queue": "q1", "url": "https://r.example.com/a", "aud": "https://r.example.com", "deadline_s": 60},
                {"name": "reportes", "queue": "q2", "url": "https://r.example.com/b", "aud": "https://r.example.com", "deadline_s": 60}
            ]"#,
        );
        let path = file.path().to_str().unwrap().to_string();
        let err = parse(&["--services-file", &path]).build_registry(no_env).unwrap_err();
        assert!(matches!(err, ConfigError::Registry(RegistryError::DuplicateService(ref n)) if n == "reportes"));
    }

    #[test]
    fn services_file_errors_are_reported() {
        let missing = parse(&["--services-file", "/nonexistent/services.json"])
            .build_registry(no_env)
            .unwrap_err();
        assert!(matches!(missing, ConfigError::ServicesFileRead { .. }));

        let file = services_file(r#"{"name": "not-an-array"}"#);
        let path = file.path().to_str().unwrap().to_string();
        let malformed = parse(&["--services-file", &path]).build_registry(no_env).unwrap_err();
        assert!(matches!(malformed, ConfigError::ServicesFileFormat { .. }));
    }
}
