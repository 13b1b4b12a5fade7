//! Google Cloud Tasks backend over the v2 REST API.
//!
//! One `tasks.create` call per [`TaskSpec`]. The task carries an HTTP target
//! with an OIDC token bound to the worker's audience, an optional schedule
//! time and the worker's dispatch deadline. When the task has an identity it
//! becomes the task name, which lets Cloud Tasks reject duplicates.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::SecondsFormat;
use enqueuer_core::{QueueError, TaskHandle, TaskQueue, TaskSpec};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize, Serializer};
use tracing::debug;

/// Public Cloud Tasks API endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://cloudtasks.googleapis.com";

const CLOUD_TASKS_SCOPE: &str = "https://www.googleapis.com/auth/cloud-tasks";

/// Transport settings for [`CloudTasksQueue`].
#[derive(Debug, Clone)]
pub struct CloudTasksConfig {
    /// API base URL, without a trailing slash.
    pub endpoint: String,
    /// Per-request HTTP timeout. The dispatcher applies its own create
    /// timeout on top of this one.
    pub http_timeout: Duration,
}

impl Default for CloudTasksConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            http_timeout: Duration::from_secs(30),
        }
    }
}

/// Supplies OAuth access tokens for the Cloud Tasks API.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, String>;
}

/// Application-default credentials via `gcp_auth`.
pub struct GcpTokenSource {
    provider: Arc<dyn gcp_auth::TokenProvider>,
}

impl GcpTokenSource {
    /// Discovers credentials from the environment: service account key file,
    /// metadata server or gcloud user credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if no credential source is available.
    pub async fn discover() -> anyhow::Result<Self> {
        let provider = gcp_auth::provider()
            .await
            .map_err(|e| anyhow::anyhow!("failed to initialize GCP credentials: {e}"))?;
        Ok(Self { provider })
    }
}

#[async_trait]
impl AccessTokenSource for GcpTokenSource {
    async fn access_token(&self) -> Result<String, String> {
        let token = self
            .provider
            .token(&[CLOUD_TASKS_SCOPE])
            .await
            .map_err(|e| e.to_string())?;
        Ok(token.as_str().to_string())
    }
}

/// [`TaskQueue`] that creates HTTP-target tasks in Google Cloud Tasks.
pub struct CloudTasksQueue {
    config: CloudTasksConfig,
    tokens: Arc<dyn AccessTokenSource>,
    client: reqwest::Client,
}

impl fmt::Debug for CloudTasksQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudTasksQueue")
            .field("config", &self.config)
            .field("tokens", &"<AccessTokenSource>")
            .finish_non_exhaustive()
    }
}

impl CloudTasksQueue {
    /// Builds a queue client using application-default credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials cannot be discovered or the HTTP
    /// client cannot be built.
    pub async fn connect(config: CloudTasksConfig) -> anyhow::Result<Self> {
        let tokens = GcpTokenSource::discover().await?;
        Self::with_token_source(config, Arc::new(tokens))
    }

    /// Builds a queue client with an explicit token source.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_token_source(
        config: CloudTasksConfig,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            config,
            tokens,
            client,
        })
    }

    fn create_url(&self, parent: &str) -> String {
        format!(
            "{}/v2/{parent}/tasks",
            self.config.endpoint.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl TaskQueue for CloudTasksQueue {
    async fn create_task(&self, task: &TaskSpec) -> Result<TaskHandle, QueueError> {
        let token = self
            .tokens
            .access_token()
            .await
            .map_err(|message| QueueError::PermissionDenied {
                message: format!("failed to obtain access token: {message}"),
            })?;

        let request = CreateTaskRequest::from_spec(task);
        let url = self.create_url(&task.parent);
        debug!(%url, named = task.identity.is_some(), "creating cloud task");

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if status.is_success() {
            let created: CreatedTask = response.json().await.map_err(|e| QueueError::Internal {
                message: format!("unreadable create response: {e}"),
            })?;
            return Ok(TaskHandle { name: created.name });
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body, task))
    }

    fn backend(&self) -> &'static str {
        "cloud-tasks"
    }
}

fn classify_transport(err: reqwest::Error) -> QueueError {
    if err.is_builder() {
        QueueError::Internal {
            message: format!("invalid create request: {err}"),
        }
    } else {
        QueueError::Unavailable {
            message: format!("create request failed: {err}"),
        }
    }
}

/// Longest prefix of an unparsed error body kept in the message.
const MAX_BODY_IN_MESSAGE: usize = 512;

fn classify_status(status: StatusCode, body: &str, task: &TaskSpec) -> QueueError {
    let parsed = serde_json::from_str::<ApiErrorResponse>(body).ok();
    let message = match &parsed {
        Some(r) => format!("{} ({})", r.error.message, r.error.status),
        None => format!("{status}: {}", truncate_on_char_boundary(body, MAX_BODY_IN_MESSAGE)),
    };
    let aborted = parsed.as_ref().is_some_and(|r| r.error.status == "ABORTED");

    match status {
        // 409 also carries ABORTED, a concurrency conflict worth retrying.
        StatusCode::CONFLICT if aborted => QueueError::Unavailable { message },
        StatusCode::CONFLICT => match &task.identity {
            Some(identity) => QueueError::AlreadyExists {
                name: identity.as_str().to_string(),
            },
            None => QueueError::Internal { message },
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            QueueError::PermissionDenied { message }
        }
        StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS
        | StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => QueueError::Unavailable { message },
        _ => QueueError::Internal { message },
    }
}

fn truncate_on_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Formats whole seconds as a protobuf duration string.
fn format_duration_secs(secs: u32) -> String {
    format!("{secs}s")
}

// Wire types for `projects.locations.queues.tasks.create`.

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskRequest {
    task: CloudTask,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CloudTask {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    http_request: HttpRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    schedule_time: Option<String>,
    dispatch_deadline: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HttpRequest {
    url: String,
    http_method: &'static str,
    #[serde(serialize_with = "serialize_headers")]
    headers: Vec<(String, String)>,
    /// Base64 of the raw body bytes.
    body: String,
    oidc_token: OidcToken,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OidcToken {
    service_account_email: String,
    audience: String,
}

fn serialize_headers<S: Serializer>(
    headers: &[(String, String)],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(headers.iter().map(|(k, v)| (k, v)))
}

impl CreateTaskRequest {
    fn from_spec(spec: &TaskSpec) -> Self {
        Self {
            task: CloudTask {
                name: spec.identity.as_ref().map(|id| id.as_str().to_string()),
                http_request: HttpRequest {
                    url: spec.http.url.clone(),
                    http_method: spec.http.method.as_str(),
                    headers: spec.http.headers.clone(),
                    body: base64::engine::general_purpose::STANDARD.encode(&spec.http.body),
                    oidc_token: OidcToken {
                        service_account_email: spec.identity_token.principal.clone(),
                        audience: spec.identity_token.audience.clone(),
                    },
                },
                schedule_time: spec
                    .schedule_time
                    .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true)),
                dispatch_deadline: format_duration_secs(spec.dispatch_deadline_secs),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatedTask {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
    #[serde(default)]
    status: String,
}
