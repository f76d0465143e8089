use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::catalog::{SourceCatalog, SourceDescriptor};
use crate::outcome::ErrorKind;
use crate::source::{Category, SourceId};

/// Logical request handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub category: Category,
    pub key: String,
}

impl FetchRequest {
    pub fn new(category: Category, key: impl Into<String>) -> Self {
        Self {
            category,
            key: key.into(),
        }
    }
}

/// Raw provider answer; classification of the status happens in the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Transport-level failure, already classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    kind: ErrorKind,
    message: String,
}

impl TransportError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerError, message)
    }

    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthFailed, message)
    }

    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl std::error::Error for TransportError {}

/// Network seam of the orchestrator.
pub trait Transport: Send + Sync {
    fn fetch<'a>(
        &'a self,
        descriptor: &'a SourceDescriptor,
        request: &'a FetchRequest,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<RawResponse, TransportError>> + Send + 'a>>;
}

/// Static credential attached to requests of one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpAuth {
    BearerToken(String),
    Header { name: String, value: String },
}

impl HttpAuth {
    pub fn api_key(value: impl Into<String>) -> Self {
        Self::Header {
            name: String::from("x-api-key"),
            value: value.into(),
        }
    }

    pub fn apply(&self, headers: &mut BTreeMap<String, String>) {
        match self {
            Self::BearerToken(token) => {
                headers.insert(String::from("authorization"), format!("Bearer {token}"));
            }
            Self::Header { name, value } => {
                headers.insert(name.to_ascii_lowercase(), value.clone());
            }
        }
    }
}

/// Environment variable holding the API key of `id`: `FERROFEED_<ID>_API_KEY`.
pub fn credential_env_var(id: &SourceId) -> String {
    format!("FERROFEED_{}_API_KEY", id.env_suffix())
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Arc<reqwest::Client>,
    credentials: HashMap<SourceId, HttpAuth>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::with_client(
            reqwest::Client::builder()
                .user_agent(concat!("ferrofeed/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        )
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: Arc::new(client),
            credentials: HashMap::new(),
        }
    }

    pub fn with_credential(mut self, id: SourceId, auth: HttpAuth) -> Self {
        self.credentials.insert(id, auth);
        self
    }

    /// Reads `FERROFEED_<ID>_API_KEY` for every auth-requiring source of `catalog`.
    pub fn with_env_credentials(self, catalog: &SourceCatalog) -> Self {
        self.with_credentials_from(catalog, |name| std::env::var(name).ok())
    }

    pub fn with_credentials_from<F>(mut self, catalog: &SourceCatalog, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        for descriptor in catalog.iter().filter(|d| d.requires_auth) {
            let Some(key) = lookup(&credential_env_var(&descriptor.id)) else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            self.credentials
                .insert(descriptor.id.clone(), HttpAuth::api_key(key));
        }
        self
    }

    pub fn has_credential(&self, id: &SourceId) -> bool {
        self.credentials.contains_key(id)
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for ReqwestTransport {
    fn fetch<'a>(
        &'a self,
        descriptor: &'a SourceDescriptor,
        request: &'a FetchRequest,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<RawResponse, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let auth = self.credentials.get(&descriptor.id);
            if descriptor.requires_auth && auth.is_none() {
                return Err(TransportError::auth_failed(format!(
                    "no credential configured (set {})",
                    credential_env_var(&descriptor.id)
                )));
            }

            let url = descriptor.render_endpoint(&request.key).ok_or_else(|| {
                TransportError::server_error(format!(
                    "source '{}' has no endpoint configured",
                    descriptor.id
                ))
            })?;

            let mut headers = BTreeMap::new();
            if let Some(auth) = auth {
                auth.apply(&mut headers);
            }

            let mut builder = self.client.get(&url).timeout(timeout);
            for (name, value) in &headers {
                builder = builder.header(name, value);
            }

            let response = builder.send().await.map_err(|err| {
                if err.is_timeout() {
                    TransportError::timeout(format!("request timeout: {err}"))
                } else if err.is_connect() {
                    TransportError::server_error(format!("connection failed: {err}"))
                } else {
                    TransportError::server_error(format!("request failed: {err}"))
                }
            })?;

            let status = response.status().as_u16();
            let body = response.text().await.map_err(|err| {
                if err.is_timeout() {
                    TransportError::timeout(format!("body read timeout: {err}"))
                } else {
                    TransportError::server_error(format!("failed to read response body: {err}"))
                }
            })?;

            Ok(RawResponse { status, body })
        })
    }
}

/// One scripted reaction of [`ScriptedTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    /// 200 with this body.
    Body(String),
    /// Transport error of this kind.
    Fail(ErrorKind),
    /// Empty response with this status.
    Status(u16),
    /// Never completes.
    Hang,
    /// 200 with `body` after `after`.
    Delayed { after: Duration, body: String },
}

impl ScriptStep {
    pub fn json(value: serde_json::Value) -> Self {
        Self::Body(value.to_string())
    }

    pub fn number(value: f64) -> Self {
        Self::json(serde_json::json!(value))
    }
}

/// In-memory transport replaying per-source scripts; for offline runs and tests.
///
/// Each source plays its steps in order and keeps repeating the last one.
/// Unscripted sources answer with `ServerError`.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<SourceId, VecDeque<ScriptStep>>>,
    calls: Mutex<Vec<SourceId>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the script of `id`.
    pub fn script(&self, id: &SourceId, steps: impl IntoIterator<Item = ScriptStep>) {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), steps.into_iter().collect());
    }

    pub fn with_script(self, id: &SourceId, steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        self.script(id, steps);
        self
    }

    pub fn calls(&self, id: &SourceId) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|called| *called == id)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Sources in the order they were called.
    pub fn call_order(&self) -> Vec<SourceId> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn next_step(&self, id: &SourceId) -> Option<ScriptStep> {
        let mut scripts = self.scripts.lock().unwrap_or_else(PoisonError::into_inner);
        let steps = scripts.get_mut(id)?;
        if steps.len() > 1 {
            steps.pop_front()
        } else {
            steps.front().cloned()
        }
    }
}

impl Transport for ScriptedTransport {
    fn fetch<'a>(
        &'a self,
        descriptor: &'a SourceDescriptor,
        _request: &'a FetchRequest,
        _timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<RawResponse, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(descriptor.id.clone());

            match self.next_step(&descriptor.id) {
                Some(ScriptStep::Body(body)) => Ok(RawResponse::ok(body)),
                Some(ScriptStep::Fail(kind)) => {
                    Err(TransportError::new(kind, format!("scripted {kind}")))
                }
                Some(ScriptStep::Status(status)) => Ok(RawResponse {
                    status,
                    body: String::new(),
                }),
                Some(ScriptStep::Hang) => futures::future::pending().await,
                Some(ScriptStep::Delayed { after, body }) => {
                    tokio::time::sleep(after).await;
                    Ok(RawResponse::ok(body))
                }
                None => Err(TransportError::server_error(format!(
                    "no script for source '{}'",
                    descriptor.id
                ))),
            }
        })
    }
}
