//! Client for the revision-tracked remote task list API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use reqwest::{header, Client, Method, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::instrument;
use url::Url;

use crate::credentials::CredentialProvider;
use crate::task::{Task, TaskId};
use crate::wire::{Element, ItemRequest, ItemResponse, ListRequest, ListResponse};

/// Header carrying the last revision this client saw.
pub const REVISION_HEADER: &str = "X-Last-Known-Revision";

/// Remote API failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("No connection to the server")]
    NoConnection,

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Unexpected response from server")]
    UnexpectedResponse,

    #[error("Bad request (400)")]
    BadRequest,

    #[error("Authorization failed (401)")]
    AuthError,

    #[error("Not found (404)")]
    NotFound,

    #[error("Server error ({0})")]
    ServerError(u16),

    #[error("Unexpected status code: {0}")]
    UnexpectedStatus(u16),
}

impl RemoteError {
    /// User-friendly error message for UI display.
    pub fn user_message(&self) -> String {
        match self {
            Self::NoConnection => "No internet connection".to_string(),
            Self::InvalidEndpoint(url) => format!("The url {} does not exist", url),
            Self::UnexpectedResponse => "Unexpected response from server".to_string(),
            Self::BadRequest => "Wrong request or unsynchronized data".to_string(),
            Self::AuthError => "Wrong authorization".to_string(),
            Self::NotFound => "Element not found".to_string(),
            Self::ServerError(_) => "Server error".to_string(),
            Self::UnexpectedStatus(code) => format!("Unexpected status code: {}", code),
        }
    }

    /// Whether a retry may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServerError(_) | Self::NoConnection)
    }

    /// Map a non-success status to its error; `None` for 2xx.
    pub fn from_status(status: StatusCode) -> Option<Self> {
        match status.as_u16() {
            200..=299 => None,
            400 => Some(Self::BadRequest),
            401 => Some(Self::AuthError),
            404 => Some(Self::NotFound),
            code @ 500..=599 => Some(Self::ServerError(code)),
            code => Some(Self::UnexpectedStatus(code)),
        }
    }

    fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_builder() {
            Self::InvalidEndpoint(err.url().map(Url::to_string).unwrap_or_default())
        } else if err.is_redirect() || err.is_decode() {
            Self::UnexpectedResponse
        } else {
            Self::NoConnection
        }
    }
}

/// Number of remote operations currently in progress.
#[derive(Debug, Clone)]
pub struct InFlightCounter {
    tx: Arc<watch::Sender<usize>>,
}

impl InFlightCounter {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    /// Count one operation until the returned guard drops.
    pub fn begin(&self) -> InFlightGuard {
        self.tx.send_modify(|count| *count += 1);
        InFlightGuard { tx: self.tx.clone() }
    }

    pub fn current(&self) -> usize {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.tx.subscribe()
    }
}

impl Default for InFlightCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight count when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    tx: Arc<watch::Sender<usize>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.tx.send_modify(|count| *count = count.saturating_sub(1));
    }
}

/// Connection settings for `RemoteClient`.
#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub base_url: String,
    pub device_id: String,
    pub request_timeout: Duration,
}

/// Remote task list client. Owns the revision token.
pub struct RemoteClient {
    base_url: Url,
    client: Client,
    credentials: Arc<dyn CredentialProvider>,
    device_id: String,
    revision: Mutex<i64>,
    in_flight: InFlightCounter,
}

impl RemoteClient {
    /// Create a client for `settings.base_url`.
    pub fn new(
        settings: RemoteSettings,
        credentials: Arc<dyn CredentialProvider>,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        // Url::join drops the last path segment unless it ends with '/'.
        let mut base = settings.base_url.trim_end_matches('/').to_string();
        base.push('/');
        let base_url =
            Url::parse(&base).with_context(|| format!("Invalid base URL: {}", settings.base_url))?;

        Ok(Self {
            base_url,
            client,
            credentials,
            device_id: settings.device_id,
            revision: Mutex::new(0),
            in_flight: InFlightCounter::new(),
        })
    }

    /// Last revision seen from the server (0 before the first response).
    pub fn revision(&self) -> i64 {
        *self.revision.lock()
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn in_flight(&self) -> &InFlightCounter {
        &self.in_flight
    }

    fn record_revision(&self, revision: Option<i64>) {
        if let Some(revision) = revision {
            *self.revision.lock() = revision;
            tracing::debug!("Revision -> {}", revision);
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        self.base_url
            .join(path)
            .map_err(|_| RemoteError::InvalidEndpoint(format!("{}{}", self.base_url, path)))
    }

    /// Send a request and check its status. Mutating methods carry the
    /// revision header.
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response, RemoteError> {
        let url = self.endpoint(path)?;
        let token = self.credentials.bearer_token()?;
        let mutating = method != Method::GET;

        let mut request = self
            .client
            .request(method.clone(), url)
            .header(header::AUTHORIZATION, format!("Bearer {}", token));
        if mutating {
            request = request.header(REVISION_HEADER, self.revision().to_string());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        tracing::debug!("{} /{}", method, path);
        let response = request.send().await.map_err(|e| {
            tracing::debug!("Transport error on {} /{}: {}", method, path, e);
            RemoteError::from_transport(&e)
        })?;

        match RemoteError::from_status(response.status()) {
            None => Ok(response),
            Some(err) => {
                tracing::debug!("{} /{} failed: {}", method, path, err);
                Err(err)
            }
        }
    }

    async fn list_call<B: Serialize + ?Sized>(
        &self,
        method: Method,
        body: Option<&B>,
    ) -> Result<Vec<Task>, RemoteError> {
        let response = self.send(method, "list", body).await?;
        let parsed: ListResponse =
            response.json().await.map_err(|_| RemoteError::UnexpectedResponse)?;
        self.record_revision(parsed.revision);
        Ok(parsed.into_tasks())
    }

    async fn item_call<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Option<Task>, RemoteError> {
        let response = self.send(method, path, body).await?;
        let parsed: ItemResponse =
            response.json().await.map_err(|_| RemoteError::UnexpectedResponse)?;
        self.record_revision(parsed.revision);
        Ok(parsed.into_task())
    }

    /// Fetch the whole list.
    #[instrument(skip(self), level = "debug")]
    pub async fn list(&self) -> Result<Vec<Task>, RemoteError> {
        let tasks = self.list_call::<ListRequest>(Method::GET, None).await?;
        tracing::info!("Fetched {} tasks (revision {})", tasks.len(), self.revision());
        Ok(tasks)
    }

    /// Fetch a single task.
    #[instrument(skip(self), level = "debug")]
    pub async fn get(&self, id: TaskId) -> Result<Option<Task>, RemoteError> {
        self.item_call::<ItemRequest>(Method::GET, &format!("list/{}", id), None).await
    }

    /// Replace the server list with `tasks`; returns the authoritative list.
    #[instrument(skip(self, tasks), fields(count = tasks.len()), level = "debug")]
    pub async fn replace_all(&self, tasks: &[Task]) -> Result<Vec<Task>, RemoteError> {
        let body = ListRequest {
            list: tasks.iter().map(|t| Element::from_task(t, &self.device_id)).collect(),
        };
        let merged = self.list_call(Method::PATCH, Some(&body)).await?;
        tracing::info!("Replaced server list, {} tasks back (revision {})", merged.len(), self.revision());
        Ok(merged)
    }

    #[instrument(skip(self, task), fields(id = %task.id), level = "debug")]
    pub async fn add(&self, task: &Task) -> Result<Option<Task>, RemoteError> {
        let body = ItemRequest { element: Element::from_task(task, &self.device_id) };
        self.item_call(Method::POST, "list", Some(&body)).await
    }

    #[instrument(skip(self, task), fields(id = %task.id), level = "debug")]
    pub async fn update(&self, task: &Task) -> Result<Option<Task>, RemoteError> {
        let body = ItemRequest { element: Element::from_task(task, &self.device_id) };
        self.item_call(Method::PUT, &format!("list/{}", task.id), Some(&body)).await
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn delete(&self, id: TaskId) -> Result<Option<Task>, RemoteError> {
        self.item_call::<ItemRequest>(Method::DELETE, &format!("list/{}", id), None).await
    }
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("base_url", &self.base_url.as_str())
            .field("device_id", &self.device_id)
            .field("revision", &self.revision())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use crate::credentials::StaticToken;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(base_url: &str) -> RemoteClient {
        RemoteClient::new(
            RemoteSettings {
                base_url: base_url.to_string(),
                device_id: "test-device".to_string(),
                request_timeout: Duration::from_secs(5),
            },
            Arc::new(StaticToken::new("secret")),
        )
        .unwrap()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(RemoteError::from_status(StatusCode::OK), None);
        assert_eq!(RemoteError::from_status(StatusCode::BAD_REQUEST), Some(RemoteError::BadRequest));
        assert_eq!(RemoteError::from_status(StatusCode::UNAUTHORIZED), Some(RemoteError::AuthError));
        assert_eq!(RemoteError::from_status(StatusCode::NOT_FOUND), Some(RemoteError::NotFound));
        assert_eq!(
            RemoteError::from_status(StatusCode::SERVICE_UNAVAILABLE),
            Some(RemoteError::ServerError(503))
        );
        assert_eq!(
            RemoteError::from_status(StatusCode::IM_A_TEAPOT),
            Some(RemoteError::UnexpectedStatus(418))
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(RemoteError::ServerError(500).is_retryable());
        assert!(RemoteError::NoConnection.is_retryable());
        assert!(!RemoteError::BadRequest.is_retryable());
        assert!(!RemoteError::AuthError.is_retryable());
        assert!(!RemoteError::NotFound.is_retryable());
        assert!(!RemoteError::UnexpectedResponse.is_retryable());
    }

    #[test]
    fn test_user_messages() {
        assert_eq!(RemoteError::BadRequest.user_message(), "Wrong request or unsynchronized data");
        assert_eq!(RemoteError::ServerError(502).user_message(), "Server error");
        assert_eq!(RemoteError::UnexpectedStatus(418).user_message(), "Unexpected status code: 418");
        assert!(RemoteError::InvalidEndpoint("x://".into()).user_message().contains("x://"));
    }

    #[test]
    fn test_in_flight_guard() {
        let counter = InFlightCounter::new();
        let rx = counter.subscribe();

        let first = counter.begin();
        let second = counter.begin();
        assert_eq!(counter.current(), 2);
        assert_eq!(*rx.borrow(), 2);

        drop(first);
        assert_eq!(counter.current(), 1);
        drop(second);
        assert_eq!(counter.current(), 0);
    }

    #[tokio::test]
    async fn test_get_sends_auth_without_revision() {
        let mock_server = MockServer::start().await;
        let task = Task::new("Remote", crate::task::Importance::Normal).unwrap();

        Mock::given(method("GET"))
            .and(path(format!("/list/{}", task.id)))
            .and(header("Authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "ok",
                "element": Element::from_task(&task, "other-device"),
                "revision": 12
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server.uri());
        let fetched = client.get(task.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, task.id);
        assert_eq!(client.revision(), 12);

        let requests = mock_server.received_requests().await.unwrap();
        assert!(requests[0].headers.get(REVISION_HEADER).is_none());
    }

    #[tokio::test]
    async fn test_base_url_with_path_prefix() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/list"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status": "ok", "list": []})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = client_for(&format!("{}/api", mock_server.uri()));
        assert!(client.list().await.unwrap().is_empty());
        assert_eq!(client.revision(), 0);
    }

    #[tokio::test]
    async fn test_connection_refused_is_no_connection() {
        // Nothing listens on port 9 (discard) in the test environment.
        let client = client_for("http://127.0.0.1:9");
        assert_eq!(client.list().await.unwrap_err(), RemoteError::NoConnection);
    }
}
