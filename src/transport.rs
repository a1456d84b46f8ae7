//! Remote API transport.
//!
//! `RemoteTransport` is the seam the entity adapters talk through when the
//! mode detector reports online; `HttpTransport` is the production
//! implementation over the ERP backend's REST API. Responses pass through
//! opaquely: the core only interprets HTTP-level failure, and maps a 404 on
//! an id-addressed call to `NotFound` so errors look the same in both modes.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use crate::error::{DataError, DataResult};

/// Default timeout for API requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// `GET {path}`: list a collection.
    async fn list(&self, path: &str) -> DataResult<Vec<Value>>;

    /// `GET {path}/{id}`.
    async fn get(&self, path: &str, id: &str) -> DataResult<Value>;

    /// `POST {path}`: returns the server's record verbatim, including the
    /// server-assigned identifier.
    async fn create(&self, path: &str, body: &Value) -> DataResult<Value>;

    /// `PUT {path}/{id}`.
    async fn update(&self, path: &str, id: &str, body: &Value) -> DataResult<Value>;

    /// `DELETE {path}/{id}`.
    async fn delete(&self, path: &str, id: &str) -> DataResult<Value>;

    /// `GET {path}` for entity-specific endpoints (RFID lookup, low-stock,
    /// dashboard aggregates).
    async fn fetch(&self, path: &str) -> DataResult<Value>;
}

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the backend base URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment (it is re-appended per request)
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    // Strip trailing /api
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    // Strip trailing slashes again (in case "/api/" was present)
    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach ERP backend at {url}");
    }
    if err.is_timeout() {
        return format!("Connection to {url} timed out");
    }
    if err.is_builder() {
        return format!("Invalid ERP backend URL: {url}");
    }
    format!("Network error communicating with {url}: {err}")
}

/// Convert an HTTP status code into a user-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "API token is invalid or expired".to_string(),
        403 => "Tenant not authorized".to_string(),
        404 => "ERP backend endpoint not found".to_string(),
        s if s >= 500 => format!("ERP backend server error (HTTP {s})"),
        s => format!("Unexpected response from ERP backend (HTTP {s})"),
    }
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

pub struct HttpTransport {
    client: Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: &str, api_token: Option<String>) -> DataResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| DataError::Transport {
                status: None,
                message: format!("Failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: normalize_base_url(base_url),
            api_token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{path}", self.base_url)
    }

    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> DataResult<Value> {
        let url = self.url(path);

        let mut req = self.client.request(method, &url);
        if let Some(token) = &self.api_token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await.map_err(|e| DataError::Transport {
            status: None,
            message: friendly_error(&self.base_url, &e),
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DataError::Transport {
                status: Some(status.as_u16()),
                message: status_error(status),
            });
        }

        let text = resp.text().await.map_err(|e| DataError::Transport {
            status: Some(status.as_u16()),
            message: format!("Failed to read response body: {e}"),
        })?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(DataError::from)
    }

    /// Map a 404 on an id-addressed call to `NotFound`, so the online path
    /// fails the same way an offline store miss does.
    async fn request_by_id(
        &self,
        method: Method,
        path: &str,
        id: &str,
        body: Option<&Value>,
    ) -> DataResult<Value> {
        match self.request(method, &format!("{path}/{id}"), body).await {
            Err(DataError::Transport {
                status: Some(404), ..
            }) => Err(DataError::not_found(path.trim_start_matches('/'), id)),
            other => other,
        }
    }
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    async fn list(&self, path: &str) -> DataResult<Vec<Value>> {
        let value = self.request(Method::GET, path, None).await?;
        Ok(coerce_list(path, value))
    }

    async fn get(&self, path: &str, id: &str) -> DataResult<Value> {
        self.request_by_id(Method::GET, path, id, None).await
    }

    async fn create(&self, path: &str, body: &Value) -> DataResult<Value> {
        self.request(Method::POST, path, Some(body)).await
    }

    async fn update(&self, path: &str, id: &str, body: &Value) -> DataResult<Value> {
        self.request_by_id(Method::PUT, path, id, Some(body)).await
    }

    async fn delete(&self, path: &str, id: &str) -> DataResult<Value> {
        self.request_by_id(Method::DELETE, path, id, None).await
    }

    async fn fetch(&self, path: &str) -> DataResult<Value> {
        self.request(Method::GET, path, None).await
    }
}

/// Accept either a bare array or an object wrapping one under `data`.
fn coerce_list(path: &str, value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("data") {
            Some(Value::Array(items)) => items,
            _ => {
                warn!(path, "expected a list response, got an object");
                Vec::new()
            }
        },
        _ => {
            warn!(path, "expected a list response");
            Vec::new()
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
