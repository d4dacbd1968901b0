//! # StoryKit Net
//!
//! HTTP request/response model and the network port used by the offline
//! proxy and the push backend client.
//!
//! ## Design Goals
//!
//! 1. **Fully buffered responses**: a response is a snapshot that can be
//!    cloned into a cache and returned to the caller at the same time
//! 2. **Pluggable transport**: the worker depends on [`Fetcher`], not on
//!    `reqwest`, so hosts and tests can supply their own network
//! 3. **Browser request metadata**: mode and destination travel with the
//!    request so the router can recognise navigations

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use mime::Mime;
use storykit_common::StoryKitError;
use thiserror::Error;
use url::Url;

pub mod loader;

pub use loader::{LoaderConfig, ResourceLoader};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network unreachable: {0}")]
    Unreachable(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl From<NetError> for StoryKitError {
    fn from(err: NetError) -> Self {
        StoryKitError::network_with_source("fetch failed", err)
    }
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Request mode, as seen by a fetch handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level or frame navigation.
    Navigate,
    SameOrigin,
    NoCors,
    #[default]
    Cors,
}

/// What the requested resource will be used as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestDestination {
    Document,
    Script,
    Style,
    Image,
    Font,
    Manifest,
    /// `fetch()` / XHR.
    #[default]
    Empty,
}

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
    pub mode: RequestMode,
    pub destination: RequestDestination,
}

impl Request {
    fn with_method(method: Method, url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            mode: RequestMode::default(),
            destination: RequestDestination::default(),
        }
    }

    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::with_method(Method::GET, url)
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        let mut request = Self::with_method(Method::POST, url);
        request.body = Some(body);
        request
    }

    /// Create a DELETE request.
    pub fn delete(url: Url) -> Self {
        Self::with_method(Method::DELETE, url)
    }

    /// Create a top-level navigation request for a document.
    pub fn navigate(url: Url) -> Self {
        let mut request = Self::get(url);
        request.mode = RequestMode::Navigate;
        request.destination = RequestDestination::Document;
        request
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Attach a JSON body and content type.
    pub fn json<T: serde::Serialize>(mut self, value: &T) -> Result<Self, NetError> {
        let body = serde_json::to_vec(value).map_err(|e| NetError::RequestFailed(e.to_string()))?;
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.body = Some(Bytes::from(body));
        Ok(self)
    }

    /// Add an `Authorization: Bearer` header.
    pub fn bearer(self, token: &str) -> Result<Self, NetError> {
        let value = HeaderValue::try_from(format!("Bearer {token}"))
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;
        Ok(self.header(header::AUTHORIZATION, value))
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Whether this request loads a page rather than a subresource.
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate || self.destination == RequestDestination::Document
    }
}

/// HTTP response with a fully buffered body.
#[derive(Debug, Clone)]
pub struct Response {
    pub request_id: Option<RequestId>,
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub content_type: Option<Mime>,
    body: Bytes,
}

impl Response {
    /// Build a response from parts.
    pub fn new(url: Url, status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<Mime>().ok());

        Self {
            request_id: None,
            url,
            status,
            headers,
            content_type,
            body: body.into(),
        }
    }

    /// Build a JSON response.
    pub fn json_response(url: Url, status: StatusCode, value: &serde_json::Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Self::new(url, status, headers, value.to_string())
    }

    /// Rebuild a response from string header pairs, skipping invalid ones.
    pub fn from_parts<K, V>(
        url: Url,
        status: u16,
        headers: impl IntoIterator<Item = (K, V)>,
        body: impl Into<Bytes>,
    ) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_ref()),
                HeaderValue::try_from(value.as_ref()),
            ) {
                map.append(n, v);
            }
        }
        Self::new(url, status, map, body)
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Header pairs as owned strings, in order and with repeats kept;
    /// non-UTF-8 values are dropped.
    pub fn header_pairs(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect()
    }

    /// Borrow the body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Get the body as bytes.
    pub fn bytes(&self) -> Bytes {
        self.body.clone()
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    /// Get the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}

/// Network port: everything that leaves the process goes through here.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform the request. Transport failures are errors; HTTP error
    /// statuses are successful fetches with a non-2xx status.
    async fn fetch(&self, request: Request) -> Result<Response, NetError>;
}
