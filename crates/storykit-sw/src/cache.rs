//! Versioned named caches.
//!
//! A [`CacheStorage`] holds one [`Cache`] per generation name. Handles are
//! cheap clones over shared state, so a cache write can be moved into a
//! background task while the caller keeps serving.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use hashbrown::HashMap;
use http::Method;
use serde::{Deserialize, Serialize};
use storykit_net::{Fetcher, Request, Response};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::ServiceWorkerError;

// ==================== Request Identity ====================

/// Canonical cache key: method plus absolute URL without fragment.
///
/// Only retrieval-safe requests have an identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestIdentity {
    method: Method,
    url: Url,
}

impl RequestIdentity {
    /// Identity of a GET for `url`.
    pub fn get(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: Method::GET,
            url,
        }
    }

    /// Identity of a request; fails for anything but GET.
    pub fn for_request(request: &Request) -> Result<Self, ServiceWorkerError> {
        if request.method != Method::GET {
            return Err(ServiceWorkerError::CacheError(format!(
                "{} requests are not cacheable",
                request.method
            )));
        }
        Ok(Self::get(&request.url))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RequestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

// ==================== Cache Entry ====================

/// Snapshot of a response at the time it was captured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: Url,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers, repeated names kept in order.
    pub headers: Vec<(String, String)>,

    /// Response body.
    pub body: Vec<u8>,

    /// When the snapshot was taken.
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    fn capture(identity: &RequestIdentity, response: &Response) -> Self {
        Self {
            url: identity.url.clone(),
            method: identity.method.to_string(),
            status: response.status.as_u16(),
            headers: response.header_pairs(),
            body: response.body().to_vec(),
            cached_at: Utc::now(),
        }
    }

    /// Rebuild a response from the snapshot.
    pub fn to_response(&self) -> Response {
        Response::from_parts(
            self.url.clone(),
            self.status,
            self.headers.iter().map(|(name, value)| (name, value)),
            self.body.clone(),
        )
    }
}

// ==================== Cache ====================

/// Handle to one named cache.
#[derive(Debug, Clone)]
pub struct Cache {
    name: Arc<str>,
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl Cache {
    fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Cache (generation) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Match a request.
    pub async fn match_request(&self, identity: &RequestIdentity) -> Option<CacheEntry> {
        self.entries.read().await.get(&identity.key()).cloned()
    }

    /// Store a response snapshot. Non-2xx responses are refused.
    ///
    /// Returns whether the entry was written.
    pub async fn put(&self, identity: &RequestIdentity, response: &Response) -> bool {
        if !response.ok() {
            debug!(cache = %self.name, key = %identity, status = %response.status, "Refusing to cache error response");
            return false;
        }
        let entry = CacheEntry::capture(identity, response);
        self.entries.write().await.insert(identity.key(), entry);
        debug!(cache = %self.name, key = %identity, "Cached response");
        true
    }

    /// Fetch every URL and store all of them, or store nothing.
    ///
    /// Any transport failure or non-2xx status fails the whole seed.
    pub async fn seed(&self, fetcher: &dyn Fetcher, urls: &[Url]) -> Result<usize, ServiceWorkerError> {
        let fetches = urls.iter().map(|url| async move {
            let identity = RequestIdentity::get(url);
            let response = fetcher
                .fetch(Request::get(url.clone()))
                .await
                .map_err(|e| ServiceWorkerError::NetworkError(format!("{url}: {e}")))?;
            if !response.ok() {
                return Err(ServiceWorkerError::NetworkError(format!(
                    "{url}: status {}",
                    response.status
                )));
            }
            Ok((identity.key(), CacheEntry::capture(&identity, &response)))
        });

        let captured = try_join_all(fetches).await.map_err(|e| {
            warn!(cache = %self.name, error = %e, "Seeding aborted, nothing written");
            e
        })?;

        let count = captured.len();
        let mut entries = self.entries.write().await;
        for (key, entry) in captured {
            entries.insert(key, entry);
        }
        info!(cache = %self.name, count, "Seeded cache");
        Ok(count)
    }

    /// Delete entry.
    pub async fn delete(&self, identity: &RequestIdentity) -> bool {
        self.entries.write().await.remove(&identity.key()).is_some()
    }

    /// URLs of all cached entries, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut urls: Vec<String> = self
            .entries
            .read()
            .await
            .values()
            .map(|e| e.url.to_string())
            .collect();
        urls.sort();
        urls
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

// ==================== Cache Storage ====================

/// All named caches of one origin.
#[derive(Debug, Clone, Default)]
pub struct CacheStorage {
    caches: Arc<RwLock<HashMap<String, Cache>>>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache (creates if doesn't exist).
    pub async fn open(&self, name: &str) -> Cache {
        if let Some(cache) = self.caches.read().await.get(name) {
            return cache.clone();
        }
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
            .clone()
    }

    /// Check if cache exists.
    pub async fn has(&self, name: &str) -> bool {
        self.caches.read().await.contains_key(name)
    }

    /// Delete a cache. Returns false if it did not exist.
    pub async fn delete(&self, name: &str) -> bool {
        self.caches.write().await.remove(name).is_some()
    }

    /// All generation names, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Match across all caches, in name order.
    pub async fn match_request(&self, identity: &RequestIdentity) -> Option<CacheEntry> {
        let caches: Vec<Cache> = {
            let guard = self.caches.read().await;
            let mut caches: Vec<Cache> = guard.values().cloned().collect();
            caches.sort_by(|a, b| a.name.cmp(&b.name));
            caches
        };
        for cache in caches {
            if let Some(entry) = cache.match_request(identity).await {
                return Some(entry);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedFetcher;
    use bytes::Bytes;
    use http::{HeaderMap, StatusCode};

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn response(u: &str, status: u16, body: &str) -> Response {
        Response::new(
            url(u),
            StatusCode::from_u16(status).unwrap(),
            HeaderMap::new(),
            Bytes::from(body.to_string()),
        )
    }

    #[test]
    fn test_identity_rejects_non_get() {
        let request = Request::post(url("https://example.com/a"), Bytes::new());
        assert!(RequestIdentity::for_request(&request).is_err());

        let request = Request::get(url("https://example.com/a#frag"));
        let identity = RequestIdentity::for_request(&request).unwrap();
        assert_eq!(identity.to_string(), "GET https://example.com/a");
    }

    #[tokio::test]
    async fn test_put_and_match() {
        let storage = CacheStorage::new();
        let cache = storage.open("v1").await;
        let id = RequestIdentity::get(&url("https://example.com/style.css"));

        assert!(cache.put(&id, &response("https://example.com/style.css", 200, "body{}")).await);
        let entry = cache.match_request(&id).await.unwrap();
        assert_eq!(entry.status, 200);
        assert_eq!(entry.body, b"body{}");

        let other = RequestIdentity::get(&url("https://example.com/other.css"));
        assert!(cache.match_request(&other).await.is_none());
    }

    #[tokio::test]
    async fn test_put_refuses_errors() {
        let cache = CacheStorage::new().open("v1").await;
        let id = RequestIdentity::get(&url("https://example.com/missing"));

        assert!(!cache.put(&id, &response("https://example.com/missing", 404, "nope")).await);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_put_overwrites_snapshot() {
        let cache = CacheStorage::new().open("v1").await;
        let id = RequestIdentity::get(&url("https://example.com/data"));

        cache.put(&id, &response("https://example.com/data", 200, "one")).await;
        cache.put(&id, &response("https://example.com/data", 200, "two")).await;

        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.match_request(&id).await.unwrap().body, b"two");
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let storage = CacheStorage::new();
        let first = storage.open("v1").await;
        let id = RequestIdentity::get(&url("https://example.com/a"));
        first.put(&id, &response("https://example.com/a", 200, "a")).await;

        let second = storage.open("v1").await;
        assert!(second.match_request(&id).await.is_some());
        assert_eq!(storage.keys().await, vec!["v1".to_string()]);
    }

    #[tokio::test]
    async fn test_storage_delete_and_keys() {
        let storage = CacheStorage::new();
        storage.open("v2").await;
        storage.open("v1").await;
        assert_eq!(storage.keys().await, vec!["v1".to_string(), "v2".to_string()]);

        assert!(storage.delete("v1").await);
        assert!(!storage.delete("v1").await);
        assert!(!storage.has("v1").await);
        assert_eq!(storage.keys().await, vec!["v2".to_string()]);
    }

    #[tokio::test]
    async fn test_seed_all_or_nothing() {
        let fetcher = ScriptedFetcher::new();
        fetcher.respond("https://example.com/", 200, "<shell>");
        fetcher.respond("https://example.com/app.js", 200, "js");
        fetcher.fail("https://example.com/map.css");

        let cache = CacheStorage::new().open("v1").await;
        let urls = vec![
            url("https://example.com/"),
            url("https://example.com/app.js"),
            url("https://example.com/map.css"),
        ];

        assert!(cache.seed(&fetcher, &urls).await.is_err());
        assert!(cache.is_empty().await);

        fetcher.respond("https://example.com/map.css", 200, "css");
        assert_eq!(cache.seed(&fetcher, &urls).await.unwrap(), 3);
        assert_eq!(cache.keys().await.len(), 3);
    }

    #[tokio::test]
    async fn test_seed_rejects_error_status() {
        let fetcher = ScriptedFetcher::new();
        fetcher.respond("https://example.com/", 500, "oops");

        let cache = CacheStorage::new().open("v1").await;
        let result = cache.seed(&fetcher, &[url("https://example.com/")]).await;
        assert!(matches!(result, Err(ServiceWorkerError::NetworkError(_))));
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_entry_round_trips_to_response() {
        let cache = CacheStorage::new().open("v1").await;
        let id = RequestIdentity::get(&url("https://example.com/a.json"));
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        let original = Response::new(url("https://example.com/a.json"), StatusCode::OK, headers, "{}");

        cache.put(&id, &original).await;
        let restored = cache.match_request(&id).await.unwrap().to_response();

        assert_eq!(restored.status, StatusCode::OK);
        assert_eq!(restored.headers["content-type"], "application/json");
        assert_eq!(restored.text().unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_repeated_headers_survive_snapshot() {
        let cache = CacheStorage::new().open("v1").await;
        let id = RequestIdentity::get(&url("https://example.com/session"));
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", "a=1".parse().unwrap());
        headers.append("set-cookie", "b=2".parse().unwrap());
        headers.append("vary", "accept".parse().unwrap());
        let original = Response::new(url("https://example.com/session"), StatusCode::OK, headers, "ok");

        cache.put(&id, &original).await;
        let restored = cache.match_request(&id).await.unwrap().to_response();

        let cookies: Vec<_> = restored
            .headers
            .get_all("set-cookie")
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
        assert_eq!(restored.headers["vary"], "accept");
    }
}
