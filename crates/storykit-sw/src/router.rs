//! Per-request cache policy.
//!
//! Backend GETs go network-first and fall back to cache, then to a
//! synthesized offline JSON body. Every other GET goes cache-first; a failed
//! navigation falls back to the cached shell document. Anything else is not
//! intercepted.

use http::{Method, StatusCode};
use serde_json::json;
use storykit_core::StoryKitConfig;
use storykit_net::{Request, Response};
use tracing::{debug, trace, warn};
use url::Url;

use crate::cache::{CacheEntry, RequestIdentity};
use crate::scope::WorkerScope;
use crate::ServiceWorkerError;

/// Policy chosen for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Not intercepted; the host performs the request itself.
    Bypass,
    NetworkFirst,
    CacheFirst,
}

/// Where a routed response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    /// Cached shell document served for a failed navigation.
    OfflineFallback,
    /// Offline JSON built by the router.
    Synthesized,
}

/// Response produced by the router.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub response: Response,
    pub source: ResponseSource,
}

impl FetchResponse {
    fn from_cache(entry: &CacheEntry, source: ResponseSource) -> Self {
        Self {
            response: entry.to_response(),
            source,
        }
    }
}

/// Result of routing one fetch event.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The handler did not respond; the request goes to the network untouched.
    Passthrough,
    /// The handler responded.
    Respond(FetchResponse),
    /// Neither cache nor network could answer.
    NetworkError(String),
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&FetchResponse> {
        match self {
            FetchOutcome::Respond(r) => Some(r),
            _ => None,
        }
    }
}

/// Chooses and runs the cache policy for each request.
#[derive(Debug, Clone)]
pub struct CacheStrategyRouter {
    backend_origin: String,
    offline_fallback: Url,
}

impl CacheStrategyRouter {
    pub fn new(backend_origin: impl Into<String>, offline_fallback: Url) -> Self {
        Self {
            backend_origin: backend_origin.into(),
            offline_fallback,
        }
    }

    pub fn from_config(config: &StoryKitConfig) -> Result<Self, ServiceWorkerError> {
        let fallback = config
            .offline_fallback_url()
            .map_err(|e| ServiceWorkerError::Config(e.to_string()))?;
        Ok(Self::new(config.backend_origin(), fallback))
    }

    pub fn backend_origin(&self) -> &str {
        &self.backend_origin
    }

    /// Pick a policy. Origin comparison is exact.
    pub fn classify(&self, request: &Request) -> Policy {
        if !matches!(request.url.scheme(), "http" | "https") {
            return Policy::Bypass;
        }
        if request.method != Method::GET {
            return Policy::Bypass;
        }
        if request.url.origin().ascii_serialization() == self.backend_origin {
            Policy::NetworkFirst
        } else {
            Policy::CacheFirst
        }
    }

    /// Route one request. Network failures never escape as errors.
    pub async fn handle(&self, request: Request, scope: &WorkerScope) -> FetchOutcome {
        let policy = self.classify(&request);
        trace!(url = %request.url, method = %request.method, ?policy, "Routing fetch");

        let identity = match policy {
            Policy::Bypass => return FetchOutcome::Passthrough,
            _ => match RequestIdentity::for_request(&request) {
                Ok(identity) => identity,
                Err(_) => return FetchOutcome::Passthrough,
            },
        };

        match policy {
            Policy::NetworkFirst => self.network_first(request, identity, scope).await,
            Policy::CacheFirst => self.cache_first(request, identity, scope).await,
            Policy::Bypass => FetchOutcome::Passthrough,
        }
    }

    async fn network_first(
        &self,
        request: Request,
        identity: RequestIdentity,
        scope: &WorkerScope,
    ) -> FetchOutcome {
        let url = request.url.clone();
        match scope.fetcher().fetch(request).await {
            Ok(response) => {
                if response.ok() {
                    let cache = scope.current_cache().await;
                    let snapshot = response.clone();
                    scope.wait_until(async move {
                        cache.put(&identity, &snapshot).await;
                    });
                }
                FetchOutcome::Respond(FetchResponse {
                    response,
                    source: ResponseSource::Network,
                })
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Backend unreachable, trying cache");
                if let Some(entry) = self.lookup(&identity, scope).await {
                    return FetchOutcome::Respond(FetchResponse::from_cache(
                        &entry,
                        ResponseSource::Cache,
                    ));
                }
                FetchOutcome::Respond(FetchResponse {
                    response: offline_response(url),
                    source: ResponseSource::Synthesized,
                })
            }
        }
    }

    async fn cache_first(
        &self,
        request: Request,
        identity: RequestIdentity,
        scope: &WorkerScope,
    ) -> FetchOutcome {
        if let Some(entry) = self.lookup(&identity, scope).await {
            trace!(key = %identity, "Cache hit");
            return FetchOutcome::Respond(FetchResponse::from_cache(&entry, ResponseSource::Cache));
        }

        let navigation = request.is_navigation();
        let url = request.url.clone();
        match scope.fetcher().fetch(request).await {
            Ok(response) => {
                if response.ok() {
                    scope.current_cache().await.put(&identity, &response).await;
                }
                FetchOutcome::Respond(FetchResponse {
                    response,
                    source: ResponseSource::Network,
                })
            }
            Err(e) => {
                if navigation {
                    let fallback = RequestIdentity::get(&self.offline_fallback);
                    if let Some(entry) = self.lookup(&fallback, scope).await {
                        debug!(url = %url, "Serving offline shell for navigation");
                        return FetchOutcome::Respond(FetchResponse::from_cache(
                            &entry,
                            ResponseSource::OfflineFallback,
                        ));
                    }
                }
                warn!(url = %url, error = %e, "No cache entry and network failed");
                FetchOutcome::NetworkError(e.to_string())
            }
        }
    }

    /// Current generation first, then any other cache.
    async fn lookup(&self, identity: &RequestIdentity, scope: &WorkerScope) -> Option<CacheEntry> {
        if let Some(entry) = scope.current_cache().await.match_request(identity).await {
            return Some(entry);
        }
        scope.caches().match_request(identity).await
    }
}

/// Body returned when the backend is unreachable and nothing is cached.
pub fn offline_body() -> serde_json::Value {
    json!({ "error": true, "message": "Offline" })
}

fn offline_response(url: Url) -> Response {
    Response::json_response(url, StatusCode::OK, &offline_body())
}
