//! Scripted network for tests and offline demos.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use storykit_net::{Fetcher, NetError, Request, Response};
use url::Url;

#[derive(Debug, Clone)]
enum Script {
    Respond { status: u16, body: Bytes, json: bool },
    Fail,
}

#[derive(Debug, Default)]
struct State {
    scripts: HashMap<String, Script>,
    offline: bool,
    calls: Vec<(Method, Url)>,
}

/// A [`Fetcher`] answering from a per-URL script.
///
/// Unscripted URLs answer 404. While offline every fetch fails as
/// unreachable, scripted or not.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    state: Mutex<State>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn key(url: &str) -> String {
        match Url::parse(url) {
            Ok(mut parsed) => {
                parsed.set_fragment(None);
                parsed.into()
            }
            Err(_) => url.to_string(),
        }
    }

    /// Answer `url` with `status` and a text body.
    pub fn respond(&self, url: &str, status: u16, body: &str) {
        self.lock().scripts.insert(
            Self::key(url),
            Script::Respond {
                status,
                body: Bytes::from(body.to_string()),
                json: false,
            },
        );
    }

    /// Answer `url` with `status` and a JSON body.
    pub fn respond_json(&self, url: &str, status: u16, value: &serde_json::Value) {
        self.lock().scripts.insert(
            Self::key(url),
            Script::Respond {
                status,
                body: Bytes::from(value.to_string()),
                json: true,
            },
        );
    }

    /// Make `url` fail at the transport level.
    pub fn fail(&self, url: &str) {
        self.lock().scripts.insert(Self::key(url), Script::Fail);
    }

    /// Toggle connectivity.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Every request seen, in order.
    pub fn calls(&self) -> Vec<(Method, Url)> {
        self.lock().calls.clone()
    }

    /// Requests seen for `url`.
    pub fn call_count(&self, url: &str) -> usize {
        let key = Self::key(url);
        self.lock()
            .calls
            .iter()
            .filter(|(_, u)| u.as_str() == key)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.len()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        let mut url = request.url.clone();
        url.set_fragment(None);

        let script = {
            let mut state = self.lock();
            state.calls.push((request.method.clone(), url.clone()));
            if state.offline {
                return Err(NetError::Unreachable(format!("offline: {url}")));
            }
            state.scripts.get(url.as_str()).cloned()
        };

        match script {
            Some(Script::Respond { status, body, json }) => {
                let mut headers = HeaderMap::new();
                let content_type = if json {
                    "application/json"
                } else {
                    "text/plain; charset=utf-8"
                };
                headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
                let status = StatusCode::from_u16(status)
                    .map_err(|e| NetError::RequestFailed(e.to_string()))?;
                let mut response = Response::new(url, status, headers, body);
                response.request_id = Some(request.id);
                Ok(response)
            }
            Some(Script::Fail) => Err(NetError::Unreachable(format!("scripted failure: {url}"))),
            None => Ok(Response::new(url, StatusCode::NOT_FOUND, HeaderMap::new(), Bytes::new())),
        }
    }
}
