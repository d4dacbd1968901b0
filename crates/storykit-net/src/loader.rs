//! `reqwest`-backed network fetcher.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, trace};

use crate::{Fetcher, NetError, Request, Response};

/// Resource loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Default timeout.
    pub default_timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: "StoryKit/1.0".to_string(),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// Resource loader for fetching URLs over the real network.
#[derive(Debug, Clone)]
pub struct ResourceLoader {
    client: Client,
    config: LoaderConfig,
}

impl ResourceLoader {
    /// Create a new resource loader.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.default_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(user_agent = %config.user_agent, "ResourceLoader initialized");

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }
}

#[async_trait]
impl Fetcher for ResourceLoader {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());

        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }

        if let Some(timeout) = request.timeout {
            req_builder = req_builder.timeout(timeout);
        }

        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                NetError::Timeout(request.timeout.unwrap_or(self.config.default_timeout))
            } else if e.is_connect() {
                NetError::Unreachable(e.to_string())
            } else {
                NetError::HttpError(e)
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await?;

        trace!(
            url = %url,
            status = %status,
            body_len = body.len(),
            "Response received"
        );

        let mut response = Response::new(url, status, headers, body);
        response.request_id = Some(request.id);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn loader() -> ResourceLoader {
        ResourceLoader::new(LoaderConfig::default()).unwrap()
    }

    #[test]
    fn test_loader_config_default() {
        let config = LoaderConfig::default();
        assert_eq!(config.user_agent, "StoryKit/1.0");
        assert_eq!(config.max_redirects, 10);
    }

    #[tokio::test]
    async fn test_fetch_get() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.html"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<html></html>"),
            )
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/index.html", server.uri())).unwrap();
        let request = Request::get(url);
        let id = request.id;
        let response = loader().fetch(request).await.unwrap();

        assert!(response.ok());
        assert_eq!(response.request_id, Some(id));
        assert_eq!(response.text().unwrap(), "<html></html>");
        assert_eq!(response.content_type, Some(mime::TEXT_HTML));
    }

    #[tokio::test]
    async fn test_fetch_post_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/notifications/subscribe"))
            .and(header("authorization", "Bearer token-1"))
            .and(body_json(json!({"endpoint": "https://push/1"})))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/v1/notifications/subscribe", server.uri())).unwrap();
        let request = Request::post(url, Bytes::new())
            .json(&json!({"endpoint": "https://push/1"}))
            .unwrap()
            .bearer("token-1")
            .unwrap();

        let response = loader().fetch(request).await.unwrap();
        assert_eq!(response.status.as_u16(), 201);
    }

    #[tokio::test]
    async fn test_error_status_is_not_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/broken", server.uri())).unwrap();
        let response = loader().fetch(Request::get(url)).await.unwrap();
        assert!(!response.ok());
    }

    #[tokio::test]
    async fn test_unreachable_host() {
        let server = MockServer::start().await;
        let url = Url::parse(&format!("{}/gone", server.uri())).unwrap();
        drop(server);

        let result = loader().fetch(Request::get(url)).await;
        assert!(result.is_err());
    }
}
