//! End-to-end offline behaviour of the worker container

use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use serde_json::json;
use storykit_core::StoryKitConfig;
use storykit_net::Request;
use storykit_sw::testing::ScriptedFetcher;
use storykit_sw::{
    FetchOutcome, RequestIdentity, ResponseSource, ServiceWorkerContainer, ServiceWorkerState,
};
use url::Url;

const STORIES: &str = "https://story-api.dicoding.dev/v1/stories";
const SHELL: &str = "http://localhost:8080/index.html";

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

fn online_fetcher(config: &StoryKitConfig) -> Arc<ScriptedFetcher> {
    let fetcher = Arc::new(ScriptedFetcher::new());
    for entry in config.manifest_urls().unwrap() {
        fetcher.respond(entry.as_str(), 200, &format!("asset {entry}"));
    }
    fetcher
}

async fn started() -> (ServiceWorkerContainer, Arc<ScriptedFetcher>) {
    let config = StoryKitConfig::default();
    let fetcher = online_fetcher(&config);
    let (container, _events) = ServiceWorkerContainer::new(config, fetcher.clone()).unwrap();
    container.start().await.unwrap();
    (container, fetcher)
}

fn responded(outcome: FetchOutcome) -> (storykit_net::Response, ResponseSource) {
    match outcome {
        FetchOutcome::Respond(r) => (r.response, r.source),
        other => panic!("expected a response, got {other:?}"),
    }
}

#[tokio::test]
async fn install_then_activate_evicts_old_generations() {
    let config = StoryKitConfig::default();
    let fetcher = online_fetcher(&config);
    let (container, _events) = ServiceWorkerContainer::new(config, fetcher).unwrap();

    let old = container.scope().caches().open("our-story-v1").await;
    old.put(
        &RequestIdentity::get(&url("http://localhost:8080/")),
        &storykit_net::Response::from_parts(
            url("http://localhost:8080/"),
            200,
            Vec::<(String, String)>::new(),
            "stale shell",
        ),
    )
    .await;

    let report = container.start().await.unwrap();
    assert_eq!(report.entries, 4);
    assert_eq!(
        report.activation.unwrap().evicted,
        vec!["our-story-v1".to_string()]
    );
    assert_eq!(container.state(), ServiceWorkerState::Activated);
    assert_eq!(
        container.scope().caches().keys().await,
        vec!["our-story-v2".to_string()]
    );
}

#[tokio::test]
async fn network_first_mirrors_live_response() {
    let (container, fetcher) = started().await;
    fetcher.respond_json(STORIES, 200, &json!({"error": false, "listStory": [1, 2]}));

    let (response, source) = responded(container.fetch(Request::get(url(STORIES))).await);
    assert_eq!(source, ResponseSource::Network);
    assert_eq!(response.status, StatusCode::OK);

    container.settle().await;
    let cached = container
        .scope()
        .current_cache()
        .await
        .match_request(&RequestIdentity::get(&url(STORIES)))
        .await
        .expect("mirrored");
    assert_eq!(cached.body, response.bytes().to_vec());
}

#[tokio::test]
async fn network_first_serves_cache_when_offline() {
    let (container, fetcher) = started().await;
    fetcher.respond_json(STORIES, 200, &json!({"listStory": ["cached"]}));
    container.fetch(Request::get(url(STORIES))).await;
    container.settle().await;

    fetcher.set_offline(true);
    let (response, source) = responded(container.fetch(Request::get(url(STORIES))).await);
    assert_eq!(source, ResponseSource::Cache);
    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body, json!({"listStory": ["cached"]}));
}

#[tokio::test]
async fn network_first_synthesizes_offline_json() {
    let (container, fetcher) = started().await;
    fetcher.set_offline(true);

    let (response, source) = responded(container.fetch(Request::get(url(STORIES))).await);
    assert_eq!(source, ResponseSource::Synthesized);
    assert_eq!(
        response.content_type.as_ref().map(|m| m.essence_str().to_string()),
        Some("application/json".to_string())
    );
    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body, json!({"error": true, "message": "Offline"}));
}

#[tokio::test]
async fn network_first_does_not_mirror_errors() {
    let (container, fetcher) = started().await;
    fetcher.respond(STORIES, 401, r#"{"error":true,"message":"Missing authentication"}"#);

    let (response, _) = responded(container.fetch(Request::get(url(STORIES))).await);
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    container.settle().await;

    let cached = container
        .scope()
        .caches()
        .match_request(&RequestIdentity::get(&url(STORIES)))
        .await;
    assert!(cached.is_none());
}

#[tokio::test]
async fn cache_first_hit_skips_network() {
    let (container, fetcher) = started().await;
    let before = fetcher.call_count(SHELL);

    let (response, source) = responded(container.fetch(Request::get(url(SHELL))).await);
    assert_eq!(source, ResponseSource::Cache);
    assert_eq!(response.text().unwrap(), format!("asset {SHELL}"));
    assert_eq!(fetcher.call_count(SHELL), before);
}

#[tokio::test]
async fn cache_first_miss_caches_success_only() {
    let (container, fetcher) = started().await;
    let image = "https://picsum.photos/200";
    let missing = "http://localhost:8080/missing.png";
    fetcher.respond(image, 200, "png");

    let (_, source) = responded(container.fetch(Request::get(url(image))).await);
    assert_eq!(source, ResponseSource::Network);
    let (response, _) = responded(container.fetch(Request::get(url(image))).await);
    assert_eq!(response.bytes(), Bytes::from("png"));
    assert_eq!(fetcher.call_count(image), 1);

    let (response, source) = responded(container.fetch(Request::get(url(missing))).await);
    assert_eq!(source, ResponseSource::Network);
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    container.fetch(Request::get(url(missing))).await;
    assert_eq!(fetcher.call_count(missing), 2);
}

#[tokio::test]
async fn failed_navigation_falls_back_to_shell() {
    let (container, fetcher) = started().await;
    fetcher.set_offline(true);

    let page = url("http://localhost:8080/about");
    let (response, source) = responded(container.fetch(Request::navigate(page)).await);
    assert_eq!(source, ResponseSource::OfflineFallback);
    assert_eq!(response.text().unwrap(), format!("asset {SHELL}"));
}

#[tokio::test]
async fn failed_subresource_is_a_network_error() {
    let (container, fetcher) = started().await;
    fetcher.set_offline(true);

    let outcome = container
        .fetch(Request::get(url("http://localhost:8080/app.js")))
        .await;
    assert!(matches!(outcome, FetchOutcome::NetworkError(_)));
}

#[tokio::test]
async fn non_get_is_not_intercepted() {
    let (container, fetcher) = started().await;
    let before = fetcher.total_calls();

    let post = Request::post(url(STORIES), Bytes::from_static(b"{}"));
    assert!(matches!(container.fetch(post).await, FetchOutcome::Passthrough));
    assert_eq!(fetcher.total_calls(), before);
}
