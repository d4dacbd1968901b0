//! StoryKit Smoke Harness
//!
//! Starts the offline worker against the real network, routes the given URLs
//! through it, and prints a JSON summary. With `--push-status` it also
//! reports the persisted push subscription state.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use storykit_common::{init_logging, LogConfig, ResultExt, StoryKitError};
use storykit_core::StoryKitConfig;
use storykit_net::{LoaderConfig, Request, ResourceLoader};
use storykit_push::{PushSubscriptionManager, RegistrationPushPlatform, SqliteStore, StoryApiClient};
use storykit_sw::{FetchOutcome, ServiceWorkerContainer, ServiceWorkerState};
use tracing::{error, info, warn};
use url::Url;

/// Parse command line arguments
struct Args {
    config: Option<PathBuf>,
    urls: Vec<String>,
    navigations: Vec<String>,
    summary_output: Option<String>,
    push_status: bool,
    verbose: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;
        let mut urls = Vec::new();
        let mut navigations = Vec::new();
        let mut summary_output = None;
        let mut push_status = false;
        let mut verbose = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    config = args.next().map(PathBuf::from);
                }
                "--url" => {
                    if let Some(val) = args.next() {
                        urls.push(val);
                    }
                }
                "--navigate" => {
                    if let Some(val) = args.next() {
                        navigations.push(val);
                    }
                }
                "--summary-output" => {
                    summary_output = args.next();
                }
                "--push-status" => {
                    push_status = true;
                }
                "--verbose" => {
                    verbose = true;
                }
                other => {
                    eprintln!("Warning: ignoring unknown argument {}", other);
                }
            }
        }

        Self {
            config,
            urls,
            navigations,
            summary_output,
            push_status,
            verbose,
        }
    }
}

fn describe(url: &str, outcome: &FetchOutcome, elapsed_ms: f64) -> serde_json::Value {
    let elapsed_ms = (elapsed_ms * 100.0).round() / 100.0;
    match outcome {
        FetchOutcome::Passthrough => json!({
            "url": url,
            "outcome": "passthrough",
            "elapsed_ms": elapsed_ms,
        }),
        FetchOutcome::Respond(r) => json!({
            "url": url,
            "outcome": "respond",
            "source": format!("{:?}", r.source),
            "status": r.response.status.as_u16(),
            "bytes": r.response.body().len(),
            "elapsed_ms": elapsed_ms,
        }),
        FetchOutcome::NetworkError(message) => json!({
            "url": url,
            "outcome": "network_error",
            "error": message,
            "elapsed_ms": elapsed_ms,
        }),
    }
}

async fn run(args: Args) -> storykit_common::Result<serde_json::Value> {
    let config = StoryKitConfig::load_or_default(args.config.as_deref())?;
    info!(
        api = %config.api_base_url,
        scope = %config.scope,
        generation = %config.cache.generation,
        "Configuration loaded"
    );

    let loader = ResourceLoader::new(LoaderConfig {
        user_agent: config.user_agent.clone(),
        default_timeout: config.request_timeout(),
        ..LoaderConfig::default()
    })?;
    let fetcher = Arc::new(loader);

    let (container, _events) = ServiceWorkerContainer::new(config.clone(), fetcher.clone())?;
    let container = Arc::new(container);

    let started = Instant::now();
    let start = match container.start().await {
        Ok(report) => json!({
            "entries": report.entries,
            "evicted": report.activation.map(|a| a.evicted).unwrap_or_default(),
            "elapsed_ms": started.elapsed().as_millis() as u64,
        }),
        Err(e) => {
            warn!(error = %e, "Worker failed to start; fetches will bypass the shell cache");
            json!({ "error": e.to_string() })
        }
    };

    let mut fetches = Vec::new();
    let requests = args
        .urls
        .iter()
        .map(|u| (u, false))
        .chain(args.navigations.iter().map(|u| (u, true)));
    for (raw, navigate) in requests {
        let url = Url::parse(raw).context(format!("invalid URL {raw}"))?;
        let request = if navigate {
            Request::navigate(url)
        } else {
            Request::get(url)
        };
        let began = Instant::now();
        let outcome = container.fetch(request).await;
        fetches.push(describe(
            raw,
            &outcome,
            began.elapsed().as_secs_f64() * 1000.0,
        ));
    }

    let settled = container.settle().await;

    let push = if args.push_status {
        if container.state() != ServiceWorkerState::Activated {
            json!({ "error": "worker not active" })
        } else {
            let store = SqliteStore::open(&config.database_path())?;
            let backend = StoryApiClient::from_config(&config, fetcher)?;
            let manager = PushSubscriptionManager::new(
                Arc::new(RegistrationPushPlatform::new(container.clone())),
                Arc::new(backend),
                Arc::new(store),
                config.readiness_timeout(),
            );
            manager.restore().await?;
            serde_json::to_value(manager.status().await?).context("serialize push status")?
        }
    } else {
        serde_json::Value::Null
    };

    let caches = container.scope().caches().keys().await;
    Ok(json!({
        "generation": config.cache.generation,
        "state": format!("{:?}", container.state()),
        "start": start,
        "fetches": fetches,
        "settled_extensions": settled,
        "caches": caches,
        "push": push,
    }))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let log_config = if args.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default()
    }
    .with_env_format();
    if let Err(e) = init_logging(log_config) {
        eprintln!("Warning: {}", e);
    }

    let summary_output = args.summary_output.clone();
    let summary = match run(args).await {
        Ok(summary) => summary,
        Err(e) => {
            error!(category = e.category(), error = %e, "Smoke run failed");
            return ExitCode::FAILURE;
        }
    };

    println!("{}", serde_json::to_string_pretty(&summary).unwrap_or_default());

    if let Some(path) = summary_output {
        if let Err(e) = std::fs::write(&path, summary.to_string()) {
            let e = StoryKitError::from(e);
            error!(path = %path, error = %e, "Failed to write summary");
            return ExitCode::FAILURE;
        }
        info!(path = %path, "Summary written");
    }

    ExitCode::SUCCESS
}
