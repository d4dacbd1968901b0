//! StoryKit configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::error::{ConfigError, ConfigResult};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoryKitConfig {
    /// Backend REST base URL; its origin selects the network-first policy
    pub api_base_url: Url,

    /// Scope the worker controls; manifest paths resolve against it
    pub scope: Url,

    /// Directory holding the persisted key-value store
    pub data_dir: PathBuf,

    /// User agent string
    pub user_agent: String,

    /// Per-request network timeout in seconds
    pub request_timeout_secs: u64,

    /// Offline cache settings
    pub cache: CacheConfig,

    /// Push subscription settings
    pub push: PushConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Current cache generation; every other generation is evicted on activate
    pub generation: String,

    /// App shell URLs seeded on install, in order
    pub static_manifest: Vec<String>,

    /// Document served for navigations when both cache and network fail
    pub offline_fallback: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// Upper bound on waiting for the worker to become ready
    pub readiness_timeout_secs: u64,

    /// Base URL the simulated push service issues endpoints under
    pub push_service_url: Url,

    /// Notification title when the payload has none
    pub default_title: String,

    /// Notification body when the payload has none
    pub default_body: String,

    pub icon: String,
    pub badge: String,
    pub tag: String,
}

impl Default for StoryKitConfig {
    fn default() -> Self {
        Self {
            api_base_url: parse_static("https://story-api.dicoding.dev/v1"),
            scope: parse_static("http://localhost:8080/"),
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("storykit"),
            user_agent: format!("StoryKit/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: 30,
            cache: CacheConfig::default(),
            push: PushConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            generation: "our-story-v2".to_string(),
            static_manifest: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css".to_string(),
                "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js".to_string(),
            ],
            offline_fallback: "/index.html".to_string(),
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            readiness_timeout_secs: 10,
            push_service_url: parse_static("https://push.storykit.invalid/send/"),
            default_title: "Our Story".to_string(),
            default_body: "New story added!".to_string(),
            icon: "/images/icon-192x192.png".to_string(),
            badge: "/images/icon-72x72.png".to_string(),
            tag: "new-story".to_string(),
        }
    }
}

// Only used for the literal defaults above.
fn parse_static(input: &'static str) -> Url {
    match Url::parse(input) {
        Ok(url) => url,
        Err(e) => panic!("invalid built-in URL {input}: {e}"),
    }
}

impl StoryKitConfig {
    /// Load configuration from a JSON file. Missing fields take defaults.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise use the defaults.
    pub fn load_or_default(path: Option<&Path>) -> ConfigResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                debug!("No config file given, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Check invariants the rest of the system relies on.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.cache.generation.trim().is_empty() {
            return Err(ConfigError::invalid("cache.generation must not be empty"));
        }
        if !matches!(self.api_base_url.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(format!(
                "api_base_url must be http(s), got {}",
                self.api_base_url
            )));
        }
        if self.push.readiness_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "push.readiness_timeout_secs must be positive",
            ));
        }
        self.manifest_urls()?;
        self.offline_fallback_url()?;
        Ok(())
    }

    /// Origin string of the backend, compared exactly against request origins.
    pub fn backend_origin(&self) -> String {
        self.api_base_url.origin().ascii_serialization()
    }

    /// Build `{base}/{path}` without dropping the base path segment.
    pub fn api_endpoint(&self, path: &str) -> ConfigResult<Url> {
        let joined = format!(
            "{}/{}",
            self.api_base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|source| ConfigError::InvalidUrl {
            input: joined,
            source,
        })
    }

    /// Resolve a manifest entry (absolute or scope-relative) to a URL.
    pub fn resolve(&self, entry: &str) -> ConfigResult<Url> {
        self.scope.join(entry).map_err(|source| ConfigError::InvalidUrl {
            input: entry.to_string(),
            source,
        })
    }

    /// Static manifest as absolute URLs, order preserved.
    pub fn manifest_urls(&self) -> ConfigResult<Vec<Url>> {
        self.cache
            .static_manifest
            .iter()
            .map(|entry| self.resolve(entry))
            .collect()
    }

    pub fn offline_fallback_url(&self) -> ConfigResult<Url> {
        self.resolve(&self.cache.offline_fallback)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.push.readiness_timeout_secs)
    }

    /// Location of the SQLite key-value store.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("storykit.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = StoryKitConfig::default();
        config.validate().unwrap();
        assert_eq!(config.backend_origin(), "https://story-api.dicoding.dev");
        assert_eq!(config.readiness_timeout(), Duration::from_secs(10));
        assert_eq!(config.cache.generation, "our-story-v2");
    }

    #[test]
    fn test_api_endpoint_keeps_base_path() {
        let config = StoryKitConfig::default();
        let url = config.api_endpoint("/push/vapid/public-key").unwrap();
        assert_eq!(
            url.as_str(),
            "https://story-api.dicoding.dev/v1/push/vapid/public-key"
        );
    }

    #[test]
    fn test_manifest_resolves_against_scope() {
        let config = StoryKitConfig::default();
        let urls = config.manifest_urls().unwrap();
        assert_eq!(urls[0].as_str(), "http://localhost:8080/");
        assert_eq!(urls[1].as_str(), "http://localhost:8080/index.html");
        assert_eq!(
            urls[2].as_str(),
            "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css"
        );
        assert_eq!(
            config.offline_fallback_url().unwrap().as_str(),
            "http://localhost:8080/index.html"
        );
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"api_base_url": "http://127.0.0.1:9000/api", "cache": {{"generation": "v9"}}}}"#
        )
        .unwrap();

        let config = StoryKitConfig::load(file.path()).unwrap();
        assert_eq!(config.backend_origin(), "http://127.0.0.1:9000");
        assert_eq!(config.cache.generation, "v9");
        assert_eq!(config.cache.offline_fallback, "/index.html");
        assert_eq!(config.push.readiness_timeout_secs, 10);
    }

    #[test]
    fn test_rejects_empty_generation() {
        let mut config = StoryKitConfig::default();
        config.cache.generation = " ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let err = StoryKitConfig::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
