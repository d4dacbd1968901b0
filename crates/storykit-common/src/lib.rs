//! # StoryKit Common
//!
//! Shared error types, logging configuration, and timeout helpers for the
//! StoryKit offline proxy and push subscription crates.
//!
//! ## Features
//!
//! - Unified error type with categories
//! - Logging configuration and setup
//! - Bounded waits for asynchronous readiness
//! - Result extension traits

use std::time::Duration;
use thiserror::Error;

pub mod logging;
pub mod timeout;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use timeout::with_timeout;

/// Unified error type for StoryKit.
#[derive(Error, Debug)]
pub enum StoryKitError {
    /// Network-related errors.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Cache engine errors.
    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Push subscription errors.
    #[error("Push error: {message}")]
    Push {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout errors.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl StoryKitError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error with source.
    pub fn network_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a cache error with source.
    pub fn cache_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Cache {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a push error with source.
    pub fn push_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Push {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source.
    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoryKitError::Network { .. } | StoryKitError::Timeout(_) | StoryKitError::Io(_)
        )
    }

    /// Get the error category for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            StoryKitError::Network { .. } => "network",
            StoryKitError::Cache { .. } => "cache",
            StoryKitError::Push { .. } => "push",
            StoryKitError::Config { .. } => "config",
            StoryKitError::Io(_) => "io",
            StoryKitError::Timeout(_) => "timeout",
            StoryKitError::NotFound(_) => "not_found",
            StoryKitError::InvalidArgument(_) => "invalid_argument",
            StoryKitError::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for StoryKit operations.
pub type Result<T> = std::result::Result<T, StoryKitError>;

/// Extension trait for Result.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| StoryKitError::Internal {
            message: format!("{}: {}", message.into(), e),
        })
    }
}

/// Extension trait for Option.
pub trait OptionExt<T> {
    /// Convert None to a NotFound error.
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| StoryKitError::NotFound(resource.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(StoryKitError::network("test").category(), "network");
        assert_eq!(StoryKitError::config("test").category(), "config");
        assert_eq!(
            StoryKitError::Timeout(Duration::from_secs(1)).category(),
            "timeout"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(StoryKitError::network("test").is_retryable());
        assert!(StoryKitError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!StoryKitError::config("test").is_retryable());
        assert!(!StoryKitError::NotFound("x".into()).is_retryable());
    }

    #[test]
    fn test_result_context() {
        let err: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        let wrapped = err.context("reading manifest").unwrap_err();
        assert_eq!(wrapped.category(), "internal");
        assert!(wrapped.to_string().contains("reading manifest: boom"));
    }

    #[test]
    fn test_option_ext() {
        let some: Option<i32> = Some(42);
        assert_eq!(some.ok_or_not_found("test").unwrap(), 42);

        let none: Option<i32> = None;
        assert!(matches!(
            none.ok_or_not_found("test"),
            Err(StoryKitError::NotFound(_))
        ));
    }
}
