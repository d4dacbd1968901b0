//! StoryKit Core Library
//!
//! This crate provides configuration shared by the offline proxy, the push
//! subscription manager, and the smoke harness.

pub mod config;
pub mod error;

pub use config::{CacheConfig, PushConfig, StoryKitConfig};
pub use error::{ConfigError, ConfigResult};
