//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - docbridge.toml (default configuration)
//! - docbridge.local.toml (git-ignored local overrides)
//! - Environment variables (DOCBRIDGE_* prefix)
//!
//! These are process-level defaults. Per-job connector options (see
//! [`crate::options`]) override them.
//!
//! ## Example
//!
//! ```toml
//! # docbridge.toml
//! [write]
//! batch_size = 200
//! thread_count = 8
//! abort_on_failure = false
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! DOCBRIDGE_WRITE__BATCH_SIZE=50
//! DOCBRIDGE_LOGGING__FORMAT=text
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub write: WriteDefaults,
    #[serde(default)]
    pub read: ReadDefaults,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Defaults for write jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteDefaults {
    /// Items per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Concurrent batch dispatches per partition.
    /// 0 = use all available CPU cores
    #[serde(default)]
    pub thread_count: usize,

    /// Abort the whole job on the first failed batch
    #[serde(default = "default_true")]
    pub abort_on_failure: bool,

    /// Variable name bound to each item in custom-code mode
    #[serde(default = "default_external_variable_name")]
    pub external_variable_name: String,
}

/// Defaults for read jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadDefaults {
    /// Translate host predicates into the store's query language
    #[serde(default = "default_true")]
    pub push_down_filters: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or EnvFilter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log file; stderr when unset
    #[serde(default)]
    pub file: Option<PathBuf>,
}

// Default value functions
fn default_batch_size() -> usize {
    100
}
fn default_true() -> bool {
    true
}
fn default_external_variable_name() -> String {
    "URI".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. docbridge.toml (base configuration)
    /// 2. docbridge.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (DOCBRIDGE_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("docbridge.toml"))
            .merge(Toml::file("docbridge.local.toml"))
            .merge(Env::prefixed("DOCBRIDGE_").split("__"))
            .extract()
    }

    /// Load configuration from specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("DOCBRIDGE_").split("__"))
            .extract()
    }
}

impl WriteDefaults {
    /// Effective dispatcher width: `thread_count`, or available parallelism when 0
    pub fn effective_thread_count(&self) -> usize {
        if self.thread_count == 0 {
            num_cpus::get().max(1)
        } else {
            self.thread_count
        }
    }
}

impl Default for WriteDefaults {
    fn default() -> Self {
        WriteDefaults {
            batch_size: default_batch_size(),
            thread_count: 0,
            abort_on_failure: true,
            external_variable_name: default_external_variable_name(),
        }
    }
}

impl Default for ReadDefaults {
    fn default() -> Self {
        ReadDefaults {
            push_down_filters: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}
