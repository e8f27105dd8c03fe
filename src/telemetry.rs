//! Tracing setup
//!
//! Environment variables take precedence over the `[logging]` config table:
//!
//! - `DOCBRIDGE_LOG`: level or EnvFilter directive
//! - `DOCBRIDGE_LOG_JSON`: `1` for JSON lines, `0` for compact text
//! - `DOCBRIDGE_LOG_FILE`: append to this file instead of stderr

use crate::config::LoggingConfig;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;

static TRACE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Logging settings after environment overrides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceSettings {
    pub level: String,
    pub json: bool,
    pub file: Option<PathBuf>,
}

impl TraceSettings {
    /// Merge `config` with overrides read through `var`
    pub fn resolve<F>(config: &LoggingConfig, var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let level = var("DOCBRIDGE_LOG").unwrap_or_else(|| config.level.clone());
        let json = var("DOCBRIDGE_LOG_JSON").map_or_else(|| config.format == "json", |v| v != "0");
        let file = var("DOCBRIDGE_LOG_FILE")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| config.file.clone());
        TraceSettings { level, json, file }
    }

    pub fn from_env(config: &LoggingConfig) -> Self {
        Self::resolve(config, |name| env::var(name).ok())
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_tracing(logging_config: &LoggingConfig) {
    let settings = TraceSettings::from_env(logging_config);

    let (non_blocking, guard) = match &settings.file {
        Some(path) => {
            let file = match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
            {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("ERROR: Unable to open log file '{}': {e}", path.display());
                    return;
                }
            };
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };
    if TRACE_GUARD.set(guard).is_err() {
        return;
    }

    let filter = tracing_subscriber::EnvFilter::try_new(&settings.level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let base = || {
        tracing_subscriber::fmt()
            .with_env_filter(filter.clone())
            .with_ansi(false)
            .with_thread_names(true)
            .with_writer(non_blocking.clone())
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
    };

    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = if settings.json {
        Box::new(base().json().finish())
    } else {
        Box::new(base().compact().finish())
    };

    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_config_values_without_env() {
        let config = LoggingConfig {
            level: "debug".to_string(),
            format: "json".to_string(),
            file: Some(PathBuf::from("/tmp/docbridge.log")),
        };
        let settings = TraceSettings::resolve(&config, lookup(&[]));
        assert_eq!(settings.level, "debug");
        assert!(settings.json);
        assert_eq!(settings.file, Some(PathBuf::from("/tmp/docbridge.log")));
    }

    #[test]
    fn test_env_overrides_config() {
        let settings = TraceSettings::resolve(
            &LoggingConfig::default(),
            lookup(&[
                ("DOCBRIDGE_LOG", "docbridge=trace"),
                ("DOCBRIDGE_LOG_JSON", "1"),
                ("DOCBRIDGE_LOG_FILE", "out.log"),
            ]),
        );
        assert_eq!(settings.level, "docbridge=trace");
        assert!(settings.json);
        assert_eq!(settings.file, Some(PathBuf::from("out.log")));
    }

    #[test]
    fn test_json_zero_disables_json() {
        let config = LoggingConfig {
            format: "json".to_string(),
            ..LoggingConfig::default()
        };
        let settings = TraceSettings::resolve(&config, lookup(&[("DOCBRIDGE_LOG_JSON", "0")]));
        assert!(!settings.json);
    }

    #[test]
    fn test_empty_file_var_falls_back_to_stderr() {
        let settings = TraceSettings::resolve(&LoggingConfig::default(), lookup(&[("DOCBRIDGE_LOG_FILE", "")]));
        assert!(settings.file.is_none());
    }
}
