//! Structured logging infrastructure for the sum API service.
//!
//! This module provides:
//! - [`LoggingConfig`]: Configuration for the logging system
//! - [`init_logging`]: Initialize tracing with JSON or text formatting
//!
//! # Environment Variables
//!
//! - `LOG_FORMAT`: Output format, either `json` (default) or `text`
//! - `RUST_LOG`: Full filter directive; takes precedence over `LOG_LEVEL`
//! - `LOG_LEVEL`: Plain level name (default: `info`)
//!
//! # Example
//!
//! ```no_run
//! use sumapi_service_shared::logging::{LoggingConfig, init_logging};
//!
//! let config = LoggingConfig::from_env();
//! init_logging(&config);
//! ```

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{non_empty, Lookup};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON structured logging (default, production).
    #[default]
    Json,
    /// Human-readable text logging (development).
    Text,
}

impl LogFormat {
    /// Parse log format from string.
    ///
    /// Accepts "json", "text", or "pretty" (alias for text).
    /// Returns `Json` for any other value.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "text" | "pretty" => LogFormat::Text,
            _ => LogFormat::Json,
        }
    }
}

/// Configuration for the logging system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Output format (json or text).
    pub format: LogFormat,
    /// Filter directive (e.g., "info", "debug", "sumapi_service=debug,info").
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Create configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Self {
        let format = non_empty(lookup, "LOG_FORMAT")
            .map(|v| LogFormat::parse(&v))
            .unwrap_or_default();

        let level = non_empty(lookup, "RUST_LOG")
            .or_else(|| non_empty(lookup, "LOG_LEVEL").map(normalize_level))
            .unwrap_or_else(|| "info".to_string());

        Self { format, level }
    }
}

fn normalize_level(level: String) -> String {
    level.trim().to_lowercase()
}

/// Initialize the tracing subscriber with the given configuration.
///
/// It should be called once at application startup. An unparseable filter
/// directive falls back to `info`.
///
/// # JSON Format (default)
///
/// ```json
/// {"timestamp":"2025-12-30T10:00:00Z","level":"INFO","fields":{"message":"HTTP request processed","status":200},"target":"sumapi_service_shared::middleware"}
/// ```
///
/// # Text Format (development)
///
/// ```text
/// 2025-12-30T10:00:00Z  INFO sumapi_service_shared::middleware: HTTP request processed
/// ```
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Text => {
            registry.with(fmt::layer().pretty()).init();
        }
        LogFormat::Json => {
            let json_layer = fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false);

            registry.with(json_layer).init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> LoggingConfig {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        LoggingConfig::from_lookup(&|key| map.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("text"), LogFormat::Text);
        assert_eq!(LogFormat::parse("TEXT"), LogFormat::Text);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Text);
        assert_eq!(LogFormat::parse("unknown"), LogFormat::Json);
    }

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "info");
    }

    #[test]
    fn test_log_level_precedence() {
        assert_eq!(config_from(&[]).level, "info");
        assert_eq!(config_from(&[("LOG_LEVEL", "DEBUG")]).level, "debug");
        assert_eq!(
            config_from(&[("LOG_LEVEL", "debug"), ("RUST_LOG", "warn,tower=error")]).level,
            "warn,tower=error"
        );
    }

    #[test]
    fn test_log_format_from_lookup() {
        assert_eq!(
            config_from(&[("LOG_FORMAT", "text")]).format,
            LogFormat::Text
        );
        assert_eq!(config_from(&[]).format, LogFormat::Json);
    }
}
