//! Environment-driven service configuration.
//!
//! Every section reads its own variables through a lookup function so the
//! same parsing code serves the real environment ([`ServiceConfig::from_env`])
//! and tests ([`ServiceConfig::from_lookup`] with a map). Missing, empty or
//! unparseable values fall back to their defaults; semantic problems are
//! reported separately by [`ServiceConfig::validate`].
//!
//! # Environment Variables
//!
//! | Variable | Default |
//! |---|---|
//! | `HOST` | `0.0.0.0` |
//! | `PORT` | `8080` |
//! | `READ_TIMEOUT` | `30s` |
//! | `WRITE_TIMEOUT` | `30s` |
//! | `SHUTDOWN_TIMEOUT` | `15s` |
//! | `ENVIRONMENT` | `development` |
//! | `HEALTH_PATH` | `/healthz` |
//! | `HEALTH_MAX_MEMORY_BYTES` | `1073741824` |
//! | `HEALTH_MAX_TASKS` | `1000` |
//! | `HEALTH_MIN_UPTIME` | `1us` |
//! | `TRUSTED_PROXIES` | `10.0.0.0/8,172.16.0.0/12,192.168.0.0/16` |
//!
//! Logging and metrics variables are documented in [`crate::logging`] and
//! [`crate::metrics`].

use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sumapi_lib::HealthThresholds;
use thiserror::Error;

use crate::logging::LoggingConfig;
use crate::metrics::MetricsConfig;

/// Source of configuration values keyed by variable name.
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Semantic configuration problems.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("port must be between 1 and 65535")]
    InvalidPort,

    #[error("host must not be empty")]
    EmptyHost,

    #[error("{name} must start with '/', got '{path}'")]
    InvalidPath { name: &'static str, path: String },

    #[error("health and metrics endpoints share the path '{path}'")]
    PathCollision { path: String },

    #[error("shutdown timeout must be greater than zero")]
    ZeroShutdownTimeout,

    #[error("invalid trusted proxy entry '{entry}'")]
    InvalidProxy { entry: String },
}

/// Complete service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    pub health: HealthConfig,
    pub security: SecurityConfig,
}

impl ServiceConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key/value source.
    pub fn from_lookup(lookup: Lookup<'_>) -> Self {
        Self {
            server: ServerConfig::from_lookup(lookup),
            logging: LoggingConfig::from_lookup(lookup),
            metrics: MetricsConfig::from_lookup(lookup),
            health: HealthConfig::from_lookup(lookup),
            security: SecurityConfig::from_lookup(lookup),
        }
    }

    /// Check the loaded values for semantic problems.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.server.shutdown_timeout.is_zero() {
            return Err(ConfigError::ZeroShutdownTimeout);
        }
        if !self.health.path.starts_with('/') {
            return Err(ConfigError::InvalidPath {
                name: "HEALTH_PATH",
                path: self.health.path.clone(),
            });
        }
        if self.metrics.enabled {
            if !self.metrics.path.starts_with('/') {
                return Err(ConfigError::InvalidPath {
                    name: "METRICS_PATH",
                    path: self.metrics.path.clone(),
                });
            }
            if self.metrics.path == self.health.path {
                return Err(ConfigError::PathCollision {
                    path: self.metrics.path.clone(),
                });
            }
        }
        for entry in &self.security.trusted_proxies {
            entry.parse::<ProxyNetwork>()?;
        }
        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub environment: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(15),
            environment: "development".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn from_lookup(lookup: Lookup<'_>) -> Self {
        let defaults = Self::default();
        Self {
            host: string_var(lookup, "HOST", defaults.host),
            port: parsed_var(lookup, "PORT", defaults.port),
            read_timeout: duration_var(lookup, "READ_TIMEOUT", defaults.read_timeout),
            write_timeout: duration_var(lookup, "WRITE_TIMEOUT", defaults.write_timeout),
            shutdown_timeout: duration_var(lookup, "SHUTDOWN_TIMEOUT", defaults.shutdown_timeout),
            environment: string_var(lookup, "ENVIRONMENT", defaults.environment),
        }
    }

    /// `host:port` string suitable for binding a listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Health endpoint location and probe thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    pub path: String,
    pub thresholds: HealthThresholds,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            path: "/healthz".to_string(),
            thresholds: HealthThresholds::default(),
        }
    }
}

impl HealthConfig {
    pub fn from_lookup(lookup: Lookup<'_>) -> Self {
        let defaults = Self::default();
        Self {
            path: string_var(lookup, "HEALTH_PATH", defaults.path),
            thresholds: HealthThresholds {
                max_memory_bytes: parsed_var(
                    lookup,
                    "HEALTH_MAX_MEMORY_BYTES",
                    defaults.thresholds.max_memory_bytes,
                ),
                max_tasks: parsed_var(lookup, "HEALTH_MAX_TASKS", defaults.thresholds.max_tasks),
                min_uptime: duration_var(
                    lookup,
                    "HEALTH_MIN_UPTIME",
                    defaults.thresholds.min_uptime,
                ),
            },
        }
    }
}

/// Proxy trust settings used when resolving client addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// CIDR ranges (or bare addresses) whose forwarding headers are trusted.
    pub trusted_proxies: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            trusted_proxies: vec![
                "10.0.0.0/8".to_string(),
                "172.16.0.0/12".to_string(),
                "192.168.0.0/16".to_string(),
            ],
        }
    }
}

impl SecurityConfig {
    pub fn from_lookup(lookup: Lookup<'_>) -> Self {
        match non_empty(lookup, "TRUSTED_PROXIES") {
            Some(raw) => Self {
                trusted_proxies: raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
            },
            None => Self::default(),
        }
    }

    /// Parsed proxy networks; malformed entries are skipped.
    pub fn networks(&self) -> Vec<ProxyNetwork> {
        self.trusted_proxies
            .iter()
            .filter_map(|entry| entry.parse().ok())
            .collect()
    }
}

/// An IPv4 or IPv6 network in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyNetwork {
    addr: IpAddr,
    prefix: u8,
}

impl ProxyNetwork {
    /// Whether `ip` falls inside this network.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                prefix_matches(&net.octets(), &ip.octets(), self.prefix)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                prefix_matches(&net.octets(), &ip.octets(), self.prefix)
            }
            (IpAddr::V4(_), IpAddr::V6(ip)) => match ip.to_ipv4_mapped() {
                Some(v4) => self.contains(IpAddr::V4(v4)),
                None => false,
            },
            (IpAddr::V6(_), IpAddr::V4(_)) => false,
        }
    }
}

impl FromStr for ProxyNetwork {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidProxy {
            entry: s.to_string(),
        };
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };
        let addr: IpAddr = addr.trim().parse().map_err(|_| invalid())?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(p) => p.trim().parse::<u8>().map_err(|_| invalid())?,
            None => max,
        };
        if prefix > max {
            return Err(invalid());
        }
        Ok(Self { addr, prefix })
    }
}

fn prefix_matches(net: &[u8], ip: &[u8], prefix: u8) -> bool {
    let full_bytes = usize::from(prefix / 8);
    if net[..full_bytes] != ip[..full_bytes] {
        return false;
    }
    let rest = prefix % 8;
    if rest == 0 {
        return true;
    }
    let mask = 0xffu8 << (8 - rest);
    (net[full_bytes] & mask) == (ip[full_bytes] & mask)
}

pub(crate) fn non_empty(lookup: Lookup<'_>, key: &str) -> Option<String> {
    lookup(key).filter(|v| !v.trim().is_empty())
}

pub(crate) fn string_var(lookup: Lookup<'_>, key: &str, default: String) -> String {
    non_empty(lookup, key).unwrap_or(default)
}

pub(crate) fn parsed_var<T: FromStr>(lookup: Lookup<'_>, key: &str, default: T) -> T {
    non_empty(lookup, key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

pub(crate) fn duration_var(lookup: Lookup<'_>, key: &str, default: Duration) -> Duration {
    non_empty(lookup, key)
        .and_then(|v| humantime::parse_duration(v.trim()).ok())
        .unwrap_or(default)
}

/// Boolean flag accepting `1/0`, `t/f` and `true/false` in any case.
pub(crate) fn bool_var(lookup: Lookup<'_>, key: &str, default: bool) -> bool {
    match non_empty(lookup, key).map(|v| v.trim().to_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "t" | "true") => true,
        Some(v) if matches!(v.as_str(), "0" | "f" | "false") => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> ServiceConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(&|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.read_timeout, Duration::from_secs(30));
        assert_eq!(config.server.shutdown_timeout, Duration::from_secs(15));
        assert_eq!(config.server.environment, "development");
        assert_eq!(config.health.path, "/healthz");
        assert_eq!(config.health.thresholds, HealthThresholds::default());
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.path, "/metrics");
        assert_eq!(config.security.trusted_proxies.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("PORT", "9090"),
            ("HOST", "127.0.0.1"),
            ("SHUTDOWN_TIMEOUT", "2s"),
            ("READ_TIMEOUT", "500ms"),
            ("ENVIRONMENT", "production"),
            ("METRICS_ENABLED", "false"),
            ("HEALTH_MAX_TASKS", "50"),
            ("TRUSTED_PROXIES", "127.0.0.1, ::1"),
        ]);
        assert_eq!(config.server.bind_address(), "127.0.0.1:9090");
        assert_eq!(config.server.shutdown_timeout, Duration::from_secs(2));
        assert_eq!(config.server.read_timeout, Duration::from_millis(500));
        assert_eq!(config.server.environment, "production");
        assert!(!config.metrics.enabled);
        assert_eq!(config.health.thresholds.max_tasks, 50);
        assert_eq!(config.security.trusted_proxies, vec!["127.0.0.1", "::1"]);
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = config_from(&[
            ("PORT", "eighty"),
            ("SHUTDOWN_TIMEOUT", "soon"),
            ("METRICS_ENABLED", "maybe"),
            ("HOST", "   "),
        ]);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.shutdown_timeout, Duration::from_secs(15));
        assert!(config.metrics.enabled);
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn test_validate_reports_problems() {
        assert_eq!(
            config_from(&[("PORT", "0")]).validate(),
            Err(ConfigError::InvalidPort)
        );
        assert_eq!(
            config_from(&[("SHUTDOWN_TIMEOUT", "0s")]).validate(),
            Err(ConfigError::ZeroShutdownTimeout)
        );
        assert!(matches!(
            config_from(&[("HEALTH_PATH", "healthz")]).validate(),
            Err(ConfigError::InvalidPath { .. })
        ));
        assert!(matches!(
            config_from(&[("METRICS_PATH", "/healthz")]).validate(),
            Err(ConfigError::PathCollision { .. })
        ));
        assert!(matches!(
            config_from(&[("TRUSTED_PROXIES", "10.0.0.0/40")]).validate(),
            Err(ConfigError::InvalidProxy { .. })
        ));
    }

    #[test]
    fn test_metrics_path_ignored_when_disabled() {
        let config = config_from(&[("METRICS_ENABLED", "0"), ("METRICS_PATH", "/healthz")]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_proxy_network_contains() {
        let net: ProxyNetwork = "10.0.0.0/8".parse().unwrap();
        assert!(net.contains("10.1.2.3".parse().unwrap()));
        assert!(!net.contains("11.0.0.1".parse().unwrap()));
        assert!(net.contains("::ffff:10.0.0.7".parse().unwrap()));

        let net: ProxyNetwork = "172.16.0.0/12".parse().unwrap();
        assert!(net.contains("172.31.255.255".parse().unwrap()));
        assert!(!net.contains("172.32.0.0".parse().unwrap()));

        let single: ProxyNetwork = "::1".parse().unwrap();
        assert!(single.contains("::1".parse().unwrap()));
        assert!(!single.contains("::2".parse().unwrap()));

        let all: ProxyNetwork = "0.0.0.0/0".parse().unwrap();
        assert!(all.contains("203.0.113.9".parse().unwrap()));
    }

    #[test]
    fn test_networks_skip_malformed_entries() {
        let security = SecurityConfig {
            trusted_proxies: vec!["10.0.0.0/8".to_string(), "bogus".to_string()],
        };
        assert_eq!(security.networks().len(), 1);
    }
}
