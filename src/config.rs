//! Runtime configuration parsed from environment variables.
//!
//! All settings are optional; defaults match a local single-node deployment.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::aggregator::DEFAULT_WINDOW_HOURS;

pub const ENV_DATABASE: &str = "API_METRICS_DATABASE";
pub const ENV_LISTEN: &str = "API_METRICS_LISTEN";
pub const ENV_PATH: &str = "API_METRICS_PATH";
pub const ENV_WINDOW_SECS: &str = "API_METRICS_WINDOW_SECS";
pub const ENV_SCRAPE_TIMEOUT_SECS: &str = "API_METRICS_SCRAPE_TIMEOUT_SECS";

#[derive(Debug, Error)]
#[error("invalid value {value:?} for {var}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub listen_addr: SocketAddr,
    /// Route serving the scrape target
    pub metrics_path: String,
    /// Trailing aggregation window
    pub window: chrono::Duration,
    /// Upper bound on one scrape's repository read
    pub scrape_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("api_metrics.db"),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            metrics_path: "/metrics".to_string(),
            window: chrono::Duration::hours(DEFAULT_WINDOW_HOURS),
            scrape_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Build from an arbitrary variable source; unset variables keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup(ENV_DATABASE) {
            config.database_path = PathBuf::from(path);
        }

        if let Some(addr) = lookup(ENV_LISTEN) {
            config.listen_addr = addr.parse().map_err(|e: std::net::AddrParseError| ConfigError {
                var: ENV_LISTEN,
                value: addr.clone(),
                reason: e.to_string(),
            })?;
        }

        if let Some(path) = lookup(ENV_PATH) {
            if !path.starts_with('/') {
                return Err(ConfigError {
                    var: ENV_PATH,
                    value: path,
                    reason: "must start with '/'".to_string(),
                });
            }
            config.metrics_path = path;
        }

        if let Some(secs) = lookup(ENV_WINDOW_SECS) {
            let parsed = parse_positive_secs(ENV_WINDOW_SECS, &secs)?;
            config.window = chrono::Duration::try_seconds(parsed as i64).ok_or_else(|| ConfigError {
                var: ENV_WINDOW_SECS,
                value: secs.clone(),
                reason: "window too large".to_string(),
            })?;
        }

        if let Some(secs) = lookup(ENV_SCRAPE_TIMEOUT_SECS) {
            config.scrape_timeout =
                Duration::from_secs(parse_positive_secs(ENV_SCRAPE_TIMEOUT_SECS, &secs)?);
        }

        Ok(config)
    }
}

fn parse_positive_secs(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    let invalid = |reason: &str| ConfigError {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    };

    match value.trim().parse::<u64>() {
        Ok(0) => Err(invalid("must be positive")),
        Ok(secs) if secs > i64::MAX as u64 => Err(invalid("out of range")),
        Ok(secs) => Ok(secs),
        Err(e) => Err(invalid(&e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(|_| None).unwrap();

        assert_eq!(config.database_path, PathBuf::from("api_metrics.db"));
        assert_eq!(config.listen_addr.port(), 8000);
        assert_eq!(config.metrics_path, "/metrics");
        assert_eq!(config.window, chrono::Duration::hours(24));
        assert_eq!(config.scrape_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            (ENV_DATABASE, "/var/lib/api-metrics/tx.db"),
            (ENV_LISTEN, "127.0.0.1:9100"),
            (ENV_PATH, "/internal/metrics"),
            (ENV_WINDOW_SECS, "3600"),
            (ENV_SCRAPE_TIMEOUT_SECS, "2"),
        ]))
        .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/var/lib/api-metrics/tx.db"));
        assert_eq!(config.listen_addr, "127.0.0.1:9100".parse().unwrap());
        assert_eq!(config.metrics_path, "/internal/metrics");
        assert_eq!(config.window, chrono::Duration::hours(1));
        assert_eq!(config.scrape_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Config::from_lookup(lookup_from(&[(ENV_WINDOW_SECS, "0")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[(ENV_WINDOW_SECS, "-5")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[(ENV_SCRAPE_TIMEOUT_SECS, "soon")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[(ENV_LISTEN, "localhost")])).is_err());

        let err = Config::from_lookup(lookup_from(&[(ENV_PATH, "metrics")])).unwrap_err();
        assert_eq!(err.var, ENV_PATH);
    }
}
