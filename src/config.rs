//! Configuration management

use crate::error::{AppError, Result};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the ops HTTP server binds to
    pub listen_addr: SocketAddr,

    /// SQLite connection string
    pub database_url: String,

    /// Upper bound on pooled database connections
    pub max_db_connections: u32,

    /// Trailing window used for the online percentage and latency chart
    pub online_window: Duration,

    /// Maximum number of hits returned by bounded history queries
    pub hits_limit: usize,

    /// How often the scheduler reconciles its loops with the registry
    pub sync_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: "sqlite://upcheck.db?mode=rwc".to_string(),
            max_db_connections: 16,
            online_window: Duration::from_secs(24 * 60 * 60),
            hits_limit: 1024,
            sync_interval: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(addr) = lookup("LISTEN_ADDR") {
            config.listen_addr = parse("LISTEN_ADDR", &addr)?;
        }

        if let Some(url) = lookup("DATABASE_URL") {
            config.database_url = url;
        }

        if let Some(max) = lookup("MAX_DB_CONNECTIONS") {
            config.max_db_connections = parse("MAX_DB_CONNECTIONS", &max)?;
        }

        if let Some(hours) = lookup("ONLINE_WINDOW_HOURS") {
            let hours: u64 = parse("ONLINE_WINDOW_HOURS", &hours)?;
            let seconds = hours.checked_mul(60 * 60).ok_or_else(|| {
                AppError::Config(format!("ONLINE_WINDOW_HOURS '{}' is too large", hours))
            })?;
            config.online_window = Duration::from_secs(seconds);
        }

        if let Some(limit) = lookup("HITS_LIMIT") {
            config.hits_limit = parse("HITS_LIMIT", &limit)?;
        }

        if let Some(seconds) = lookup("SYNC_INTERVAL_SECONDS") {
            config.sync_interval = Duration::from_secs(parse("SYNC_INTERVAL_SECONDS", &seconds)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(AppError::Config("DATABASE_URL cannot be empty".into()));
        }

        if self.max_db_connections == 0 {
            return Err(AppError::Config("MAX_DB_CONNECTIONS must be greater than 0".into()));
        }

        if self.online_window.is_zero() {
            return Err(AppError::Config("ONLINE_WINDOW_HOURS must be greater than 0".into()));
        }

        if self.hits_limit == 0 {
            return Err(AppError::Config("HITS_LIMIT must be greater than 0".into()));
        }

        if self.sync_interval.is_zero() {
            return Err(AppError::Config("SYNC_INTERVAL_SECONDS must be greater than 0".into()));
        }

        Ok(())
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| AppError::Config(format!("Invalid {} '{}': {}", key, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.online_window, Duration::from_secs(86_400));
        assert_eq!(config.hits_limit, 1024);
        assert_eq!(config.sync_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("LISTEN_ADDR", "127.0.0.1:9000"),
            ("DATABASE_URL", "sqlite::memory:"),
            ("ONLINE_WINDOW_HOURS", "1"),
            ("HITS_LIMIT", "50"),
            ("SYNC_INTERVAL_SECONDS", " 5 "),
        ]))
        .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.online_window, Duration::from_secs(3600));
        assert_eq!(config.hits_limit, 50);
        assert_eq!(config.sync_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_values() {
        let err = Config::from_lookup(lookup(&[("HITS_LIMIT", "lots")])).unwrap_err();
        assert!(matches!(err, AppError::Config(msg) if msg.starts_with("Invalid HITS_LIMIT")));

        let err = Config::from_lookup(lookup(&[("ONLINE_WINDOW_HOURS", "0")])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_window_overflow_is_config_error() {
        let err = Config::from_lookup(lookup(&[("ONLINE_WINDOW_HOURS", "10000000000000000")]))
            .unwrap_err();
        assert!(matches!(err, AppError::Config(msg) if msg.contains("too large")));
    }
}
