//! Server configuration from environment variables

use crate::logging::LogFormat;
use logsink_core::journal::JournalConfig;
use logsink_core::pipeline::PipelineConfig;
use logsink_core::store::PgStoreConfig;
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen address
    pub http_addr: SocketAddr,
    /// Log output format
    pub log_format: LogFormat,
    /// Database connection
    pub database: PgStoreConfig,
    /// Queue, journal and flush settings
    pub pipeline: PipelineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            log_format: LogFormat::Pretty,
            database: PgStoreConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from the process environment and an optional `.env` file
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any key lookup, starting from defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = parse(&lookup, "LOGSINK_HTTP_ADDR")? {
            config.http_addr = addr;
        }
        if let Some(format) = parse(&lookup, "LOGSINK_LOG_FORMAT")? {
            config.log_format = format;
        }

        let db = &mut config.database;
        if let Some(host) = lookup("POSTGRES_HOST") {
            db.host = host;
        }
        if let Some(port) = parse(&lookup, "POSTGRES_PORT")? {
            db.port = port;
        }
        if let Some(user) = lookup("POSTGRES_USER") {
            db.user = user;
        }
        if let Some(password) = lookup("POSTGRES_PASSWORD") {
            db.password = password;
        }
        if let Some(name) = lookup("POSTGRES_DB") {
            db.database = name;
        }

        let pipeline = &mut config.pipeline;
        if let Some(path) = lookup("LOGSINK_JOURNAL_PATH") {
            pipeline.journal = JournalConfig::new(path);
        }
        if let Some(capacity) = parse(&lookup, "LOGSINK_QUEUE_CAPACITY")? {
            pipeline.queue_capacity = capacity;
        }
        if let Some(millis) = parse(&lookup, "LOGSINK_ENQUEUE_TIMEOUT_MS")? {
            pipeline.enqueue_timeout = Duration::from_millis(millis);
        }
        if let Some(secs) = parse(&lookup, "LOGSINK_FLUSH_INTERVAL_SECS")? {
            pipeline.flush_interval = Duration::from_secs(secs);
        }
        if let Some(bytes) = parse(&lookup, "LOGSINK_FLUSH_THRESHOLD_BYTES")? {
            pipeline.flush_threshold_bytes = bytes;
        }
        if let Some(secs) = parse(&lookup, "LOGSINK_SHUTDOWN_GRACE_SECS")? {
            pipeline.shutdown_grace = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                key,
                value,
                reason: e.to_string(),
            }),
    }
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
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.http_addr.port(), 9000);
        assert_eq!(config.database.host, "postgres");
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.pipeline.flush_interval, Duration::from_secs(30));
        assert_eq!(config.pipeline.flush_threshold_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_env_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("POSTGRES_HOST", "db.internal"),
            ("POSTGRES_PORT", "6543"),
            ("POSTGRES_USER", "ingest"),
            ("POSTGRES_DB", "events"),
            ("LOGSINK_HTTP_ADDR", "127.0.0.1:8080"),
            ("LOGSINK_FLUSH_INTERVAL_SECS", "5"),
            ("LOGSINK_FLUSH_THRESHOLD_BYTES", "4096"),
            ("LOGSINK_QUEUE_CAPACITY", "100"),
            ("LOGSINK_JOURNAL_PATH", "/var/lib/logsink/logs.ndjson"),
            ("LOGSINK_LOG_FORMAT", "json"),
        ]))
        .unwrap();

        assert_eq!(config.database.host, "db.internal");
        assert_eq!(config.database.port, 6543);
        assert_eq!(config.database.user, "ingest");
        assert_eq!(config.database.database, "events");
        assert_eq!(config.http_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.pipeline.flush_interval, Duration::from_secs(5));
        assert_eq!(config.pipeline.flush_threshold_bytes, 4096);
        assert_eq!(config.pipeline.queue_capacity, 100);
        assert_eq!(
            config.pipeline.journal.path,
            std::path::PathBuf::from("/var/lib/logsink/logs.ndjson")
        );
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_value_names_the_key() {
        let err = ServerConfig::from_lookup(lookup(&[("POSTGRES_PORT", "not-a-port")]))
            .unwrap_err();
        assert!(err.to_string().contains("POSTGRES_PORT"));
    }
}
