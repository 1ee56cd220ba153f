//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// How long to wait for a pooled connection
    pub database_acquire_timeout: Duration,

    /// Bound on row-lock waits inside one ledger operation
    pub lock_timeout: Duration,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Entries the audit queue buffers before dropping
    pub audit_queue_capacity: usize,

    /// How long shutdown waits for the audit queue to drain
    pub audit_drain_timeout: Duration,

    /// Reconciliation period; `None` disables the job
    pub reconcile_interval: Option<Duration>,

    /// Audit log retention in days; `None` keeps everything
    pub audit_retention_days: Option<u32>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = parse_or("DATABASE_MAX_CONNECTIONS", 10)?;
        let database_acquire_timeout =
            Duration::from_secs(parse_or("DATABASE_ACQUIRE_TIMEOUT_SECS", 5)?);
        let lock_timeout = Duration::from_millis(parse_or("LOCK_TIMEOUT_MS", 5000)?);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_or("PORT", 8080)?;

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let audit_queue_capacity = parse_or("AUDIT_QUEUE_CAPACITY", 1024)?;
        if audit_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue("AUDIT_QUEUE_CAPACITY"));
        }
        let audit_drain_timeout = Duration::from_secs(parse_or("AUDIT_DRAIN_TIMEOUT_SECS", 5)?);

        // 0 disables
        let reconcile_interval = match parse_or::<u64>("RECONCILE_INTERVAL_SECS", 300)? {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let audit_retention_days = match parse_or::<u32>("AUDIT_RETENTION_DAYS", 90)? {
            0 => None,
            days => Some(days),
        };

        Ok(Self {
            database_url,
            database_max_connections,
            database_acquire_timeout,
            lock_timeout,
            host,
            port,
            environment,
            audit_queue_capacity,
            audit_drain_timeout,
            reconcile_interval,
            audit_retention_days,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Address the HTTP server binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
