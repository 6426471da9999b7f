//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::time::Duration;

use crate::worker::WorkerConfig;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Number of transaction consumer tasks
    pub worker_count: usize,

    /// How often an idle consumer polls the queue
    pub queue_poll_interval: Duration,

    /// Visibility lease on delivered messages; an unacked message is
    /// redelivered after this long
    pub queue_lease: Duration,

    /// Deliveries of one message before it is dead-lettered
    pub max_delivery_attempts: u32,

    /// Compare-and-swap attempts before a delivery counts as failed
    pub cas_max_retries: u32,

    /// In-place ledger append retries after the balance committed
    pub ledger_append_retries: u32,

    /// Base delay for the retry schedules
    pub retry_backoff_base: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = parse_env("DATABASE_MAX_CONNECTIONS", "10")?;
        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_env("PORT", "3000")?;
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let worker_count = parse_env("WORKER_COUNT", "4")?;
        let queue_poll_interval =
            Duration::from_millis(parse_env("QUEUE_POLL_INTERVAL_MS", "100")?);
        let queue_lease = Duration::from_secs(parse_env("QUEUE_LEASE_SECS", "30")?);
        let max_delivery_attempts = parse_env("MAX_DELIVERY_ATTEMPTS", "5")?;
        let cas_max_retries = parse_env("CAS_MAX_RETRIES", "5")?;
        let ledger_append_retries = parse_env("LEDGER_APPEND_RETRIES", "3")?;
        let retry_backoff_base = Duration::from_millis(parse_env("RETRY_BACKOFF_BASE_MS", "50")?);

        Ok(Self {
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            worker_count,
            queue_poll_interval,
            queue_lease,
            max_delivery_attempts,
            cas_max_retries,
            ledger_append_retries,
            retry_backoff_base,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// The worker tunables carved out of the full configuration
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            max_delivery_attempts: self.max_delivery_attempts,
            cas_max_retries: self.cas_max_retries,
            ledger_append_retries: self.ledger_append_retries,
            retry_backoff_base: self.retry_backoff_base,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name))
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
