use std::time::Duration;

use crate::error::ConfigError;

/// Default pool size for the connection source.
pub const DEFAULT_POOL_SIZE: u32 = 10;

/// How long acquisition waits for a free connection before failing.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

const DATABASE_URL: &str = "DATABASE_URL";
const DATABASE_POOL_SIZE: &str = "DATABASE_POOL_SIZE";
const DATABASE_ACQUIRE_TIMEOUT_SECS: &str = "DATABASE_ACQUIRE_TIMEOUT_SECS";

/// Connection pool settings for [`PgConnectionSource`](crate::PgConnectionSource).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl PoolConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: DEFAULT_POOL_SIZE,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }

    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn acquire_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = acquire_timeout;
        self
    }

    /// Load settings from `DATABASE_URL`, `DATABASE_POOL_SIZE` and
    /// `DATABASE_ACQUIRE_TIMEOUT_SECS`. Only the URL is required.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup(DATABASE_URL)
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing(DATABASE_URL))?;
        let mut config = Self::new(database_url);

        if let Some(size) = lookup(DATABASE_POOL_SIZE) {
            config.max_connections = parse_setting(DATABASE_POOL_SIZE, &size)?;
            if config.max_connections == 0 {
                return Err(ConfigError::Invalid {
                    key: DATABASE_POOL_SIZE,
                    value: size,
                });
            }
        }
        if let Some(secs) = lookup(DATABASE_ACQUIRE_TIMEOUT_SECS) {
            config.acquire_timeout =
                Duration::from_secs(parse_setting(DATABASE_ACQUIRE_TIMEOUT_SECS, &secs)?);
        }

        Ok(config)
    }
}

fn parse_setting<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}
