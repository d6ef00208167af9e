//! Connection settings for the PostgreSQL adapter.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tidemark_core::StoreLayout;

use crate::error::PgError;

/// Default connection URL when none is configured.
pub const DEFAULT_URL: &str = "postgres://localhost:5432/postgres";

/// Default pool size.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default time to wait for a pooled connection.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// PostgreSQL adapter configuration.
#[derive(Debug, Clone)]
pub struct PgConfig {
    /// Connection URL.
    pub url: String,

    /// Maximum pooled connections.
    pub max_connections: u32,

    /// How long to wait for a free connection.
    pub acquire_timeout: Duration,

    /// Names of the ledger and lock tables.
    pub layout: StoreLayout,
}

impl PgConfig {
    /// Create a configuration for the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            layout: StoreLayout::default(),
        }
    }

    /// Read the URL from `DATABASE_URL`, falling back to [`DEFAULT_URL`].
    pub fn from_env() -> Self {
        Self::new(std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_URL.to_string()))
    }

    /// Set the pool size.
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the acquire timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the ledger and lock table names.
    pub fn with_layout(mut self, layout: StoreLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Open a connection pool.
    pub async fn connect(&self) -> Result<PgPool, PgError> {
        if self.max_connections == 0 {
            return Err(PgError::InvalidConfig(
                "max_connections must be at least 1".to_string(),
            ));
        }
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect(&self.url)
            .await?;
        Ok(pool)
    }
}

impl Default for PgConfig {
    fn default() -> Self {
        Self::new(DEFAULT_URL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PgConfig::default();
        assert_eq!(config.url, DEFAULT_URL);
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.layout.ledger_name, "_tidemark_ledger");
    }

    #[test]
    fn test_builder() {
        let config = PgConfig::new("postgres://db/analytics")
            .with_max_connections(2)
            .with_acquire_timeout(Duration::from_secs(5))
            .with_layout(StoreLayout::default().with_lock_name("_tidemark_analytics_locks"));
        assert_eq!(config.max_connections, 2);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
        assert_eq!(config.layout.lock_name, "_tidemark_analytics_locks");
    }

    #[tokio::test]
    async fn test_zero_pool_rejected() {
        let err = PgConfig::default()
            .with_max_connections(0)
            .connect()
            .await
            .unwrap_err();
        assert!(matches!(err, PgError::InvalidConfig(_)));
    }
}
