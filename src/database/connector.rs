use std::time::Duration;

use async_trait::async_trait;
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;

use crate::config::DatabaseConfig;
use crate::database::catalog::TenantEntry;
use crate::database::error::DataError;

/// Opens and authenticates a pool for one tenant.
///
/// The registry only calls this on a cache miss; an implementation must not
/// return a pool it has not verified.
#[async_trait]
pub trait TenantConnector: Send + Sync {
    async fn connect(&self, key: &str, entry: &TenantEntry) -> Result<AnyPool, DataError>;
}

/// sqlx-backed connector for Postgres and SQLite tenants
#[derive(Debug, Clone)]
pub struct SqlxConnector {
    max_connections: u32,
    acquire_timeout: Duration,
    idle_timeout: Option<Duration>,
}

impl SqlxConnector {
    pub fn new(config: &DatabaseConfig) -> Self {
        sqlx::any::install_default_drivers();
        Self {
            max_connections: config.max_connections,
            acquire_timeout: config.acquire_timeout(),
            idle_timeout: config.idle_timeout(),
        }
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    fn pool_options(&self, entry: &TenantEntry) -> AnyPoolOptions {
        let options = AnyPoolOptions::new().acquire_timeout(self.acquire_timeout);

        // Each new in-memory connection would open a separate empty database
        if entry.is_in_memory() {
            return options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        options
            .max_connections(entry.max_connections.unwrap_or(self.max_connections))
            .idle_timeout(self.idle_timeout)
    }
}

#[async_trait]
impl TenantConnector for SqlxConnector {
    async fn connect(&self, key: &str, entry: &TenantEntry) -> Result<AnyPool, DataError> {
        let url = entry.connection_url()?;
        let auth_failed = |reason: String| DataError::ConnectionAuthentication {
            tenant: key.to_string(),
            reason,
        };

        let pool = self
            .pool_options(entry)
            .connect(&url)
            .await
            .map_err(|e| auth_failed(e.to_string()))?;

        if let Err(e) = sqlx::query("SELECT 1").execute(&pool).await {
            pool.close().await;
            return Err(auth_failed(e.to_string()));
        }

        tracing::debug!("Authenticated {:?} connection for tenant {}", entry.dialect, key);
        Ok(pool)
    }
}
