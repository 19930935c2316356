use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Any, AnyPool};
use sqlx::pool::PoolConnection;
use sqlx::Transaction;

use crate::database::catalog::Dialect;
use crate::database::entity::{EntityDef, EntityRegistry};
use crate::database::error::DataError;
use crate::database::migrate;
use crate::database::repository::Repository;
use crate::observer::ObserverPipeline;

/// An authenticated, bounded pool for one tenant plus its entity model.
///
/// Handed out as `Arc<TenantConnection>` by the registry; every caller asking
/// for the same tenant key shares the same instance.
pub struct TenantConnection {
    key: String,
    dialect: Dialect,
    pool: AnyPool,
    entities: Arc<EntityRegistry>,
    pipeline: Arc<ObserverPipeline>,
    created_at: DateTime<Utc>,
}

impl TenantConnection {
    pub fn new(
        key: impl Into<String>,
        dialect: Dialect,
        pool: AnyPool,
        entities: Arc<EntityRegistry>,
        pipeline: Arc<ObserverPipeline>,
    ) -> Self {
        Self {
            key: key.into(),
            dialect,
            pool,
            entities,
            pipeline,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn entities(&self) -> &Arc<EntityRegistry> {
        &self.entities
    }

    pub fn pipeline(&self) -> &Arc<ObserverPipeline> {
        &self.pipeline
    }

    pub fn entity(&self, name: &str) -> Result<Arc<EntityDef>, DataError> {
        self.entities.get(name)
    }

    pub fn repository(&self, entity: &str) -> Result<Repository, DataError> {
        Ok(Repository::new(self.entity(entity)?, self.pipeline.clone()))
    }

    /// Check out a connection; an exhausted pool surfaces as a retryable
    /// [`DataError::PoolTimeout`].
    pub async fn acquire(&self) -> Result<PoolConnection<Any>, DataError> {
        Ok(self.pool.acquire().await?)
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Any>, DataError> {
        Ok(self.pool.begin().await?)
    }

    /// Liveness probe
    pub async fn ping(&self) -> Result<(), DataError> {
        let mut conn = self.acquire().await?;
        sqlx::query("SELECT 1").execute(&mut *conn).await?;
        Ok(())
    }

    pub async fn migrate(&self) -> Result<usize, DataError> {
        let mut conn = self.acquire().await?;
        let executed = migrate::migrate(&mut conn, &self.entities).await?;
        tracing::info!("Migrated tenant {} ({} statements)", self.key, executed);
        Ok(executed)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

impl std::fmt::Debug for TenantConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantConnection")
            .field("key", &self.key)
            .field("dialect", &self.dialect)
            .field("pool_size", &self.pool.size())
            .field("created_at", &self.created_at)
            .finish()
    }
}
