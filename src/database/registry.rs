use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{OnceCell, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::CONFIG;
use crate::database::catalog::{TenantCatalog, TenantEntry};
use crate::database::connection::TenantConnection;
use crate::database::connector::{SqlxConnector, TenantConnector};
use crate::database::entity::EntityRegistry;
use crate::database::error::DataError;
use crate::observer::ObserverPipeline;

type Slot = Arc<OnceCell<Arc<TenantConnection>>>;

/// Liveness of one cached tenant connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantHealth {
    pub tenant: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Process-wide map of tenant key → live connection.
///
/// Creation is single-flight per key: the first caller opens the pool while
/// concurrent callers for the same key wait on the same slot and receive the
/// same connection. A failed creation leaves the slot empty, so the next
/// call tries again.
pub struct TenantRegistry {
    catalog: TenantCatalog,
    connector: Arc<dyn TenantConnector>,
    entities: Arc<EntityRegistry>,
    pipeline: Arc<ObserverPipeline>,
    slots: RwLock<HashMap<String, Slot>>,
}

static GLOBAL: once_cell::sync::OnceCell<Arc<TenantRegistry>> = once_cell::sync::OnceCell::new();

impl TenantRegistry {
    pub fn new(catalog: TenantCatalog, connector: Arc<dyn TenantConnector>, table_prefix: &str) -> Self {
        Self {
            catalog,
            connector,
            entities: Arc::new(EntityRegistry::standard(table_prefix)),
            pipeline: Arc::new(ObserverPipeline::standard()),
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Registry over the configured catalog with the sqlx connector
    pub fn from_config() -> Result<Self, DataError> {
        Ok(Self::new(
            TenantCatalog::from_config()?,
            Arc::new(SqlxConnector::new(&CONFIG.database)),
            &CONFIG.tenants.table_prefix,
        ))
    }

    /// Shared process-wide registry, built from configuration on first use
    pub fn global() -> Result<Arc<TenantRegistry>, DataError> {
        GLOBAL.get_or_try_init(|| Self::from_config().map(Arc::new)).cloned()
    }

    pub fn catalog(&self) -> &TenantCatalog {
        &self.catalog
    }

    pub fn entities(&self) -> &Arc<EntityRegistry> {
        &self.entities
    }

    pub async fn get_or_create(&self, key: &str) -> Result<Arc<TenantConnection>, DataError> {
        let entry = self.catalog.get(key).ok_or_else(|| DataError::TenantNotFound(key.to_string()))?;

        // Fast path: cached and initialized
        let slot = {
            let slots = self.slots.read().await;
            match slots.get(key) {
                Some(slot) => match slot.get() {
                    Some(conn) => return Ok(conn.clone()),
                    None => Some(slot.clone()),
                },
                None => None,
            }
        };

        let slot = match slot {
            Some(slot) => slot,
            None => self.slots.write().await.entry(key.to_string()).or_default().clone(),
        };

        match slot.get_or_try_init(|| self.open(key, entry)).await {
            Ok(conn) => Ok(conn.clone()),
            Err(error) => {
                warn!("Failed to open connection for tenant {}: {}", key, error);
                self.discard_empty_slot(key, &slot).await;
                Err(error)
            }
        }
    }

    async fn open(&self, key: &str, entry: &TenantEntry) -> Result<Arc<TenantConnection>, DataError> {
        let pool = self.connector.connect(key, entry).await?;
        let conn = TenantConnection::new(key, entry.dialect, pool, self.entities.clone(), self.pipeline.clone());

        if entry.migrate_on_connect {
            if let Err(error) = conn.migrate().await {
                conn.close().await;
                return Err(error);
            }
        }

        info!("Opened {:?} connection for tenant {}", entry.dialect, key);
        Ok(Arc::new(conn))
    }

    async fn discard_empty_slot(&self, key: &str, slot: &Slot) {
        let mut slots = self.slots.write().await;
        if let Some(current) = slots.get(key) {
            if Arc::ptr_eq(current, slot) && current.get().is_none() {
                slots.remove(key);
            }
        }
    }

    /// Drop a cached connection; the next `get_or_create` reconnects.
    /// Returns whether a connection was cached.
    pub async fn evict(&self, key: &str) -> bool {
        let slot = self.slots.write().await.remove(key);
        match slot.and_then(|slot| slot.get().cloned()) {
            Some(conn) => {
                info!("Evicted connection for tenant {}", key);
                // Close waits for checked-out connections to be returned
                tokio::spawn(async move { conn.close().await });
                true
            }
            None => false,
        }
    }

    /// Ping a cached connection and evict it when the ping fails.
    /// Tenants that are not cached are reported healthy.
    pub async fn probe(&self, key: &str) -> Result<(), DataError> {
        let Some(conn) = self.cached(key).await else {
            return Ok(());
        };

        if let Err(error) = conn.ping().await {
            warn!("Liveness probe failed for tenant {}: {}", key, error);
            self.evict(key).await;
            return Err(error);
        }
        Ok(())
    }

    pub async fn probe_all(&self) -> Vec<TenantHealth> {
        let mut report = Vec::new();
        for tenant in self.cached_keys().await {
            let result = self.probe(&tenant).await;
            report.push(TenantHealth {
                healthy: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
                tenant,
            });
        }
        report
    }

    /// Probe every cached tenant on a fixed interval until the task is aborted
    pub fn spawn_liveness_monitor(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let unhealthy = self.probe_all().await.into_iter().filter(|h| !h.healthy).count();
                if unhealthy > 0 {
                    warn!("Liveness monitor evicted {} tenant connection(s)", unhealthy);
                }
            }
        })
    }

    async fn cached(&self, key: &str) -> Option<Arc<TenantConnection>> {
        self.slots.read().await.get(key).and_then(|slot| slot.get().cloned())
    }

    /// Keys with an open connection, sorted
    pub async fn cached_keys(&self) -> Vec<String> {
        let slots = self.slots.read().await;
        let mut keys: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub async fn close_all(&self) {
        let drained: Vec<(String, Slot)> = self.slots.write().await.drain().collect();
        for (key, slot) in drained {
            if let Some(conn) = slot.get() {
                conn.close().await;
                info!("Closed connection for tenant {}", key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use sqlx::AnyPool;

    struct Refusing(AtomicUsize);

    #[async_trait]
    impl TenantConnector for Refusing {
        async fn connect(&self, key: &str, _entry: &TenantEntry) -> Result<AnyPool, DataError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(DataError::ConnectionAuthentication {
                tenant: key.to_string(),
                reason: "password authentication failed".to_string(),
            })
        }
    }

    fn registry(connector: Arc<dyn TenantConnector>) -> TenantRegistry {
        let catalog = TenantCatalog::new().with_tenant("acme", TenantEntry::sqlite_memory());
        TenantRegistry::new(catalog, connector, "pms")
    }

    #[tokio::test]
    async fn unknown_tenant_is_rejected_before_connecting() {
        let connector = Arc::new(Refusing(AtomicUsize::new(0)));
        let registry = registry(connector.clone());
        let err = registry.get_or_create("nope").await.unwrap_err();
        assert!(matches!(err, DataError::TenantNotFound(key) if key == "nope"));
        assert_eq!(connector.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn authentication_failure_is_not_cached() {
        let connector = Arc::new(Refusing(AtomicUsize::new(0)));
        let registry = registry(connector.clone());

        for _ in 0..2 {
            let err = registry.get_or_create("acme").await.unwrap_err();
            assert!(matches!(err, DataError::ConnectionAuthentication { .. }));
        }
        assert_eq!(connector.0.load(Ordering::SeqCst), 2);
        assert!(registry.cached_keys().await.is_empty());
    }

    #[tokio::test]
    async fn probing_an_uncached_tenant_is_a_no_op() {
        let registry = registry(Arc::new(Refusing(AtomicUsize::new(0))));
        registry.probe("acme").await.unwrap();
        assert!(!registry.evict("acme").await);
    }
}
