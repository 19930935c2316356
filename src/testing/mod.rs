// Test support: in-memory tenants and an instrumented connector.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::AnyPool;

use crate::config::CONFIG;
use crate::context::ActorContext;
use crate::database::{DataError, SqlxConnector, TenantCatalog, TenantConnector, TenantEntry, TenantRegistry};

/// Wraps [`SqlxConnector`], counting connection attempts.
///
/// Can slow every attempt down (to widen race windows) and refuse the first
/// `n` attempts with an authentication error.
pub struct CountingConnector {
    inner: SqlxConnector,
    calls: AtomicUsize,
    refuse_remaining: AtomicUsize,
    delay: Option<Duration>,
}

impl CountingConnector {
    pub fn new() -> Self {
        Self {
            inner: SqlxConnector::new(&CONFIG.database),
            calls: AtomicUsize::new(0),
            refuse_remaining: AtomicUsize::new(0),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn refusing_first(self, attempts: usize) -> Self {
        self.refuse_remaining.store(attempts, Ordering::SeqCst);
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.inner = self.inner.with_acquire_timeout(timeout);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for CountingConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TenantConnector for CountingConnector {
    async fn connect(&self, key: &str, entry: &TenantEntry) -> Result<AnyPool, DataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let refused = self
            .refuse_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(DataError::ConnectionAuthentication {
                tenant: key.to_string(),
                reason: "password authentication failed".to_string(),
            });
        }

        self.inner.connect(key, entry).await
    }
}

/// Catalog of private in-memory SQLite tenants
pub fn memory_catalog(keys: &[&str]) -> TenantCatalog {
    keys.iter()
        .fold(TenantCatalog::new(), |catalog, key| catalog.with_tenant(*key, TenantEntry::sqlite_memory()))
}

pub fn memory_registry(keys: &[&str], connector: Arc<CountingConnector>) -> Arc<TenantRegistry> {
    Arc::new(TenantRegistry::new(memory_catalog(keys), connector, "pms"))
}

/// Authenticated user acting for `organization_id`
pub fn user(id: &str, organization_id: &str) -> ActorContext {
    ActorContext::new()
        .with_user(id, Some(format!("User {}", id)))
        .with_organization(organization_id)
        .with_ip("127.0.0.1")
        .with_user_agent("pms-tests")
}
