#![allow(dead_code)]

use std::sync::{Arc, Once};

use anyhow::Result;
use serde_json::{json, Value};

use pms_core::audit::{AuditLogEntry, AUDIT_ENTITY};
use pms_core::database::{QueryOptions, Record, TenantConnection, TenantRegistry};
use pms_core::filter::FilterData;
use pms_core::testing::{memory_registry, CountingConnector};

pub use pms_core::testing::user;

pub const TENANT: &str = "acme";
pub const ORG_A: &str = "org-a";
pub const ORG_B: &str = "org-b";

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Registry over in-memory tenants plus the connector behind it
pub fn registry_with(keys: &[&str], connector: CountingConnector) -> (Arc<TenantRegistry>, Arc<CountingConnector>) {
    init_tracing();
    let connector = Arc::new(connector);
    (memory_registry(keys, connector.clone()), connector)
}

/// Connection to a fresh single-tenant in-memory database
pub async fn tenant() -> Result<Arc<TenantConnection>> {
    let (registry, _) = registry_with(&[TENANT], CountingConnector::new());
    Ok(registry.get_or_create(TENANT).await?)
}

/// Every row of `entity`, across organizations
pub async fn all_rows(conn: &TenantConnection, entity: &str) -> Result<Vec<Record>> {
    let mut db = conn.acquire().await?;
    let order = if entity == AUDIT_ENTITY { "time asc" } else { "created_at asc" };
    let filter = FilterData {
        order: Some(json!(order)),
        ..Default::default()
    };
    Ok(conn
        .repository(entity)?
        .select_any_with(&mut db, filter, QueryOptions::ignore_organization_filter())
        .await?)
}

pub async fn audit_entries(conn: &TenantConnection) -> Result<Vec<AuditLogEntry>> {
    Ok(all_rows(conn, AUDIT_ENTITY)
        .await?
        .iter()
        .map(AuditLogEntry::from_record)
        .collect::<Result<Vec<_>, _>>()?)
}

pub fn project(name: &str, code: &str) -> Value {
    json!({ "name": name, "code": code, "status": "active" })
}

pub fn task(title: &str) -> Value {
    json!({ "title": title, "status": "open", "priority": 2 })
}
