mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use serde_json::json;

use pms_core::audit::{run_audited, AuditAction, AuditRequest};
use pms_core::context::run_with_context;
use pms_core::database::DataError;
use pms_core::testing::CountingConnector;

use common::*;

#[tokio::test]
async fn concurrent_first_requests_share_one_connection() -> Result<()> {
    let (registry, connector) = registry_with(&[TENANT], CountingConnector::new().with_delay(Duration::from_millis(50)));

    let attempts = (0..16).map(|_| {
        let registry = registry.clone();
        tokio::spawn(async move { registry.get_or_create(TENANT).await })
    });
    let conns = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| -> Result<_> { Ok(joined??) })
        .collect::<Result<Vec<_>>>()?;

    assert_eq!(connector.calls(), 1);
    assert!(conns.iter().all(|conn| Arc::ptr_eq(conn, &conns[0])));
    assert_eq!(registry.cached_keys().await, vec![TENANT.to_string()]);
    Ok(())
}

#[tokio::test]
async fn failed_authentication_is_retried_on_next_request() -> Result<()> {
    let (registry, connector) = registry_with(&[TENANT], CountingConnector::new().refusing_first(1));

    let err = registry.get_or_create(TENANT).await.unwrap_err();
    assert!(matches!(err, DataError::ConnectionAuthentication { ref tenant, .. } if tenant == TENANT));
    assert!(registry.cached_keys().await.is_empty());

    let conn = registry.get_or_create(TENANT).await?;
    conn.ping().await?;
    assert_eq!(connector.calls(), 2);

    // Now cached: no further connects
    registry.get_or_create(TENANT).await?;
    assert_eq!(connector.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn unknown_tenant_never_reaches_the_connector() -> Result<()> {
    let (registry, connector) = registry_with(&[TENANT], CountingConnector::new());

    let err = registry.get_or_create("globex").await.unwrap_err();
    assert!(matches!(err, DataError::TenantNotFound(ref key) if key == "globex"));
    assert_eq!(connector.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn tenants_do_not_share_data() -> Result<()> {
    let (registry, _) = registry_with(&["acme", "globex"], CountingConnector::new());
    let acme = registry.get_or_create("acme").await?;
    let globex = registry.get_or_create("globex").await?;
    assert!(!Arc::ptr_eq(&acme, &globex));

    let request = AuditRequest::new(user("u1", ORG_A), AuditAction::Create, "projects");
    run_with_context(ORG_A, run_audited(&acme, request, |tx| {
        Box::pin(async move { tx.create_one("projects", project("Apollo", "APL")).await })
    }))
    .await?;

    assert_eq!(all_rows(&acme, "projects").await?.len(), 1);
    assert!(all_rows(&globex, "projects").await?.is_empty());
    assert!(audit_entries(&globex).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_probe_evicts_and_next_request_reconnects() -> Result<()> {
    let (registry, connector) = registry_with(&[TENANT], CountingConnector::new());
    let first = registry.get_or_create(TENANT).await?;

    registry.probe(TENANT).await?;
    assert_eq!(registry.cached_keys().await.len(), 1);

    // Simulate the server dropping the connection
    first.close().await;
    assert!(registry.probe(TENANT).await.is_err());
    assert!(registry.cached_keys().await.is_empty());

    let second = registry.get_or_create(TENANT).await?;
    assert!(!Arc::ptr_eq(&first, &second));
    second.ping().await?;
    assert_eq!(connector.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn probe_all_reports_cached_tenants() -> Result<()> {
    let (registry, _) = registry_with(&["acme", "globex"], CountingConnector::new());
    registry.get_or_create("globex").await?;

    let report = registry.probe_all().await;
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].tenant, "globex");
    assert!(report[0].healthy);
    assert_eq!(serde_json::to_value(&report[0])?, json!({ "tenant": "globex", "healthy": true }));
    Ok(())
}

#[tokio::test]
async fn exhausted_pool_fails_with_retryable_timeout() -> Result<()> {
    let (registry, _) = registry_with(
        &[TENANT],
        CountingConnector::new().with_acquire_timeout(Duration::from_millis(100)),
    );
    let conn = registry.get_or_create(TENANT).await?;

    // The in-memory pool holds a single connection
    let held = conn.begin().await?;

    let request = AuditRequest::new(user("u1", ORG_A), AuditAction::Create, "projects");
    let err = run_with_context(ORG_A, run_audited(&conn, request, |tx| {
        Box::pin(async move { tx.create_one("projects", project("Apollo", "APL")).await })
    }))
    .await
    .unwrap_err();

    assert!(err.is_retryable(), "expected a retryable error, got {err:?}");
    assert!(matches!(err.root_cause(), DataError::PoolTimeout));

    held.rollback().await?;
    assert!(all_rows(&conn, "projects").await?.is_empty());
    assert!(audit_entries(&conn).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn close_all_empties_the_registry() -> Result<()> {
    let (registry, _) = registry_with(&["acme", "globex"], CountingConnector::new());
    let acme = registry.get_or_create("acme").await?;
    registry.get_or_create("globex").await?;

    registry.close_all().await;
    assert!(registry.cached_keys().await.is_empty());
    assert!(acme.is_closed());

    let reopened = registry.get_or_create("acme").await?;
    assert!(!Arc::ptr_eq(&acme, &reopened));
    reopened.ping().await?;
    Ok(())
}
