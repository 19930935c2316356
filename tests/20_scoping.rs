mod common;

use anyhow::Result;
use serde_json::json;

use pms_core::audit::{run_audited, AuditAction, AuditRequest};
use pms_core::context::{current_organization_id, run_with_context, spawn_with_context, ActorContext};
use pms_core::database::{DataError, QueryOptions, Record, TenantConnection};
use pms_core::filter::FilterData;

use common::*;

async fn create_task(conn: &TenantConnection, organization_id: &str, title: &str, status: &str) -> Result<Record> {
    let mut data = task(title);
    data["status"] = json!(status);
    let request = AuditRequest::new(user("u1", organization_id), AuditAction::Create, "tasks");
    let created = run_with_context(organization_id, run_audited(conn, request, |tx| {
        Box::pin(async move { tx.create_one("tasks", data).await })
    }))
    .await?;
    Ok(created)
}

async fn seed(conn: &TenantConnection) -> Result<()> {
    create_task(conn, ORG_A, "a-open", "open").await?;
    create_task(conn, ORG_A, "a-done", "done").await?;
    create_task(conn, ORG_B, "b-open", "open").await?;
    Ok(())
}

async fn titles(conn: &TenantConnection, filter: FilterData) -> Result<Vec<String>, DataError> {
    let mut db = conn.acquire().await?;
    let mut titles: Vec<String> = conn
        .repository("tasks")?
        .select_any(&mut db, filter)
        .await?
        .iter()
        .filter_map(|r| r.get_str("title").map(str::to_string))
        .collect();
    titles.sort();
    Ok(titles)
}

#[tokio::test]
async fn reads_only_see_the_ambient_organization() -> Result<()> {
    let conn = tenant().await?;
    seed(&conn).await?;

    let a = run_with_context(ORG_A, titles(&conn, FilterData::default())).await?;
    assert_eq!(a, vec!["a-done", "a-open"]);

    let b = run_with_context(ORG_B, titles(&conn, FilterData::default())).await?;
    assert_eq!(b, vec!["b-open"]);
    Ok(())
}

#[tokio::test]
async fn caller_conditions_are_combined_with_the_organization() -> Result<()> {
    let conn = tenant().await?;
    seed(&conn).await?;

    let open = run_with_context(ORG_A, titles(&conn, FilterData::with_where(json!({ "status": "open" })))).await?;
    assert_eq!(open, vec!["a-open"]);

    // A caller-supplied organization can only narrow the result
    let foreign = run_with_context(
        ORG_A,
        titles(&conn, FilterData::with_where(json!({ "organization_id": ORG_B }))),
    )
    .await?;
    assert!(foreign.is_empty());

    let either = run_with_context(
        ORG_A,
        titles(&conn, FilterData::with_where(json!({ "$or": [{ "organization_id": ORG_B }, { "status": "done" }] }))),
    )
    .await?;
    assert_eq!(either, vec!["a-done"]);
    Ok(())
}

#[tokio::test]
async fn reads_without_organization_fail_closed() -> Result<()> {
    let conn = tenant().await?;
    seed(&conn).await?;

    let err = titles(&conn, FilterData::default()).await.unwrap_err();
    assert!(matches!(err, DataError::MissingOrganizationContext));
    assert_eq!(err.to_string(), "Organization not found");
    Ok(())
}

#[tokio::test]
async fn bypass_is_denied_inside_a_request() -> Result<()> {
    let conn = tenant().await?;
    seed(&conn).await?;

    let err = run_with_context(ORG_A, async {
        let mut db = conn.acquire().await?;
        conn.repository("tasks")?
            .select_any_with(&mut db, FilterData::default(), QueryOptions::ignore_organization_filter())
            .await
    })
    .await
    .unwrap_err();
    assert!(matches!(err, DataError::OrganizationBypassDenied));

    // Outside a request the bypass sees every organization
    assert_eq!(all_rows(&conn, "tasks").await?.len(), 3);
    Ok(())
}

#[tokio::test]
async fn writes_cannot_reach_other_organizations() -> Result<()> {
    let conn = tenant().await?;
    let foreign = create_task(&conn, ORG_B, "b-open", "open").await?;
    let foreign_id = foreign.id().unwrap_or_default().to_string();

    let request = AuditRequest::new(user("u1", ORG_A), AuditAction::Update, "tasks");
    let err = run_with_context(ORG_A, run_audited(&conn, request, |tx| {
        Box::pin(async move { tx.update_one("tasks", &foreign_id, json!({ "status": "hijacked" })).await })
    }))
    .await
    .unwrap_err();
    assert!(matches!(err.root_cause(), DataError::NotFound(_)));

    let rows = all_rows(&conn, "tasks").await?;
    assert_eq!(rows[0].get_str("status"), Some("open"));
    // Only the original create was audited
    assert_eq!(audit_entries(&conn).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn actor_organization_must_match_the_request() -> Result<()> {
    let conn = tenant().await?;

    let request = AuditRequest::new(user("u1", ORG_B), AuditAction::Create, "tasks");
    let err = run_with_context(ORG_A, run_audited(&conn, request, |tx| {
        Box::pin(async move { tx.create_one("tasks", task("sneaky")).await })
    }))
    .await
    .unwrap_err();
    assert!(matches!(err, DataError::OrganizationMismatch { ref actor, ref request } if actor == ORG_B && request == ORG_A));

    assert!(all_rows(&conn, "tasks").await?.is_empty());
    assert!(audit_entries(&conn).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn context_follows_spawned_tasks() -> Result<()> {
    let conn = tenant().await?;
    seed(&conn).await?;

    let (seen, inner) = run_with_context(ORG_B, async {
        let conn = conn.clone();
        let handle = spawn_with_context(async move {
            let titles = titles(&conn, FilterData::default()).await;
            (current_organization_id(), titles)
        });
        handle.await
    })
    .await?;

    assert_eq!(seen.as_deref(), Some(ORG_B));
    assert_eq!(inner?, vec!["b-open"]);

    // A plain spawn starts without one
    let detached = run_with_context(ORG_B, async { tokio::spawn(async { current_organization_id() }).await }).await?;
    assert_eq!(detached, None);
    Ok(())
}

#[tokio::test]
async fn records_are_stamped_with_the_actor() -> Result<()> {
    let conn = tenant().await?;
    let created = create_task(&conn, ORG_A, "stamped", "open").await?;

    assert_eq!(created.organization_id(), Some(ORG_A));
    assert_eq!(created.get_str("created_by"), Some("u1"));
    assert_eq!(created.get_str("updated_by"), Some("u1"));
    assert_eq!(created.get_str("created_ip"), Some("127.0.0.1"));
    assert_eq!(created.get_str("created_user_agent"), Some("pms-tests"));
    assert_eq!(created.get_str("created_at"), created.get_str("updated_at"));

    let id = created.id().unwrap_or_default().to_string();
    let editor = ActorContext::new().with_user("u2", None).with_organization(ORG_A);
    let request = AuditRequest::new(editor, AuditAction::Update, "tasks").updated_columns(["title"]);
    let updated = run_with_context(ORG_A, run_audited(&conn, request, |tx| {
        Box::pin(async move { tx.update_one("tasks", &id, json!({ "title": "renamed" })).await })
    }))
    .await?;

    assert_eq!(updated.get_str("title"), Some("renamed"));
    assert_eq!(updated.get_str("created_by"), Some("u1"));
    assert_eq!(updated.get_str("updated_by"), Some("u2"));
    assert_eq!(updated.get_str("created_at"), created.get_str("created_at"));

    let stored = all_rows(&conn, "tasks").await?;
    assert_eq!(stored[0].get_str("updated_by"), Some("u2"));
    assert_eq!(stored[0].get_str("title"), Some("renamed"));
    Ok(())
}

#[tokio::test]
async fn lookups_by_id_respect_the_organization() -> Result<()> {
    let conn = tenant().await?;
    let mine = create_task(&conn, ORG_A, "mine", "open").await?;
    let theirs = create_task(&conn, ORG_B, "theirs", "open").await?;
    let ids = vec![
        mine.id().unwrap_or_default().to_string(),
        theirs.id().unwrap_or_default().to_string(),
    ];

    run_with_context(ORG_A, async {
        let mut db = conn.acquire().await?;
        let tasks = conn.repository("tasks")?;

        let found = tasks.select_ids(&mut db, &ids).await?;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get_str("title"), Some("mine"));

        let err = tasks
            .select_404(&mut db, FilterData::with_where(json!({ "id": ids[1] })))
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::NotFound(_)));

        assert_eq!(tasks.count(&mut db, FilterData::default()).await?, 1);
        Ok::<_, DataError>(())
    })
    .await?;
    Ok(())
}
