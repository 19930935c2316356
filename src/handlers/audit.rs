use axum::extract::{Extension, Query};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::audit::{AuditAction, AuditLogEntry, AUDIT_ENTITY};
use crate::error::ApiError;
use crate::filter::FilterData;
use crate::middleware::{ApiResponse, ApiResult, TenantHandle};

const DEFAULT_LIMIT: i32 = 50;

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    /// Entity name, e.g. `tasks`
    pub entity: Option<String>,
    pub action: Option<String>,
    pub reference_id: Option<String>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

/// GET /api/audit - audit rows of the request's organization, newest first
pub async fn list(Extension(TenantHandle(conn)): Extension<TenantHandle>, Query(query): Query<AuditQuery>) -> ApiResult<Vec<AuditLogEntry>> {
    let mut conditions = Map::new();
    if let Some(entity) = &query.entity {
        conditions.insert("table_name".to_string(), json!(conn.entity(entity)?.table));
    }
    if let Some(action) = &query.action {
        let action: AuditAction = action.parse().map_err(ApiError::from)?;
        conditions.insert("action".to_string(), json!(action.as_str()));
    }
    if let Some(reference_id) = &query.reference_id {
        conditions.insert("reference_id".to_string(), json!(reference_id));
    }

    let filter = FilterData {
        where_clause: Some(Value::Object(conditions)),
        order: Some(json!("time desc")),
        limit: Some(query.limit.unwrap_or(DEFAULT_LIMIT)),
        offset: query.offset,
        ..Default::default()
    };

    let mut db = conn.acquire().await?;
    let records = conn.repository(AUDIT_ENTITY)?.select_any(&mut db, filter).await?;
    let entries = records
        .iter()
        .map(AuditLogEntry::from_record)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ApiResponse::success(entries))
}
