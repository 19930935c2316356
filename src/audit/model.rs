use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::AnyConnection;
use uuid::Uuid;

use crate::context::ActorContext;
use crate::database::entity::EntityDef;
use crate::database::error::DataError;
use crate::database::query_builder::QueryBuilder;
use crate::database::record::Record;

/// Entity name of the audit table in every tenant
pub const AUDIT_ENTITY: &str = "audit_logs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    BulkCreate,
    BulkUpdate,
    BulkDelete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::BulkCreate => "bulk_create",
            AuditAction::BulkUpdate => "bulk_update",
            AuditAction::BulkDelete => "bulk_delete",
        }
    }

    pub fn is_bulk(&self) -> bool {
        matches!(self, AuditAction::BulkCreate | AuditAction::BulkUpdate | AuditAction::BulkDelete)
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(AuditAction::Create),
            "update" => Ok(AuditAction::Update),
            "delete" => Ok(AuditAction::Delete),
            "bulk_create" => Ok(AuditAction::BulkCreate),
            "bulk_update" => Ok(AuditAction::BulkUpdate),
            "bulk_delete" => Ok(AuditAction::BulkDelete),
            other => Err(DataError::InvalidValue {
                column: "action".to_string(),
                reason: format!("unknown audit action '{}'", other),
            }),
        }
    }
}

/// One row of the append-only audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: String,
    pub reference_id: Option<String>,
    pub table_name: String,
    pub action: AuditAction,
    pub snapshot: Value,
    pub updated_columns: Option<Vec<String>>,
    pub remarks: Option<String>,
    pub organization_id: Option<String>,
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub time: DateTime<Utc>,
}

impl AuditLogEntry {
    /// Entry for a finished operation. `reference_id` is the snapshot's `id`
    /// when the snapshot is a single record.
    pub fn build(
        actor: &ActorContext,
        organization_id: Option<String>,
        action: AuditAction,
        table_name: impl Into<String>,
        snapshot: Value,
        updated_columns: Option<Vec<String>>,
        remarks: Option<String>,
    ) -> Self {
        let reference_id = match &snapshot {
            Value::Object(map) => map.get("id").and_then(Value::as_str).map(str::to_string),
            _ => None,
        };

        Self {
            id: Uuid::new_v4().to_string(),
            reference_id,
            table_name: table_name.into(),
            action,
            snapshot,
            updated_columns,
            remarks,
            organization_id,
            user_id: actor.user_id().map(str::to_string),
            ip_address: actor.ip.clone(),
            user_agent: actor.user_agent.clone(),
            time: Utc::now(),
        }
    }

    pub fn to_record(&self) -> Result<Record, DataError> {
        let mut record = Record::new();
        if let Value::Object(map) = serde_json::to_value(self)? {
            for (key, value) in map {
                record.set_system_field(key, value);
            }
        }
        record.set_system_field("time", self.time.to_rfc3339());
        Ok(record)
    }

    pub fn from_record(record: &Record) -> Result<Self, DataError> {
        Ok(serde_json::from_value(record.to_json())?)
    }

    pub async fn insert(&self, conn: &mut AnyConnection, entity: &EntityDef) -> Result<(), DataError> {
        let bound = QueryBuilder::new(entity).insert(&self.to_record()?)?;
        bound.query().execute(&mut *conn).await?;
        tracing::debug!("Audit {} on {} ({:?})", self.action, self.table_name, self.reference_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::entity::EntityRegistry;
    use crate::database::entity::BindValue;
    use serde_json::json;

    fn actor() -> ActorContext {
        ActorContext::new().with_user("u1", None).with_ip("127.0.0.1").with_user_agent("curl")
    }

    #[test]
    fn action_names_round_trip_through_serde() {
        assert_eq!(serde_json::to_value(AuditAction::BulkCreate).unwrap(), json!("bulk_create"));
        assert_eq!("bulk_delete".parse::<AuditAction>().unwrap(), AuditAction::BulkDelete);
        assert!("truncate".parse::<AuditAction>().is_err());
        assert!(AuditAction::BulkUpdate.is_bulk());
        assert!(!AuditAction::Update.is_bulk());
    }

    #[test]
    fn reference_id_only_for_single_object_snapshots() {
        let single = AuditLogEntry::build(&actor(), None, AuditAction::Create, "pms_tasks", json!({ "id": "t1" }), None, None);
        assert_eq!(single.reference_id.as_deref(), Some("t1"));

        let bulk = AuditLogEntry::build(
            &actor(),
            None,
            AuditAction::BulkCreate,
            "pms_tasks",
            json!([{ "id": "t1" }, { "id": "t2" }]),
            None,
            None,
        );
        assert_eq!(bulk.reference_id, None);
    }

    #[test]
    fn insert_stores_json_as_text_and_skips_nulls() {
        let entities = EntityRegistry::standard("pms");
        let entity = entities.get(AUDIT_ENTITY).unwrap();
        let entry = AuditLogEntry::build(
            &actor(),
            Some("org-a".to_string()),
            AuditAction::Update,
            "pms_tasks",
            json!({ "id": "t1", "status": "done" }),
            Some(vec!["status".to_string()]),
            None,
        );

        let bound = QueryBuilder::new(&entity).insert(&entry.to_record().unwrap()).unwrap();
        assert!(bound.sql.starts_with("INSERT INTO \"pms_audit_logs\" (\"action\", \"id\", \"ip_address\", \"organization_id\", \"reference_id\", \"snapshot\", \"table_name\", \"time\", \"updated_columns\", \"user_agent\", \"user_id\")"));
        assert!(bound.binds.contains(&BindValue::Text("[\"status\"]".to_string())));
        assert!(bound.binds.contains(&BindValue::Text("update".to_string())));
    }
}
