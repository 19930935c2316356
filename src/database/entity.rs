use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::DateTime;
use serde_json::Value;

use crate::database::error::DataError;

/// Stamped on every organization-scoped row by the audit stamper
pub const COMMON_FIELDS: &[&str] = &[
    "organization_id",
    "created_by",
    "updated_by",
    "created_ip",
    "updated_ip",
    "created_user_agent",
    "updated_user_agent",
    "created_at",
    "updated_at",
];

/// Portable storage types; JSON and timestamps are kept as text on every dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Json,
    Timestamp,
}

impl ColumnType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Integer => "BIGINT",
            ColumnType::Text | ColumnType::Json | ColumnType::Timestamp => "TEXT",
        }
    }

    /// Encode a non-null JSON value for binding
    pub fn to_bind(&self, column: &str, value: &Value) -> Result<BindValue, DataError> {
        let invalid = |reason: &str| DataError::InvalidValue {
            column: column.to_string(),
            reason: reason.to_string(),
        };

        match (self, value) {
            (_, Value::Null) => Err(invalid("null cannot be bound")),
            (ColumnType::Json, v) => Ok(BindValue::Text(serde_json::to_string(v)?)),
            (ColumnType::Integer, Value::Number(n)) => n.as_i64().map(BindValue::Integer).ok_or_else(|| invalid("expected an integer")),
            (ColumnType::Integer, Value::String(s)) => s.trim().parse().map(BindValue::Integer).map_err(|_| invalid("expected an integer")),
            (ColumnType::Integer, Value::Bool(b)) => Ok(BindValue::Integer(i64::from(*b))),
            (ColumnType::Integer, _) => Err(invalid("expected an integer")),
            (ColumnType::Timestamp, Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .map(|dt| BindValue::Text(dt.to_rfc3339()))
                .map_err(|_| invalid("expected an RFC 3339 timestamp")),
            (ColumnType::Timestamp, _) => Err(invalid("expected an RFC 3339 timestamp")),
            (ColumnType::Text, Value::String(s)) => Ok(BindValue::Text(s.clone())),
            (ColumnType::Text, Value::Number(n)) => Ok(BindValue::Text(n.to_string())),
            (ColumnType::Text, Value::Bool(b)) => Ok(BindValue::Text(b.to_string())),
            (ColumnType::Text, _) => Err(invalid("expected a scalar")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Text(String),
    Integer(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub required: bool,
}

/// A table bound to a tenant: its columns, scoping and write rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDef {
    pub name: String,
    pub table: String,
    pub columns: Vec<ColumnDef>,
    pub organization_scoped: bool,
    pub append_only: bool,
    pub unique_keys: Vec<Vec<String>>,
}

impl EntityDef {
    /// Entity with an `id` primary key and the common audit columns
    pub fn scoped(name: &str, prefix: &str) -> Self {
        let mut entity = Self::bare(name, prefix);
        entity.organization_scoped = true;
        for field in COMMON_FIELDS {
            let column_type = if field.ends_with("_at") { ColumnType::Timestamp } else { ColumnType::Text };
            entity = entity.column(field, column_type);
        }
        entity
    }

    /// Entity with only an `id` primary key
    pub fn bare(name: &str, prefix: &str) -> Self {
        let table = if prefix.is_empty() { name.to_string() } else { format!("{}_{}", prefix, name) };
        Self {
            name: name.to_string(),
            table,
            columns: vec![ColumnDef { name: "id".to_string(), column_type: ColumnType::Text, required: true }],
            organization_scoped: false,
            append_only: false,
            unique_keys: vec![],
        }
    }

    pub fn column(mut self, name: &str, column_type: ColumnType) -> Self {
        self.columns.push(ColumnDef { name: name.to_string(), column_type, required: false });
        self
    }

    pub fn required(mut self, name: &str, column_type: ColumnType) -> Self {
        self.columns.push(ColumnDef { name: name.to_string(), column_type, required: true });
        self
    }

    pub fn unique(mut self, columns: &[&str]) -> Self {
        self.unique_keys.push(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn append_only(mut self) -> Self {
        self.append_only = true;
        self
    }

    pub fn organization_scoped(mut self, scoped: bool) -> Self {
        self.organization_scoped = scoped;
        self
    }

    pub fn column_def(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_def(name).is_some()
    }

    pub fn column_type(&self, name: &str) -> Result<ColumnType, DataError> {
        self.column_def(name)
            .map(|c| c.column_type)
            .ok_or_else(|| DataError::InvalidValue {
                column: name.to_string(),
                reason: format!("unknown column for entity '{}'", self.name),
            })
    }
}

/// Entity definitions bound to one tenant connection
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: BTreeMap<String, Arc<EntityDef>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entity: EntityDef) -> &mut Self {
        self.entities.insert(entity.name.clone(), Arc::new(entity));
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<EntityDef>, DataError> {
        self.entities
            .get(name)
            .cloned()
            .ok_or_else(|| DataError::UnknownEntity(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<EntityDef>> {
        self.entities.values()
    }

    /// The project-management entity set
    pub fn standard(prefix: &str) -> Self {
        use ColumnType::*;

        let mut registry = Self::new();
        registry
            .register(
                EntityDef::scoped("projects", prefix)
                    .required("name", Text)
                    .column("code", Text)
                    .column("description", Text)
                    .column("status", Text)
                    .column("start_date", Timestamp)
                    .column("end_date", Timestamp)
                    .unique(&["organization_id", "code"]),
            )
            .register(
                EntityDef::scoped("tasks", prefix)
                    .column("project_id", Text)
                    .required("title", Text)
                    .column("description", Text)
                    .column("status", Text)
                    .column("priority", Integer)
                    .column("assignee_id", Text)
                    .column("live_status", Text)
                    .column("last_start_time", Timestamp)
                    .column("estimated_time", Integer)
                    .column("total_work_time", Integer)
                    .column("todays_worked_time", Integer),
            )
            .register(
                EntityDef::scoped("issues", prefix)
                    .column("project_id", Text)
                    .required("title", Text)
                    .column("description", Text)
                    .column("status", Text)
                    .column("priority", Integer)
                    .column("reporter_id", Text)
                    .column("assignee_id", Text),
            )
            .register(
                EntityDef::scoped("issue_histories", prefix)
                    .required("issue_id", Text)
                    .column("field", Text)
                    .column("old_value", Text)
                    .column("new_value", Text)
                    .column("changes", Json)
                    .column("remarks", Text),
            )
            .register(
                EntityDef::scoped("notifications", prefix)
                    .column("user_id", Text)
                    .required("title", Text)
                    .column("message", Text)
                    .column("payload", Json)
                    .column("read_at", Timestamp),
            )
            .register(
                EntityDef::bare("audit_logs", prefix)
                    .organization_scoped(true)
                    .append_only()
                    .column("reference_id", Text)
                    .required("table_name", Text)
                    .required("action", Text)
                    .column("snapshot", Json)
                    .column("updated_columns", Json)
                    .column("remarks", Text)
                    .column("organization_id", Text)
                    .column("user_id", Text)
                    .column("ip_address", Text)
                    .column("user_agent", Text)
                    .required("time", Timestamp),
            );
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn standard_entities_are_prefixed_and_scoped() {
        let registry = EntityRegistry::standard("pms");
        let tasks = registry.get("tasks").unwrap();
        assert_eq!(tasks.table, "pms_tasks");
        assert!(tasks.organization_scoped);
        assert!(COMMON_FIELDS.iter().all(|f| tasks.has_column(f)));

        let audit = registry.get("audit_logs").unwrap();
        assert!(audit.append_only);
        assert!(!audit.has_column("created_by"));
        assert!(matches!(registry.get("nope"), Err(DataError::UnknownEntity(_))));
    }

    #[test]
    fn binds_by_column_type() {
        assert_eq!(ColumnType::Integer.to_bind("n", &json!(42)).unwrap(), BindValue::Integer(42));
        assert_eq!(ColumnType::Integer.to_bind("n", &json!("7")).unwrap(), BindValue::Integer(7));
        assert_eq!(ColumnType::Text.to_bind("s", &json!(3)).unwrap(), BindValue::Text("3".into()));
        assert_eq!(
            ColumnType::Json.to_bind("j", &json!({ "a": [1] })).unwrap(),
            BindValue::Text("{\"a\":[1]}".into())
        );
        assert!(ColumnType::Integer.to_bind("n", &json!(1.5)).is_err());
        assert!(ColumnType::Timestamp.to_bind("t", &json!("yesterday")).is_err());
        assert!(ColumnType::Text.to_bind("s", &json!(null)).is_err());
    }
}
