// Ring 4: Audit Stamp - fills the common audit columns from the actor
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::context::ActorContext;
use crate::database::entity::EntityDef;
use crate::database::record::Record;
use crate::observer::context::ObserverContext;
use crate::observer::error::ObserverError;
use crate::observer::traits::{Observer, ObserverRing, Operation};

/// Stamps who/where/when on every written record.
///
/// Creates get the full set (`organization_id`, `created_*`, `updated_*`, a
/// generated `id` when the caller gave none). Updates only restamp the
/// `updated_*` fields. Every record of one call shares a single timestamp.
#[derive(Debug, Default)]
pub struct AuditStampObserver;

#[async_trait]
impl Observer for AuditStampObserver {
    fn name(&self) -> &'static str {
        "AuditStampObserver"
    }

    fn ring(&self) -> ObserverRing {
        ObserverRing::Enrichment
    }

    fn applies_to_operation(&self, op: Operation) -> bool {
        matches!(op, Operation::Create | Operation::Update)
    }

    fn applies_to_entity(&self, entity: &EntityDef) -> bool {
        entity.has_column("created_at")
    }

    async fn execute(&self, ctx: &mut ObserverContext) -> Result<(), ObserverError> {
        let actor = ctx
            .actor
            .clone()
            .ok_or_else(|| ObserverError::SystemError(format!("{:?} on {} without an actor", ctx.operation, ctx.entity.name)))?;
        let organization_id = actor.effective_organization()?;
        let stamp = Stamp::new(&actor);

        match ctx.operation {
            Operation::Create => {
                let organization_id = organization_id.ok_or(ObserverError::MissingOrganization)?;
                for record in ctx.records.iter_mut() {
                    if record.id().is_none() {
                        record.set("id", Uuid::new_v4().to_string());
                    }
                    record.set_system_field("organization_id", organization_id.clone());
                    stamp.apply(record, "created");
                    stamp.apply(record, "updated");
                }
            }
            Operation::Update => {
                for record in ctx.records.iter_mut() {
                    stamp.apply(record, "updated");
                }
            }
            _ => {}
        }

        tracing::debug!(
            "Stamped {} {} record(s) on {}",
            ctx.records.len(),
            if ctx.operation == Operation::Create { "new" } else { "updated" },
            ctx.entity.name
        );
        Ok(())
    }
}

/// Actor fields to stamp; absent ones leave the record's value untouched.
struct Stamp {
    user_id: Option<String>,
    ip: Option<String>,
    user_agent: Option<String>,
    at: String,
}

impl Stamp {
    fn new(actor: &ActorContext) -> Self {
        Self {
            user_id: actor.user_id().map(str::to_string),
            ip: actor.ip.clone(),
            user_agent: actor.user_agent.clone(),
            at: Utc::now().to_rfc3339(),
        }
    }

    fn apply(&self, record: &mut Record, prefix: &str) {
        let fields = [("by", &self.user_id), ("ip", &self.ip), ("user_agent", &self.user_agent)];
        for (suffix, value) in fields {
            if let Some(value) = value {
                record.set_system_field(format!("{}_{}", prefix, suffix), value.clone());
            }
        }
        record.set_system_field(format!("{}_at", prefix), self.at.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use serde_json::json;

    use crate::context::run_with_context;
    use crate::database::entity::EntityRegistry;

    fn actor() -> ActorContext {
        ActorContext::new()
            .with_user("user-1", Some("Ada".to_string()))
            .with_ip("10.1.2.3")
            .with_user_agent("test-agent")
    }

    fn write_ctx(operation: Operation, records: Vec<Record>, actor: ActorContext) -> ObserverContext {
        let entity = EntityRegistry::standard("pms").get("projects").unwrap();
        ObserverContext::new_write(operation, entity, records, actor)
    }

    #[tokio::test]
    async fn create_stamps_every_record_identically() {
        let records = vec![
            Record::from_json(json!({ "name": "A" })).unwrap(),
            Record::from_json(json!({ "name": "B" })).unwrap(),
        ];
        let mut ctx = write_ctx(Operation::Create, records, actor());
        run_with_context("org-a", AuditStampObserver.execute(&mut ctx)).await.unwrap();

        let (a, b) = (&ctx.records[0], &ctx.records[1]);
        for field in ["organization_id", "created_by", "created_ip", "created_user_agent", "created_at", "updated_at"] {
            assert_eq!(a.get(field), b.get(field), "{}", field);
        }
        assert_eq!(a.get_str("organization_id"), Some("org-a"));
        assert_eq!(a.get_str("created_by"), Some("user-1"));
        assert_eq!(a.get_str("updated_ip"), Some("10.1.2.3"));
        assert_eq!(a.get("created_at"), a.get("updated_at"));
        assert!(a.id().is_some());
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn create_without_organization_fails_closed() {
        let mut ctx = write_ctx(Operation::Create, vec![Record::from_json(json!({ "name": "A" })).unwrap()], actor());
        let err = AuditStampObserver.execute(&mut ctx).await.unwrap_err();
        assert_eq!(err, ObserverError::MissingOrganization);
    }

    #[tokio::test]
    async fn actor_organization_used_outside_request() {
        let mut ctx = write_ctx(
            Operation::Create,
            vec![Record::from_json(json!({ "name": "A" })).unwrap()],
            ActorContext::system(Some("org-job".to_string())),
        );
        AuditStampObserver.execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.records[0].get_str("organization_id"), Some("org-job"));
        assert_eq!(ctx.records[0].get("created_by"), None);
        assert_eq!(ctx.records[0].get("created_ip"), None);
        assert_eq!(ctx.records[0].get_str("created_user_agent"), Some("system"));
    }

    #[tokio::test]
    async fn conflicting_organizations_are_rejected() {
        let mut ctx = write_ctx(
            Operation::Create,
            vec![Record::from_json(json!({ "name": "A" })).unwrap()],
            actor().with_organization("org-b"),
        );
        let err = run_with_context("org-a", AuditStampObserver.execute(&mut ctx)).await.unwrap_err();
        assert!(matches!(err, ObserverError::OrganizationMismatch { .. }));
    }

    #[tokio::test]
    async fn update_restamps_only_updated_fields() {
        let mut loaded = BTreeMap::new();
        loaded.insert("id".to_string(), json!("p1"));
        loaded.insert("organization_id".to_string(), json!("org-a"));
        loaded.insert("name".to_string(), json!("Old"));
        loaded.insert("created_by".to_string(), json!("creator"));
        loaded.insert("created_at".to_string(), json!("2024-01-01T00:00:00+00:00"));
        loaded.insert("updated_at".to_string(), json!("2024-01-01T00:00:00+00:00"));
        let mut record = Record::from_sql_data(loaded);
        record.set("name", "New");

        let mut ctx = write_ctx(Operation::Update, vec![record], actor());
        run_with_context("org-a", AuditStampObserver.execute(&mut ctx)).await.unwrap();

        let record = &ctx.records[0];
        assert_eq!(record.get_str("created_by"), Some("creator"));
        assert_eq!(record.get_str("created_at"), Some("2024-01-01T00:00:00+00:00"));
        assert_eq!(record.get_str("updated_by"), Some("user-1"));
        assert_ne!(record.get_str("updated_at"), Some("2024-01-01T00:00:00+00:00"));
        let changed = record.changed_fields();
        assert!(changed.iter().all(|f| f == "name" || f.starts_with("updated_")), "{:?}", changed);
    }

    #[tokio::test]
    async fn update_keeps_fields_the_actor_lacks() {
        let mut loaded = BTreeMap::new();
        loaded.insert("id".to_string(), json!("p1"));
        loaded.insert("organization_id".to_string(), json!("org-a"));
        loaded.insert("name".to_string(), json!("Old"));
        loaded.insert("updated_by".to_string(), json!("user-1"));
        loaded.insert("updated_ip".to_string(), json!("10.1.2.3"));
        loaded.insert("updated_user_agent".to_string(), json!("test-agent"));
        loaded.insert("updated_at".to_string(), json!("2024-01-01T00:00:00+00:00"));
        let mut record = Record::from_sql_data(loaded);
        record.set("name", "New");

        let mut ctx = write_ctx(Operation::Update, vec![record], ActorContext::system(None));
        AuditStampObserver.execute(&mut ctx).await.unwrap();

        let record = &ctx.records[0];
        assert_eq!(record.get_str("updated_by"), Some("user-1"));
        assert_eq!(record.get_str("updated_ip"), Some("10.1.2.3"));
        assert_eq!(record.get_str("updated_user_agent"), Some("system"));
        let mut changed = record.changed_fields();
        changed.sort();
        assert_eq!(changed, vec!["name", "updated_at", "updated_user_agent"]);
    }

    #[tokio::test]
    async fn missing_actor_is_an_error() {
        let entity = EntityRegistry::standard("pms").get("projects").unwrap();
        let mut ctx = ObserverContext::new_write(Operation::Create, entity, vec![], actor());
        ctx.actor = None;
        assert!(matches!(AuditStampObserver.execute(&mut ctx).await, Err(ObserverError::SystemError(_))));
    }
}
