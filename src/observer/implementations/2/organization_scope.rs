// Ring 2: Organization Scope - restricts every read to the ambient organization
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context;
use crate::database::entity::EntityDef;
use crate::observer::context::ObserverContext;
use crate::observer::error::ObserverError;
use crate::observer::traits::{Observer, ObserverRing, Operation};

/// Adds `organization_id = <ambient org>` to the filter of every read on an
/// organization-scoped entity.
///
/// Fails closed: with no ambient organization the read is rejected rather
/// than run unscoped. The caller's own conditions are kept and combined with
/// the organization condition using AND, so a caller-supplied
/// `organization_id` can only narrow the result.
///
/// `ignore_organization_filter` skips the condition, but only outside a
/// request context (background jobs, migrations, the CLI).
#[derive(Debug, Default)]
pub struct OrganizationScopeObserver;

#[async_trait]
impl Observer for OrganizationScopeObserver {
    fn name(&self) -> &'static str {
        "OrganizationScopeObserver"
    }

    fn ring(&self) -> ObserverRing {
        ObserverRing::Security
    }

    fn priority(&self) -> u8 {
        10
    }

    fn applies_to_operation(&self, op: Operation) -> bool {
        matches!(op, Operation::Select)
    }

    fn applies_to_entity(&self, entity: &EntityDef) -> bool {
        entity.organization_scoped
    }

    async fn execute(&self, ctx: &mut ObserverContext) -> Result<(), ObserverError> {
        if ctx.options.ignore_organization_filter {
            if context::is_active() {
                tracing::warn!("Organization filter bypass on {} denied inside request context", ctx.entity.name);
                return Err(ObserverError::BypassDenied);
            }
            tracing::debug!("Organization filter bypassed on {}", ctx.entity.name);
            return Ok(());
        }

        let organization_id = context::current_organization_id().ok_or(ObserverError::MissingOrganization)?;
        ctx.filter.where_clause = Some(scoped_where(ctx.filter.where_clause.take(), organization_id));
        Ok(())
    }
}

fn scoped_where(caller: Option<Value>, organization_id: String) -> Value {
    let organization = json!({ "organization_id": organization_id });
    match caller {
        None | Some(Value::Null) => organization,
        Some(Value::Object(map)) if map.is_empty() => organization,
        Some(caller) => json!({ "$and": [caller, organization] }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::run_with_context;
    use crate::database::entity::EntityRegistry;
    use crate::database::repository::QueryOptions;
    use crate::filter::FilterData;

    fn ctx(where_clause: Option<Value>, options: QueryOptions) -> ObserverContext {
        let entity = EntityRegistry::standard("pms").get("tasks").unwrap();
        let filter = FilterData { where_clause, ..Default::default() };
        ObserverContext::new_select(entity, filter, options)
    }

    #[tokio::test]
    async fn fails_closed_without_organization() {
        let mut ctx = ctx(None, QueryOptions::default());
        let err = OrganizationScopeObserver.execute(&mut ctx).await.unwrap_err();
        assert_eq!(err, ObserverError::MissingOrganization);
        assert_eq!(ctx.filter.where_clause, None);
    }

    #[tokio::test]
    async fn adds_organization_to_empty_filter() {
        let mut ctx = ctx(None, QueryOptions::default());
        run_with_context("org-a", OrganizationScopeObserver.execute(&mut ctx)).await.unwrap();
        assert_eq!(ctx.filter.where_clause, Some(json!({ "organization_id": "org-a" })));
    }

    #[tokio::test]
    async fn merges_with_caller_conditions_conjunctively() {
        let caller = json!({ "$or": [{ "status": "open" }, { "organization_id": "org-b" }] });
        let mut ctx = ctx(Some(caller.clone()), QueryOptions::default());
        run_with_context("org-a", OrganizationScopeObserver.execute(&mut ctx)).await.unwrap();
        assert_eq!(
            ctx.filter.where_clause,
            Some(json!({ "$and": [caller, { "organization_id": "org-a" }] }))
        );
    }

    #[tokio::test]
    async fn bypass_allowed_only_outside_request_context() {
        let mut outside = ctx(Some(json!({ "status": "running" })), QueryOptions::ignore_organization_filter());
        OrganizationScopeObserver.execute(&mut outside).await.unwrap();
        assert_eq!(outside.filter.where_clause, Some(json!({ "status": "running" })));

        let mut inside = ctx(None, QueryOptions::ignore_organization_filter());
        let err = run_with_context("org-a", OrganizationScopeObserver.execute(&mut inside)).await.unwrap_err();
        assert_eq!(err, ObserverError::BypassDenied);
    }

    #[test]
    fn skips_unscoped_entities() {
        let entity = EntityDef::bare("settings", "pms");
        assert!(!OrganizationScopeObserver.applies_to_entity(&entity));
        assert!(!OrganizationScopeObserver.applies_to_operation(Operation::Create));
    }
}
