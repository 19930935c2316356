use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::request;

/// The authenticated user behind a write, when there is one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorUser {
    pub id: String,
    pub name: Option<String>,
}

/// Who performs a write and from where.
///
/// Passed explicitly into every create/update/delete and into the audit
/// wrappers. Background jobs build one by hand with no user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub user: Option<ActorUser>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub organization_id: Option<String>,
}

impl ActorContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Actor for scheduled jobs: no user, no request origin
    pub fn system(organization_id: Option<String>) -> Self {
        Self {
            user: None,
            ip: None,
            user_agent: Some("system".to_string()),
            organization_id,
        }
    }

    pub fn with_user(mut self, id: impl Into<String>, name: Option<String>) -> Self {
        self.user = Some(ActorUser { id: id.into(), name });
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }

    /// Organization a write made by this actor belongs to: the actor's own,
    /// else the ambient request organization. Both present and different is
    /// a conflict.
    pub fn effective_organization(&self) -> Result<Option<String>, OrganizationConflict> {
        match (&self.organization_id, request::current_organization_id()) {
            (Some(actor), Some(ambient)) if *actor != ambient => Err(OrganizationConflict {
                actor: actor.clone(),
                request: ambient,
            }),
            (Some(actor), _) => Ok(Some(actor.clone())),
            (None, ambient) => Ok(ambient),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("actor organization '{actor}' does not match request organization '{request}'")]
pub struct OrganizationConflict {
    pub actor: String,
    pub request: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::run_with_context;

    #[tokio::test]
    async fn effective_organization_prefers_actor_then_ambient() {
        let actor = ActorContext::new().with_organization("org-a");
        assert_eq!(actor.effective_organization().unwrap().as_deref(), Some("org-a"));
        assert_eq!(ActorContext::new().effective_organization().unwrap(), None);

        run_with_context("org-a", async {
            assert_eq!(ActorContext::new().effective_organization().unwrap().as_deref(), Some("org-a"));
            assert_eq!(actor.effective_organization().unwrap().as_deref(), Some("org-a"));
            let other = ActorContext::new().with_organization("org-b");
            assert_eq!(
                other.effective_organization(),
                Err(OrganizationConflict { actor: "org-b".into(), request: "org-a".into() })
            );
        })
        .await;
    }

    #[test]
    fn system_actor_has_no_user() {
        let actor = ActorContext::system(None).with_ip("10.0.0.1");
        assert_eq!(actor.user_id(), None);
        assert_eq!(actor.ip.as_deref(), Some("10.0.0.1"));
    }
}
