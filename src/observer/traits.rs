use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::database::entity::EntityDef;
use crate::observer::context::ObserverContext;
use crate::observer::error::ObserverError;

/// Observer rings, executed in ascending order before the statement runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ObserverRing {
    Security = 2,   // Organization scoping, bypass guard
    Enrichment = 4, // Audit field stamping
}

/// Data-access operations that pass through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Select,
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn is_write(&self) -> bool {
        !matches!(self, Operation::Select)
    }
}

/// A hook run by the [`ObserverPipeline`](crate::observer::ObserverPipeline)
#[async_trait]
pub trait Observer: Send + Sync {
    /// Observer name for logging and debugging
    fn name(&self) -> &'static str;

    fn ring(&self) -> ObserverRing;

    fn applies_to_operation(&self, op: Operation) -> bool;

    fn applies_to_entity(&self, _entity: &EntityDef) -> bool {
        true
    }

    /// Execution timeout (default 5 seconds)
    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    /// Priority within ring (lower numbers execute first)
    fn priority(&self) -> u8 {
        50
    }

    async fn execute(&self, ctx: &mut ObserverContext) -> Result<(), ObserverError>;
}
