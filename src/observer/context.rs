use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::context::ActorContext;
use crate::database::entity::EntityDef;
use crate::database::record::Record;
use crate::database::repository::QueryOptions;
use crate::filter::FilterData;
use crate::observer::traits::{ObserverRing, Operation};

/// The data that flows through the observer pipeline before a statement
/// is built. Observers may rewrite the filter (reads) or the records (writes).
#[derive(Debug)]
pub struct ObserverContext {
    pub operation: Operation,
    pub entity: Arc<EntityDef>,

    // Write operations
    pub records: Vec<Record>,
    pub actor: Option<ActorContext>,

    // Select operations
    pub filter: FilterData,
    pub options: QueryOptions,

    pub start_time: Instant,
    pub current_ring: Option<ObserverRing>,
}

impl ObserverContext {
    pub fn new_select(entity: Arc<EntityDef>, filter: FilterData, options: QueryOptions) -> Self {
        Self {
            operation: Operation::Select,
            entity,
            records: Vec::new(),
            actor: None,
            filter,
            options,
            start_time: Instant::now(),
            current_ring: None,
        }
    }

    /// Context for create/update/delete of already-located records
    pub fn new_write(operation: Operation, entity: Arc<EntityDef>, records: Vec<Record>, actor: ActorContext) -> Self {
        Self {
            operation,
            entity,
            records,
            actor: Some(actor),
            filter: FilterData::default(),
            options: QueryOptions::default(),
            start_time: Instant::now(),
            current_ring: None,
        }
    }

    pub fn execution_time(&self) -> Duration {
        self.start_time.elapsed()
    }
}
