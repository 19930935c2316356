use std::collections::BTreeMap;
use std::time::Instant;

use tokio::time::timeout;

use crate::observer::context::ObserverContext;
use crate::observer::error::ObserverError;
use crate::observer::implementations::{AuditStampObserver, OrganizationScopeObserver};
use crate::observer::traits::{Observer, ObserverRing};

/// Runs registered observers ring by ring before each statement.
///
/// The first failing observer stops the pipeline and its error is returned;
/// no statement is built from a context an observer rejected.
pub struct ObserverPipeline {
    observers: BTreeMap<ObserverRing, Vec<Box<dyn Observer>>>,
}

impl ObserverPipeline {
    pub fn new() -> Self {
        Self { observers: BTreeMap::new() }
    }

    /// Organization scoping plus audit stamping
    pub fn standard() -> Self {
        let mut pipeline = Self::new();
        pipeline.register(Box::new(OrganizationScopeObserver));
        pipeline.register(Box::new(AuditStampObserver));
        pipeline
    }

    pub fn register(&mut self, observer: Box<dyn Observer>) {
        let ring = observer.ring();
        let name = observer.name();
        let observers = self.observers.entry(ring).or_default();
        observers.push(observer);
        observers.sort_by_key(|o| o.priority());

        tracing::debug!("Registered observer '{}' for ring {:?}", name, ring);
    }

    pub fn len(&self) -> usize {
        self.observers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn run(&self, ctx: &mut ObserverContext) -> Result<(), ObserverError> {
        for (ring, observers) in &self.observers {
            ctx.current_ring = Some(*ring);

            for observer in observers {
                if !observer.applies_to_operation(ctx.operation) || !observer.applies_to_entity(&ctx.entity) {
                    tracing::trace!(
                        "Observer {} skipped for {:?} on {}",
                        observer.name(),
                        ctx.operation,
                        ctx.entity.name
                    );
                    continue;
                }

                let observer_start = Instant::now();
                match timeout(observer.timeout(), observer.execute(ctx)).await {
                    Ok(Ok(())) => {
                        tracing::debug!("Observer: {} completed in {:?}", observer.name(), observer_start.elapsed());
                    }
                    Ok(Err(error)) => {
                        tracing::warn!("Observer: {} failed on {}: {}", observer.name(), ctx.entity.name, error);
                        return Err(error);
                    }
                    Err(_elapsed) => {
                        tracing::error!("Observer: {} timed out after {:?}", observer.name(), observer.timeout());
                        return Err(ObserverError::TimeoutError(format!(
                            "Observer {} timed out after {:?}",
                            observer.name(),
                            observer.timeout()
                        )));
                    }
                }
            }
        }

        ctx.current_ring = None;
        Ok(())
    }
}

impl Default for ObserverPipeline {
    fn default() -> Self {
        Self::new()
    }
}
