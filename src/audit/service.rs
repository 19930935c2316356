use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::any::Any;
use sqlx::{AnyConnection, Transaction};
use tracing::{error, info, warn};

use crate::audit::model::{AuditAction, AuditLogEntry, AUDIT_ENTITY};
use crate::context::ActorContext;
use crate::database::connection::TenantConnection;
use crate::database::entity::{EntityDef, EntityRegistry};
use crate::database::error::DataError;
use crate::database::record::Record;
use crate::database::repository::{QueryOptions, Repository};
use crate::filter::FilterData;
use crate::observer::ObserverPipeline;

/// Boxed unit of work for [`run_audited_sequence`]
pub type UnitOfWork = Box<dyn for<'t> FnOnce(&'t mut AuditTransaction) -> BoxFuture<'t, Result<Value, DataError>> + Send>;

/// Box a closure as a [`UnitOfWork`]; pins the closure to the higher-ranked
/// signature so `|tx| Box::pin(async move { .. })` type-checks.
pub fn unit_of_work<F>(f: F) -> UnitOfWork
where
    F: for<'t> FnOnce(&'t mut AuditTransaction) -> BoxFuture<'t, Result<Value, DataError>> + Send + 'static,
{
    Box::new(f)
}

/// The live transaction handed to audited operations.
///
/// Repository calls made through it share one transaction, run through the
/// tenant's observer pipeline and are stamped with the wrapper's actor.
pub struct AuditTransaction {
    tx: Transaction<'static, Any>,
    actor: ActorContext,
    entities: Arc<EntityRegistry>,
    pipeline: Arc<ObserverPipeline>,
    results: Vec<Value>,
}

impl AuditTransaction {
    fn new(tx: Transaction<'static, Any>, actor: ActorContext, conn: &TenantConnection) -> Self {
        Self {
            tx,
            actor,
            entities: conn.entities().clone(),
            pipeline: conn.pipeline().clone(),
            results: Vec::new(),
        }
    }

    /// Raw connection inside the transaction
    pub fn conn(&mut self) -> &mut AnyConnection {
        &mut *self.tx
    }

    pub fn actor(&self) -> &ActorContext {
        &self.actor
    }

    pub fn repository(&self, entity: &str) -> Result<Repository, DataError> {
        Ok(Repository::new(self.entities.get(entity)?, self.pipeline.clone()))
    }

    /// Results of the operations already completed in this sequence
    pub fn results(&self) -> &[Value] {
        &self.results
    }

    pub fn result(&self, index: usize) -> Option<&Value> {
        self.results.get(index)
    }

    pub fn result_id(&self, index: usize) -> Option<&str> {
        self.result(index).and_then(|v| v.get("id")).and_then(Value::as_str)
    }

    pub async fn select_any(&mut self, entity: &str, filter_data: FilterData) -> Result<Vec<Record>, DataError> {
        self.select_any_with(entity, filter_data, QueryOptions::default()).await
    }

    pub async fn select_any_with(
        &mut self,
        entity: &str,
        filter_data: FilterData,
        options: QueryOptions,
    ) -> Result<Vec<Record>, DataError> {
        let repository = self.repository(entity)?;
        repository.select_any_with(&mut self.tx, filter_data, options).await
    }

    pub async fn create_one(&mut self, entity: &str, data: Value) -> Result<Record, DataError> {
        let repository = self.repository(entity)?;
        repository.create_one(&mut self.tx, &self.actor, data).await
    }

    pub async fn create_all(&mut self, entity: &str, data: Vec<Value>) -> Result<Vec<Record>, DataError> {
        let repository = self.repository(entity)?;
        repository.create_all(&mut self.tx, &self.actor, data).await
    }

    pub async fn update_one(&mut self, entity: &str, id: &str, changes: Value) -> Result<Record, DataError> {
        let changes = as_changes(changes)?;
        let repository = self.repository(entity)?;
        repository.update_one(&mut self.tx, &self.actor, id, &changes).await
    }

    pub async fn update_any_with(
        &mut self,
        entity: &str,
        filter_data: FilterData,
        changes: Value,
        options: QueryOptions,
    ) -> Result<Vec<Record>, DataError> {
        let changes = as_changes(changes)?;
        let repository = self.repository(entity)?;
        repository
            .update_any_with(&mut self.tx, &self.actor, filter_data, &changes, options)
            .await
    }

    pub async fn delete_one(&mut self, entity: &str, id: &str) -> Result<Record, DataError> {
        let repository = self.repository(entity)?;
        repository.delete_one(&mut self.tx, &self.actor, id).await
    }

    pub async fn delete_any(&mut self, entity: &str, filter_data: FilterData) -> Result<Vec<Record>, DataError> {
        let repository = self.repository(entity)?;
        repository.delete_any(&mut self.tx, &self.actor, filter_data).await
    }

    async fn write_audit(&mut self, audit: &EntityDef, entry: &AuditLogEntry) -> Result<(), DataError> {
        entry.insert(&mut self.tx, audit).await
    }

    async fn rollback(self, reason: &DataError) {
        warn!("Rolling back audited transaction: {}", reason);
        if let Err(e) = self.tx.rollback().await {
            error!("Rollback failed: {}", e);
        }
    }

    async fn commit(self) -> Result<(), DataError> {
        Ok(self.tx.commit().await?)
    }
}

fn as_changes(changes: Value) -> Result<Map<String, Value>, DataError> {
    match changes {
        Value::Object(map) => Ok(map),
        _ => Err(DataError::InvalidOperation("changes must be a JSON object".to_string())),
    }
}

/// What the audit row of a [`run_audited`] call records
#[derive(Debug, Clone)]
pub struct AuditRequest {
    pub actor: ActorContext,
    pub action: AuditAction,
    /// Entity the audit row is labelled with
    pub model: String,
    pub updated_columns: Option<Vec<String>>,
    pub remarks: Option<String>,
    /// Stored instead of the operation's result (e.g. a pre-state)
    pub snapshot: Option<Value>,
}

impl AuditRequest {
    pub fn new(actor: ActorContext, action: AuditAction, model: impl Into<String>) -> Self {
        Self {
            actor,
            action,
            model: model.into(),
            updated_columns: None,
            remarks: None,
            snapshot: None,
        }
    }

    pub fn updated_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.updated_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn remarks(mut self, remarks: impl Into<String>) -> Self {
        self.remarks = Some(remarks.into());
        self
    }

    pub fn snapshot(mut self, snapshot: Value) -> Self {
        self.snapshot = Some(snapshot);
        self
    }
}

/// One step of [`run_audited_sequence`]
pub struct OperationDescriptor {
    pub action: AuditAction,
    pub model: String,
    pub updated_columns: Option<Vec<String>>,
    pub remarks: Option<String>,
    pub snapshot: Option<Value>,
    pub run: UnitOfWork,
}

impl OperationDescriptor {
    pub fn new<F>(action: AuditAction, model: impl Into<String>, run: F) -> Self
    where
        F: for<'t> FnOnce(&'t mut AuditTransaction) -> BoxFuture<'t, Result<Value, DataError>> + Send + 'static,
    {
        Self {
            action,
            model: model.into(),
            updated_columns: None,
            remarks: None,
            snapshot: None,
            run: unit_of_work(run),
        }
    }

    pub fn updated_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.updated_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn remarks(mut self, remarks: impl Into<String>) -> Self {
        self.remarks = Some(remarks.into());
        self
    }

    pub fn snapshot(mut self, snapshot: Value) -> Self {
        self.snapshot = Some(snapshot);
        self
    }
}

/// Run `operation` in a transaction and record exactly one audit row for it
/// in the same transaction.
///
/// Any failure rolls back both the mutation and the audit row. Constraint
/// violations come back as [`DataError::Constraint`]; everything else is
/// wrapped in [`DataError::TransactionAborted`].
pub async fn run_audited<T, F>(conn: &TenantConnection, request: AuditRequest, operation: F) -> Result<T, DataError>
where
    T: Serialize + Send,
    F: for<'t> FnOnce(&'t mut AuditTransaction) -> BoxFuture<'t, Result<T, DataError>> + Send,
{
    let AuditRequest {
        actor,
        action,
        model,
        updated_columns,
        remarks,
        snapshot,
    } = request;

    let audit = conn.entity(AUDIT_ENTITY)?;
    let model = conn.entity(&model)?;
    let organization_id = actor.effective_organization()?;

    let mut tx = AuditTransaction::new(conn.begin().await?, actor, conn);

    let outcome: Result<T, DataError> = async {
        let result = operation(&mut tx).await?;
        let snapshot = match snapshot {
            Some(snapshot) => snapshot,
            None => serde_json::to_value(&result)?,
        };
        let entry = AuditLogEntry::build(&tx.actor, organization_id, action, &model.table, snapshot, updated_columns, remarks);
        tx.write_audit(&audit, &entry).await?;
        Ok(result)
    }
    .await;

    match outcome {
        Ok(result) => {
            tx.commit().await.map_err(DataError::aborted)?;
            info!("Committed audited {} on {} for tenant {}", action, model.name, conn.key());
            Ok(result)
        }
        Err(e) => {
            tx.rollback(&e).await;
            Err(DataError::aborted(e))
        }
    }
}

/// Run several operations in one transaction, in order, with one audit row
/// per operation written right after it. All or nothing: results are
/// returned in input order only when every operation and audit write and the
/// commit succeed.
pub async fn run_audited_sequence(
    conn: &TenantConnection,
    actor: ActorContext,
    operations: Vec<OperationDescriptor>,
) -> Result<Vec<Value>, DataError> {
    if operations.is_empty() {
        return Err(DataError::InvalidOperation("audited sequence without operations".to_string()));
    }

    let audit = conn.entity(AUDIT_ENTITY)?;
    let models = operations
        .iter()
        .map(|op| conn.entity(&op.model))
        .collect::<Result<Vec<_>, _>>()?;
    let organization_id = actor.effective_organization()?;
    let count = operations.len();

    let mut tx = AuditTransaction::new(conn.begin().await?, actor, conn);

    let mut outcome = Ok(());
    for (index, (op, model)) in operations.into_iter().zip(models).enumerate() {
        let OperationDescriptor {
            action,
            updated_columns,
            remarks,
            snapshot,
            run,
            ..
        } = op;

        let step = async {
            let result = run(&mut tx).await?;
            let snapshot = snapshot.unwrap_or_else(|| result.clone());
            let entry = AuditLogEntry::build(
                &tx.actor,
                organization_id.clone(),
                action,
                &model.table,
                snapshot,
                updated_columns,
                remarks,
            );
            tx.write_audit(&audit, &entry).await?;
            tx.results.push(result);
            Ok::<_, DataError>(())
        }
        .await;

        if let Err(e) = step {
            warn!("Audited sequence failed at operation {} of {} ({} on {})", index + 1, count, action, model.name);
            outcome = Err(e);
            break;
        }
    }

    match outcome {
        Ok(()) => {
            let results = std::mem::take(&mut tx.results);
            tx.commit().await.map_err(DataError::aborted)?;
            info!("Committed audited sequence of {} operations for tenant {}", count, conn.key());
            Ok(results)
        }
        Err(e) => {
            tx.rollback(&e).await;
            Err(DataError::aborted(e))
        }
    }
}
