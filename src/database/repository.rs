use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Map, Value};
use sqlx::{AnyConnection, Row};

use crate::config::CONFIG;
use crate::context::ActorContext;
use crate::database::entity::EntityDef;
use crate::database::error::DataError;
use crate::database::query_builder::{BoundQuery, QueryBuilder};
use crate::database::record::Record;
use crate::filter::FilterData;
use crate::observer::{ObserverContext, ObserverPipeline, Operation};

/// Per-call switches for read paths
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Skip the organization condition. Rejected inside a request context.
    pub ignore_organization_filter: bool,
}

impl QueryOptions {
    pub fn ignore_organization_filter() -> Self {
        Self { ignore_organization_filter: true }
    }
}

/// Data access for one entity on a caller-provided connection.
///
/// Every call runs through the observer pipeline first: reads get the
/// organization condition, writes get their audit columns. Updates and
/// deletes locate their targets with the same scoped read, so they can never
/// touch rows outside the ambient organization.
#[derive(Clone)]
pub struct Repository {
    entity: Arc<EntityDef>,
    pipeline: Arc<ObserverPipeline>,
}

impl Repository {
    pub fn new(entity: Arc<EntityDef>, pipeline: Arc<ObserverPipeline>) -> Self {
        Self { entity, pipeline }
    }

    pub fn entity(&self) -> &EntityDef {
        &self.entity
    }

    pub async fn select_any(&self, conn: &mut AnyConnection, filter_data: FilterData) -> Result<Vec<Record>, DataError> {
        self.select_any_with(conn, filter_data, QueryOptions::default()).await
    }

    pub async fn select_any_with(
        &self,
        conn: &mut AnyConnection,
        filter_data: FilterData,
        options: QueryOptions,
    ) -> Result<Vec<Record>, DataError> {
        let filter_data = self.prepare_select(filter_data, options).await?;
        let builder = QueryBuilder::new(&self.entity);
        let bound = builder.select(filter_data)?;

        let start = Instant::now();
        let rows = bound.query().fetch_all(&mut *conn).await?;
        self.warn_if_slow(&bound, start);

        rows.iter().map(|row| builder.decode_row(row)).collect()
    }

    pub async fn select_one(&self, conn: &mut AnyConnection, mut filter_data: FilterData) -> Result<Option<Record>, DataError> {
        filter_data.limit = Some(1);
        Ok(self.select_any(conn, filter_data).await?.into_iter().next())
    }

    pub async fn select_404(&self, conn: &mut AnyConnection, filter_data: FilterData) -> Result<Record, DataError> {
        self.select_one(conn, filter_data)
            .await?
            .ok_or_else(|| DataError::NotFound(format!("{} record not found", self.entity.name)))
    }

    pub async fn select_ids(&self, conn: &mut AnyConnection, ids: &[String]) -> Result<Vec<Record>, DataError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        self.select_any(conn, FilterData::with_where(json!({ "id": { "$in": ids } }))).await
    }

    pub async fn count(&self, conn: &mut AnyConnection, filter_data: FilterData) -> Result<i64, DataError> {
        let filter_data = self.prepare_select(filter_data, QueryOptions::default()).await?;
        let bound = QueryBuilder::new(&self.entity).count(filter_data)?;

        let start = Instant::now();
        let row = bound.query().fetch_one(&mut *conn).await?;
        self.warn_if_slow(&bound, start);

        Ok(row.try_get::<i64, _>("count")?)
    }

    pub async fn create_one(&self, conn: &mut AnyConnection, actor: &ActorContext, data: Value) -> Result<Record, DataError> {
        let mut created = self.create_all(conn, actor, vec![data]).await?;
        created
            .pop()
            .ok_or_else(|| DataError::InvalidOperation(format!("create on {} returned no record", self.entity.name)))
    }

    /// Insert a batch; every record of the batch carries the same stamp.
    /// Append-only entities accept inserts.
    pub async fn create_all(&self, conn: &mut AnyConnection, actor: &ActorContext, data: Vec<Value>) -> Result<Vec<Record>, DataError> {
        let records = data.into_iter().map(Record::from_json).collect::<Result<Vec<_>, _>>()?;
        let mut ctx = ObserverContext::new_write(Operation::Create, self.entity.clone(), records, actor.clone());
        self.pipeline.run(&mut ctx).await?;

        let builder = QueryBuilder::new(&self.entity);
        let mut created = Vec::with_capacity(ctx.records.len());
        for record in ctx.records {
            self.execute(conn, &builder.insert(&record)?).await?;
            created.push(record.into_loaded());
        }

        tracing::debug!("Created {} {} record(s)", created.len(), self.entity.name);
        Ok(created)
    }

    pub async fn update_any(
        &self,
        conn: &mut AnyConnection,
        actor: &ActorContext,
        filter_data: FilterData,
        changes: &Map<String, Value>,
    ) -> Result<Vec<Record>, DataError> {
        self.update_any_with(conn, actor, filter_data, changes, QueryOptions::default()).await
    }

    /// Apply `changes` to every record matching `filter_data`; returns the updated records
    pub async fn update_any_with(
        &self,
        conn: &mut AnyConnection,
        actor: &ActorContext,
        filter_data: FilterData,
        changes: &Map<String, Value>,
        options: QueryOptions,
    ) -> Result<Vec<Record>, DataError> {
        if self.entity.append_only {
            return Err(DataError::AppendOnly(self.entity.name.clone()));
        }

        let mut records = self.select_any_with(conn, filter_data, options).await?;
        if records.is_empty() {
            return Ok(records);
        }
        for record in records.iter_mut() {
            record.apply_changes(changes)?;
        }

        let mut ctx = ObserverContext::new_write(Operation::Update, self.entity.clone(), records, actor.clone());
        self.pipeline.run(&mut ctx).await?;

        let builder = QueryBuilder::new(&self.entity);
        for record in &ctx.records {
            if let Some(bound) = builder.update(record)? {
                self.execute(conn, &bound).await?;
            }
        }

        tracing::debug!("Updated {} {} record(s)", ctx.records.len(), self.entity.name);
        Ok(ctx.records.into_iter().map(Record::into_loaded).collect())
    }

    pub async fn update_one(
        &self,
        conn: &mut AnyConnection,
        actor: &ActorContext,
        id: &str,
        changes: &Map<String, Value>,
    ) -> Result<Record, DataError> {
        self.update_any(conn, actor, FilterData::with_where(json!({ "id": id })), changes)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DataError::NotFound(format!("{} record {} not found", self.entity.name, id)))
    }

    pub async fn delete_any(&self, conn: &mut AnyConnection, actor: &ActorContext, filter_data: FilterData) -> Result<Vec<Record>, DataError> {
        self.delete_any_with(conn, actor, filter_data, QueryOptions::default()).await
    }

    /// Delete every record matching `filter_data`; returns them as they were
    pub async fn delete_any_with(
        &self,
        conn: &mut AnyConnection,
        actor: &ActorContext,
        filter_data: FilterData,
        options: QueryOptions,
    ) -> Result<Vec<Record>, DataError> {
        if self.entity.append_only {
            return Err(DataError::AppendOnly(self.entity.name.clone()));
        }

        let records = self.select_any_with(conn, filter_data, options).await?;
        if records.is_empty() {
            return Ok(records);
        }

        let mut ctx = ObserverContext::new_write(Operation::Delete, self.entity.clone(), records, actor.clone());
        self.pipeline.run(&mut ctx).await?;

        let ids = ctx.records.iter().filter_map(|r| r.id().map(str::to_string)).collect::<Vec<_>>();
        self.execute(conn, &QueryBuilder::new(&self.entity).delete_ids(&ids)?).await?;

        tracing::debug!("Deleted {} {} record(s)", ctx.records.len(), self.entity.name);
        Ok(ctx.records)
    }

    pub async fn delete_one(&self, conn: &mut AnyConnection, actor: &ActorContext, id: &str) -> Result<Record, DataError> {
        self.delete_any(conn, actor, FilterData::with_where(json!({ "id": id })))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DataError::NotFound(format!("{} record {} not found", self.entity.name, id)))
    }

    async fn prepare_select(&self, filter_data: FilterData, options: QueryOptions) -> Result<FilterData, DataError> {
        let mut ctx = ObserverContext::new_select(self.entity.clone(), filter_data, options);
        self.pipeline.run(&mut ctx).await?;
        Ok(ctx.filter)
    }

    async fn execute(&self, conn: &mut AnyConnection, bound: &BoundQuery) -> Result<u64, DataError> {
        let start = Instant::now();
        let result = bound.query().execute(&mut *conn).await?;
        self.warn_if_slow(bound, start);
        Ok(result.rows_affected())
    }

    fn warn_if_slow(&self, bound: &BoundQuery, start: Instant) {
        let database = &CONFIG.database;
        let elapsed = start.elapsed();
        if database.enable_slow_query_warning && elapsed.as_millis() as u64 > database.slow_query_threshold_ms {
            tracing::warn!("Slow query on {} ({:?}): {}", self.entity.name, elapsed, bound.sql);
        }
    }
}
