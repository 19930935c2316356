// Scheduled maintenance jobs. They run outside any request, so they read
// across organizations with the organization filter bypassed and write with a
// system actor.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::AnyConnection;

use crate::audit::{run_audited, AuditAction, AuditRequest};
use crate::context::ActorContext;
use crate::database::connection::TenantConnection;
use crate::database::error::DataError;
use crate::database::record::Record;
use crate::database::repository::QueryOptions;
use crate::filter::FilterData;

pub const STOP_RUNNING_TASKS_REMARKS: &str = "stopped all left off running task!";

const STOP_RUNNING_TASKS_COLUMNS: [&str; 4] = ["total_work_time", "todays_worked_time", "last_start_time", "live_status"];

#[derive(Debug, Clone, Default, Serialize)]
pub struct StopRunningTasksReport {
    pub stopped: usize,
    pub tasks: Vec<Value>,
}

/// Stop every task still marked running, crediting the minutes since its
/// last start to its work counters. Writes one `bulk_update` audit row for
/// the whole batch; does nothing when no task is running.
///
/// Counters are computed from rows read inside the audited transaction, and
/// each update only matches a task that is still running.
pub async fn stop_running_tasks(conn: &TenantConnection, now: DateTime<Utc>) -> Result<StopRunningTasksReport, DataError> {
    let pending = {
        let mut db = conn.acquire().await?;
        select_running(conn, &mut db).await?
    };
    if !pending.iter().any(|task| stop_changes(task, now).is_some()) {
        tracing::info!("No running tasks left on tenant {}", conn.key());
        return Ok(StopRunningTasksReport::default());
    }

    let request = AuditRequest::new(ActorContext::system(None), AuditAction::BulkUpdate, "tasks")
        .updated_columns(STOP_RUNNING_TASKS_COLUMNS)
        .remarks(STOP_RUNNING_TASKS_REMARKS);

    let tasks = run_audited(conn, request, |tx| {
        Box::pin(async move {
            let running = tx
                .select_any_with("tasks", running_filter(), QueryOptions::ignore_organization_filter())
                .await?;
            let mut stopped = Vec::with_capacity(running.len());
            for (id, changes) in running.iter().filter_map(|task| stop_changes(task, now)) {
                let updated = tx
                    .update_any_with(
                        "tasks",
                        FilterData::with_where(json!({ "id": id, "live_status": "running" })),
                        changes,
                        QueryOptions::ignore_organization_filter(),
                    )
                    .await?;
                stopped.extend(updated.into_iter().map(Value::from));
            }
            Ok::<_, DataError>(stopped)
        })
    })
    .await?;

    tracing::info!("Stopped {} running task(s) on tenant {}", tasks.len(), conn.key());
    Ok(StopRunningTasksReport { stopped: tasks.len(), tasks })
}

fn running_filter() -> FilterData {
    FilterData::with_where(json!({ "live_status": "running" }))
}

async fn select_running(conn: &TenantConnection, db: &mut AnyConnection) -> Result<Vec<Record>, DataError> {
    conn.repository("tasks")?
        .select_any_with(db, running_filter(), QueryOptions::ignore_organization_filter())
        .await
}

/// Counter and status changes for one running task; tasks that never
/// recorded a start time are left alone.
fn stop_changes(task: &Record, now: DateTime<Utc>) -> Option<(String, Value)> {
    let id = task.id()?.to_string();
    let started = DateTime::parse_from_rfc3339(task.get_str("last_start_time")?).ok()?;
    let worked_minutes = (now - started.with_timezone(&Utc)).num_minutes().max(0);

    Some((
        id,
        json!({
            "total_work_time": task.get_i64("total_work_time").unwrap_or(0) + worked_minutes,
            "todays_worked_time": task.get_i64("todays_worked_time").unwrap_or(0) + worked_minutes,
            "last_start_time": null,
            "live_status": "stop",
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn task(fields: Value) -> Record {
        let data: BTreeMap<String, Value> = serde_json::from_value(fields).unwrap();
        Record::from_sql_data(data)
    }

    #[test]
    fn credits_whole_minutes_since_last_start() {
        let now = DateTime::parse_from_rfc3339("2024-03-01T10:30:59+00:00").unwrap().with_timezone(&Utc);
        let running = task(json!({
            "id": "t1",
            "live_status": "running",
            "last_start_time": "2024-03-01T10:00:00+00:00",
            "total_work_time": 100,
            "todays_worked_time": null,
        }));

        let (id, changes) = stop_changes(&running, now).unwrap();
        assert_eq!(id, "t1");
        assert_eq!(changes["total_work_time"], json!(130));
        assert_eq!(changes["todays_worked_time"], json!(30));
        assert_eq!(changes["last_start_time"], Value::Null);
        assert_eq!(changes["live_status"], json!("stop"));
    }

    #[test]
    fn skips_tasks_without_start_time() {
        let running = task(json!({ "id": "t1", "live_status": "running", "last_start_time": null }));
        assert!(stop_changes(&running, Utc::now()).is_none());
    }
}
