// Postgres-backed automation store

use async_trait::async_trait;
use autoflow_shared::{AutomationLog, JobStatus, QueueCounts, QueueJob, RunCounts, RunStatus, StepResult};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    validate_columns, validate_identifier, LogStore, QueueStore, RecordStore, RunFilter, RunStore,
    StepTransition, StoreError, StoreResult, WorkflowStore,
};
use crate::workflows::{AutomationRun, WorkflowDefinition};

#[derive(Debug, Clone)]
pub struct PgAutomationStore {
    pool: PgPool,
}

impl PgAutomationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_job(tx: &mut Transaction<'_, Postgres>, job: &QueueJob) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO automation_queue
                (id, workflow_run_id, action_step_index, status, attempts, next_attempt_at,
                 last_error, created_at, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(job.id)
        .bind(job.run_id)
        .bind(job.action_step_index)
        .bind(job.status)
        .bind(job.attempts)
        .bind(job.next_attempt_at)
        .bind(&job.last_error)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct WorkflowRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    trigger_event_type: String,
    conditions: Option<Value>,
    actions: Value,
    enabled: bool,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<WorkflowRow> for WorkflowDefinition {
    type Error = serde_json::Error;

    fn try_from(row: WorkflowRow) -> Result<Self, Self::Error> {
        let conditions = match row.conditions {
            Some(Value::Null) | None => None,
            Some(value) => Some(serde_json::from_value(value)?),
        };
        Ok(WorkflowDefinition {
            id: row.id,
            name: row.name,
            description: row.description,
            trigger_event_type: row.trigger_event_type,
            conditions,
            actions: serde_json::from_value(row.actions)?,
            enabled: row.enabled,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RunRow {
    id: Uuid,
    workflow_id: Uuid,
    workflow_name: String,
    trigger_event_type: String,
    trigger_data: Value,
    actions: Value,
    status: RunStatus,
    results: Value,
    error: Option<String>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<RunRow> for AutomationRun {
    type Error = serde_json::Error;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        Ok(AutomationRun {
            id: row.id,
            workflow_id: row.workflow_id,
            workflow_name: row.workflow_name,
            trigger_event_type: row.trigger_event_type,
            trigger_data: row.trigger_data,
            actions: serde_json::from_value(row.actions)?,
            status: row.status,
            results: serde_json::from_value(row.results)?,
            error: row.error,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

/// Rows that no longer deserialize are skipped rather than failing the whole listing
fn decode_workflows(rows: Vec<WorkflowRow>) -> Vec<WorkflowDefinition> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id;
            WorkflowDefinition::try_from(row)
                .map_err(|e| warn!("Skipping workflow {} with unreadable definition: {}", id, e))
                .ok()
        })
        .collect()
}

const WORKFLOW_COLUMNS: &str =
    "id, name, description, trigger_event_type, conditions, actions, enabled, created_at, updated_at";

const RUN_COLUMNS: &str = "id, workflow_id, workflow_name, trigger_event_type, trigger_data, actions, \
     status, results, error, started_at, completed_at";

const JOB_COLUMNS: &str = "id, workflow_run_id, action_step_index, status, attempts, next_attempt_at, \
     last_error, created_at, started_at, completed_at";

#[async_trait]
impl WorkflowStore for PgAutomationStore {
    async fn list_workflows(&self, limit: i64, offset: i64) -> StoreResult<(Vec<WorkflowDefinition>, i64)> {
        let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {} FROM workflows ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            WORKFLOW_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM workflows")
            .fetch_one(&self.pool)
            .await?;

        Ok((decode_workflows(rows), total))
    }

    async fn enabled_workflows_for_event(&self, event_type: &str) -> StoreResult<Vec<WorkflowDefinition>> {
        let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {} FROM workflows WHERE enabled = true AND trigger_event_type = $1 ORDER BY created_at ASC",
            WORKFLOW_COLUMNS
        ))
        .bind(event_type)
        .fetch_all(&self.pool)
        .await?;

        Ok(decode_workflows(rows))
    }

    async fn get_workflow(&self, id: Uuid) -> StoreResult<Option<WorkflowDefinition>> {
        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {} FROM workflows WHERE id = $1",
            WORKFLOW_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(WorkflowDefinition::try_from)
            .transpose()
            .map_err(StoreError::from)
    }

    async fn insert_workflow(&self, workflow: &WorkflowDefinition) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflows
                (id, name, description, trigger_event_type, conditions, actions, enabled, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(&workflow.trigger_event_type)
        .bind(workflow.conditions.as_ref().map(serde_json::to_value).transpose()?)
        .bind(serde_json::to_value(&workflow.actions)?)
        .bind(workflow.enabled)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_workflow(&self, workflow: &WorkflowDefinition) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE workflows
            SET name = $2, description = $3, trigger_event_type = $4, conditions = $5,
                actions = $6, enabled = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(&workflow.trigger_event_type)
        .bind(workflow.conditions.as_ref().map(serde_json::to_value).transpose()?)
        .bind(serde_json::to_value(&workflow.actions)?)
        .bind(workflow.enabled)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_workflow(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_workflows(&self) -> StoreResult<(i64, i64)> {
        let (total, enabled): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE enabled) FROM workflows",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok((total, enabled))
    }
}

#[async_trait]
impl RunStore for PgAutomationStore {
    async fn create_run(&self, run: &AutomationRun, first_job: Option<&QueueJob>) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO automation_runs
                (id, workflow_id, workflow_name, trigger_event_type, trigger_data, actions,
                 status, results, error, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(run.id)
        .bind(run.workflow_id)
        .bind(&run.workflow_name)
        .bind(&run.trigger_event_type)
        .bind(&run.trigger_data)
        .bind(serde_json::to_value(&run.actions)?)
        .bind(run.status)
        .bind(serde_json::to_value(&run.results)?)
        .bind(&run.error)
        .bind(run.started_at)
        .bind(run.completed_at)
        .execute(&mut *tx)
        .await?;

        if let Some(job) = first_job {
            Self::insert_job(&mut tx, job).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> StoreResult<Option<AutomationRun>> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {} FROM automation_runs WHERE id = $1",
            RUN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AutomationRun::try_from)
            .transpose()
            .map_err(StoreError::from)
    }

    async fn list_runs(&self, filter: &RunFilter, limit: i64, offset: i64) -> StoreResult<(Vec<AutomationRun>, i64)> {
        let rows = sqlx::query_as::<_, RunRow>(&format!(
            r#"
            SELECT {} FROM automation_runs
            WHERE ($1::uuid IS NULL OR workflow_id = $1)
              AND ($2::run_status IS NULL OR status = $2)
            ORDER BY started_at DESC
            LIMIT $3 OFFSET $4
            "#,
            RUN_COLUMNS
        ))
        .bind(filter.workflow_id)
        .bind(filter.status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM automation_runs
            WHERE ($1::uuid IS NULL OR workflow_id = $1)
              AND ($2::run_status IS NULL OR status = $2)
            "#,
        )
        .bind(filter.workflow_id)
        .bind(filter.status)
        .fetch_one(&self.pool)
        .await?;

        let runs = rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id;
                AutomationRun::try_from(row)
                    .map_err(|e| warn!("Skipping unreadable run {}: {}", id, e))
                    .ok()
            })
            .collect();

        Ok((runs, total))
    }

    async fn finish_run(
        &self,
        id: Uuid,
        status: RunStatus,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE automation_runs
            SET status = $2, error = COALESCE($3, error), completed_at = $4
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(error)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn resolve_step(
        &self,
        job_id: Uuid,
        claimed_at: DateTime<Utc>,
        run_id: Uuid,
        result: &StepResult,
        transition: StepTransition,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query(
            "DELETE FROM automation_queue WHERE id = $1 AND status = 'running' AND started_at = $2",
        )
        .bind(job_id)
        .bind(claimed_at)
        .execute(&mut *tx)
        .await?;
        if deleted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let (status, error) = match &transition {
            StepTransition::Next(_) => (RunStatus::Running, None),
            StepTransition::Complete => (RunStatus::Completed, None),
            StepTransition::Fail(message) => (RunStatus::Failed, Some(message.as_str())),
        };

        let updated = sqlx::query(
            r#"
            UPDATE automation_runs
            SET results = results || jsonb_build_array($2::jsonb),
                status = $3,
                error = COALESCE($4, error),
                completed_at = CASE WHEN $3 = 'running'::run_status THEN NULL ELSE $5 END
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(run_id)
        .bind(serde_json::to_value(result)?)
        .bind(status)
        .bind(error)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            // Run vanished or was already finalized; the job is still removed
            debug!("Run {} not running while resolving job {}", run_id, job_id);
        } else if let StepTransition::Next(next) = &transition {
            Self::insert_job(&mut tx, next).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn count_runs(&self) -> StoreResult<RunCounts> {
        let (running, completed, failed): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'running'),
                COUNT(*) FILTER (WHERE status = 'completed'),
                COUNT(*) FILTER (WHERE status = 'failed')
            FROM automation_runs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(RunCounts { running, completed, failed })
    }
}

#[async_trait]
impl QueueStore for PgAutomationStore {
    async fn enqueue(&self, job: &QueueJob) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        Self::insert_job(&mut tx, job).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn due_jobs(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<QueueJob>> {
        let jobs = sqlx::query_as::<_, QueueJob>(&format!(
            r#"
            SELECT {} FROM automation_queue
            WHERE status = 'queued' AND next_attempt_at <= $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
            JOB_COLUMNS
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    async fn claim_job(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE automation_queue SET status = 'running', started_at = $2 WHERE id = $1 AND status = 'queued'",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn requeue_job(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        last_error: &str,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE automation_queue
            SET status = 'queued', attempts = $3, next_attempt_at = $4, last_error = $5, started_at = NULL
            WHERE id = $1 AND status = 'running' AND started_at = $2
            "#,
        )
        .bind(id)
        .bind(claimed_at)
        .bind(attempts)
        .bind(next_attempt_at)
        .bind(last_error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_job(&self, id: Uuid, claimed_at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            "DELETE FROM automation_queue WHERE id = $1 AND status = 'running' AND started_at = $2",
        )
        .bind(id)
        .bind(claimed_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn jobs_for_run(&self, run_id: Uuid) -> StoreResult<Vec<QueueJob>> {
        let jobs = sqlx::query_as::<_, QueueJob>(&format!(
            "SELECT {} FROM automation_queue WHERE workflow_run_id = $1 ORDER BY action_step_index",
            JOB_COLUMNS
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    async fn release_stale_jobs(&self, claimed_before: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE automation_queue
            SET status = $1, started_at = NULL
            WHERE status = 'running' AND started_at < $2
            "#,
        )
        .bind(JobStatus::Queued)
        .bind(claimed_before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn count_jobs(&self) -> StoreResult<QueueCounts> {
        let (queued, running): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'queued'),
                COUNT(*) FILTER (WHERE status = 'running')
            FROM automation_queue
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(QueueCounts { queued, running })
    }
}

#[async_trait]
impl LogStore for PgAutomationStore {
    async fn write_log(&self, entry: &AutomationLog) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO automation_logs
                (id, workflow_id, run_id, step_index, attempt, action_type, action_data,
                 result_status, result_data, error_message, execution_time_ms, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(entry.id)
        .bind(entry.workflow_id)
        .bind(entry.run_id)
        .bind(entry.step_index)
        .bind(entry.attempt)
        .bind(&entry.action_type)
        .bind(&entry.action_data)
        .bind(entry.result_status)
        .bind(&entry.result_data)
        .bind(&entry.error_message)
        .bind(entry.execution_time_ms)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn logs_for_run(&self, run_id: Uuid) -> StoreResult<Vec<AutomationLog>> {
        let logs = sqlx::query_as::<_, AutomationLog>(
            r#"
            SELECT id, workflow_id, run_id, step_index, attempt, action_type, action_data,
                   result_status, result_data, error_message, execution_time_ms, created_at
            FROM automation_logs
            WHERE run_id = $1
            ORDER BY created_at ASC, step_index ASC, attempt ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }
}

fn quoted_columns<'a>(columns: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    columns.into_iter().map(|c| format!("\"{}\"", c)).collect()
}

// Column values travel as one jsonb parameter typed by the target table's row type.
// Only validated identifiers are formatted into the statement.
#[async_trait]
impl RecordStore for PgAutomationStore {
    async fn insert_record(&self, table: &str, record: &Map<String, Value>) -> StoreResult<()> {
        validate_identifier(table)?;
        validate_columns(record.keys())?;
        if record.is_empty() {
            return Err(StoreError::InvalidRecord("record has no columns".to_string()));
        }

        let columns = quoted_columns(record.keys().map(String::as_str)).join(", ");
        let sql = format!(
            "INSERT INTO \"{table}\" ({columns}) SELECT {columns} FROM jsonb_populate_record(NULL::\"{table}\", $1)"
        );
        sqlx::query(&sql)
            .bind(Value::Object(record.clone()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_records(
        &self,
        table: &str,
        filter: &Map<String, Value>,
        changes: &Map<String, Value>,
    ) -> StoreResult<u64> {
        validate_identifier(table)?;
        validate_columns(filter.keys())?;
        validate_columns(changes.keys())?;
        if filter.is_empty() {
            return Err(StoreError::InvalidRecord("update requires a filter".to_string()));
        }
        if changes.is_empty() {
            return Err(StoreError::InvalidRecord("update has no changes".to_string()));
        }

        let set_columns = quoted_columns(changes.keys().map(String::as_str)).join(", ");
        let predicate = quoted_columns(filter.keys().map(String::as_str))
            .iter()
            .map(|c| format!("target.{c} = f.{c}"))
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = format!(
            "UPDATE \"{table}\" AS target \
             SET ({set_columns}) = (SELECT {set_columns} FROM jsonb_populate_record(NULL::\"{table}\", $1)) \
             FROM jsonb_populate_record(NULL::\"{table}\", $2) AS f \
             WHERE {predicate}"
        );
        let result = sqlx::query(&sql)
            .bind(Value::Object(changes.clone()))
            .bind(Value::Object(filter.clone()))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn upsert_record(
        &self,
        table: &str,
        record: &Map<String, Value>,
        conflict: &[&str],
    ) -> StoreResult<bool> {
        validate_identifier(table)?;
        validate_columns(record.keys())?;
        for column in conflict {
            validate_identifier(column)?;
        }
        if record.is_empty() || conflict.is_empty() {
            return Err(StoreError::InvalidRecord("upsert needs columns and a conflict target".to_string()));
        }

        let columns = quoted_columns(record.keys().map(String::as_str)).join(", ");
        let target = quoted_columns(conflict.iter().copied()).join(", ");
        let sql = format!(
            "INSERT INTO \"{table}\" ({columns}) SELECT {columns} FROM jsonb_populate_record(NULL::\"{table}\", $1) \
             ON CONFLICT ({target}) DO NOTHING"
        );
        let result = sqlx::query(&sql)
            .bind(Value::Object(record.clone()))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
