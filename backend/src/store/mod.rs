// Store Access Layer - Narrow async traits over the automation tables
//
// `PgAutomationStore` backs production, `InMemoryStore` backs tests and local runs.
// Both implement the same claim semantics: a job moves queued -> running at most once,
// and every later change to a claimed job is scoped by its id, `running` status and the
// claim timestamp, so a worker whose claim was released cannot touch the job again.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use autoflow_shared::{AutomationLog, QueueCounts, QueueJob, RunCounts, RunStatus, StepResult};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use thiserror::Error;
use uuid::Uuid;

use crate::workflows::{AutomationRun, WorkflowDefinition};

pub use memory::InMemoryStore;
pub use postgres::PgAutomationStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Invalid identifier '{0}'")]
    InvalidIdentifier(String),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// What happens to a Run after one of its steps is resolved
#[derive(Debug, Clone, PartialEq)]
pub enum StepTransition {
    /// Enqueue the following step
    Next(QueueJob),
    /// Last step succeeded
    Complete,
    /// Step exhausted its attempts
    Fail(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunFilter {
    pub workflow_id: Option<Uuid>,
    pub status: Option<RunStatus>,
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn list_workflows(&self, limit: i64, offset: i64) -> StoreResult<(Vec<WorkflowDefinition>, i64)>;
    /// Enabled workflows whose trigger matches `event_type`, oldest first
    async fn enabled_workflows_for_event(&self, event_type: &str) -> StoreResult<Vec<WorkflowDefinition>>;
    async fn get_workflow(&self, id: Uuid) -> StoreResult<Option<WorkflowDefinition>>;
    async fn insert_workflow(&self, workflow: &WorkflowDefinition) -> StoreResult<()>;
    /// Returns false when no workflow with that id exists
    async fn update_workflow(&self, workflow: &WorkflowDefinition) -> StoreResult<bool>;
    async fn delete_workflow(&self, id: Uuid) -> StoreResult<bool>;
    /// (total, enabled)
    async fn count_workflows(&self) -> StoreResult<(i64, i64)>;
}

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert the run and, when given, its first job in one unit
    async fn create_run(&self, run: &AutomationRun, first_job: Option<&QueueJob>) -> StoreResult<()>;
    async fn get_run(&self, id: Uuid) -> StoreResult<Option<AutomationRun>>;
    async fn list_runs(&self, filter: &RunFilter, limit: i64, offset: i64) -> StoreResult<(Vec<AutomationRun>, i64)>;
    /// Move a running run to a terminal status. Returns false if it was not running.
    async fn finish_run(
        &self,
        id: Uuid,
        status: RunStatus,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;
    /// Delete the resolved job, append its result and apply `transition`, atomically.
    /// Returns false, changing nothing, if the claim made at `claimed_at` no longer holds.
    async fn resolve_step(
        &self,
        job_id: Uuid,
        claimed_at: DateTime<Utc>,
        run_id: Uuid,
        result: &StepResult,
        transition: StepTransition,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;
    async fn count_runs(&self) -> StoreResult<RunCounts>;
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn enqueue(&self, job: &QueueJob) -> StoreResult<()>;
    /// Queued jobs due at `now`, oldest first
    async fn due_jobs(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<QueueJob>>;
    /// Atomically move a job from queued to running. Returns false if another worker won.
    async fn claim_job(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<bool>;
    /// Return a claimed job to the queue. Returns false if the claim no longer holds.
    async fn requeue_job(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        last_error: &str,
    ) -> StoreResult<bool>;
    /// Delete a claimed job. Returns false if the claim no longer holds.
    async fn delete_job(&self, id: Uuid, claimed_at: DateTime<Utc>) -> StoreResult<bool>;
    async fn jobs_for_run(&self, run_id: Uuid) -> StoreResult<Vec<QueueJob>>;
    /// Return jobs claimed before `claimed_before` to the queue
    async fn release_stale_jobs(&self, claimed_before: DateTime<Utc>) -> StoreResult<u64>;
    async fn count_jobs(&self) -> StoreResult<QueueCounts>;
}

/// Log entries are append-only; nothing updates or deletes them
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn write_log(&self, entry: &AutomationLog) -> StoreResult<()>;
    async fn logs_for_run(&self, run_id: Uuid) -> StoreResult<Vec<AutomationLog>>;
}

/// Generic row access used by the database-writing actions
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_record(&self, table: &str, record: &Map<String, Value>) -> StoreResult<()>;
    /// Update every row matching all `filter` columns. Returns rows affected.
    async fn update_records(
        &self,
        table: &str,
        filter: &Map<String, Value>,
        changes: &Map<String, Value>,
    ) -> StoreResult<u64>;
    /// Insert unless a row with the same `conflict` columns exists. Returns true if inserted.
    async fn upsert_record(
        &self,
        table: &str,
        record: &Map<String, Value>,
        conflict: &[&str],
    ) -> StoreResult<bool>;
}

pub trait AutomationStore: WorkflowStore + RunStore + QueueStore + LogStore + RecordStore {}

impl<T> AutomationStore for T where T: WorkflowStore + RunStore + QueueStore + LogStore + RecordStore {}

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("identifier pattern is valid"));

/// Reject anything that is not a plain SQL identifier
pub fn validate_identifier(name: &str) -> StoreResult<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

pub(crate) fn validate_columns<'a>(columns: impl IntoIterator<Item = &'a String>) -> StoreResult<()> {
    for column in columns {
        validate_identifier(column)?;
    }
    Ok(())
}
