// In-memory automation store for tests and local development

use async_trait::async_trait;
use autoflow_shared::{AutomationLog, JobStatus, QueueCounts, QueueJob, RunCounts, RunStatus, StepResult};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{
    validate_columns, validate_identifier, LogStore, QueueStore, RecordStore, RunFilter, RunStore,
    StepTransition, StoreError, StoreResult, WorkflowStore,
};
use crate::workflows::{AutomationRun, WorkflowDefinition};

#[derive(Debug, Default)]
struct State {
    workflows: Vec<WorkflowDefinition>,
    runs: HashMap<Uuid, AutomationRun>,
    jobs: Vec<QueueJob>,
    logs: Vec<AutomationLog>,
    records: HashMap<String, Vec<Map<String, Value>>>,
}

/// Every operation takes one lock, so claims are atomic across workers sharing the store
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
    }

    /// Rows written to `table` by the record actions
    pub fn records(&self, table: &str) -> Vec<Map<String, Value>> {
        self.lock()
            .map(|state| state.records.get(table).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Every job currently in the queue
    pub fn all_jobs(&self) -> Vec<QueueJob> {
        self.lock().map(|state| state.jobs.clone()).unwrap_or_default()
    }
}

fn holds_claim(job: &QueueJob, id: Uuid, claimed_at: DateTime<Utc>) -> bool {
    job.id == id && job.status == JobStatus::Running && job.started_at == Some(claimed_at)
}

/// Remove the job if the claim still holds
fn take_claimed(jobs: &mut Vec<QueueJob>, id: Uuid, claimed_at: DateTime<Utc>) -> bool {
    match jobs.iter().position(|j| holds_claim(j, id, claimed_at)) {
        Some(index) => {
            jobs.remove(index);
            true
        }
        None => false,
    }
}

fn row_matches(row: &Map<String, Value>, filter: &Map<String, Value>) -> bool {
    filter.iter().all(|(column, expected)| row.get(column) == Some(expected))
}

fn paginate<T: Clone>(items: &[T], limit: i64, offset: i64) -> Vec<T> {
    items
        .iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .cloned()
        .collect()
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn list_workflows(&self, limit: i64, offset: i64) -> StoreResult<(Vec<WorkflowDefinition>, i64)> {
        let state = self.lock()?;
        let mut workflows = state.workflows.clone();
        workflows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok((paginate(&workflows, limit, offset), workflows.len() as i64))
    }

    async fn enabled_workflows_for_event(&self, event_type: &str) -> StoreResult<Vec<WorkflowDefinition>> {
        let state = self.lock()?;
        let mut matching: Vec<_> = state
            .workflows
            .iter()
            .filter(|w| w.enabled && w.trigger_event_type == event_type)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }

    async fn get_workflow(&self, id: Uuid) -> StoreResult<Option<WorkflowDefinition>> {
        Ok(self.lock()?.workflows.iter().find(|w| w.id == id).cloned())
    }

    async fn insert_workflow(&self, workflow: &WorkflowDefinition) -> StoreResult<()> {
        let mut state = self.lock()?;
        if state.workflows.iter().any(|w| w.id == workflow.id) {
            return Err(StoreError::InvalidRecord(format!("workflow {} already exists", workflow.id)));
        }
        state.workflows.push(workflow.clone());
        Ok(())
    }

    async fn update_workflow(&self, workflow: &WorkflowDefinition) -> StoreResult<bool> {
        let mut state = self.lock()?;
        match state.workflows.iter_mut().find(|w| w.id == workflow.id) {
            Some(existing) => {
                let created_at = existing.created_at;
                *existing = workflow.clone();
                existing.created_at = created_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_workflow(&self, id: Uuid) -> StoreResult<bool> {
        let mut state = self.lock()?;
        let before = state.workflows.len();
        state.workflows.retain(|w| w.id != id);
        Ok(state.workflows.len() != before)
    }

    async fn count_workflows(&self) -> StoreResult<(i64, i64)> {
        let state = self.lock()?;
        let enabled = state.workflows.iter().filter(|w| w.enabled).count();
        Ok((state.workflows.len() as i64, enabled as i64))
    }
}

#[async_trait]
impl RunStore for InMemoryStore {
    async fn create_run(&self, run: &AutomationRun, first_job: Option<&QueueJob>) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.runs.insert(run.id, run.clone());
        if let Some(job) = first_job {
            state.jobs.push(job.clone());
        }
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> StoreResult<Option<AutomationRun>> {
        Ok(self.lock()?.runs.get(&id).cloned())
    }

    async fn list_runs(&self, filter: &RunFilter, limit: i64, offset: i64) -> StoreResult<(Vec<AutomationRun>, i64)> {
        let state = self.lock()?;
        let mut runs: Vec<_> = state
            .runs
            .values()
            .filter(|r| filter.workflow_id.is_none_or(|id| r.workflow_id == id))
            .filter(|r| filter.status.is_none_or(|status| r.status == status))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok((paginate(&runs, limit, offset), runs.len() as i64))
    }

    async fn finish_run(
        &self,
        id: Uuid,
        status: RunStatus,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.lock()?;
        match state.runs.get_mut(&id) {
            Some(run) if run.status == RunStatus::Running => {
                run.status = status;
                if let Some(message) = error {
                    run.error = Some(message.to_string());
                }
                run.completed_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
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
        let mut guard = self.lock()?;
        let state = &mut *guard;
        if !take_claimed(&mut state.jobs, job_id, claimed_at) {
            return Ok(false);
        }

        let Some(run) = state.runs.get_mut(&run_id).filter(|r| r.status == RunStatus::Running) else {
            return Ok(true);
        };
        run.results.push(result.clone());

        match transition {
            StepTransition::Next(next) => state.jobs.push(next),
            StepTransition::Complete => {
                run.status = RunStatus::Completed;
                run.completed_at = Some(at);
            }
            StepTransition::Fail(message) => {
                run.status = RunStatus::Failed;
                run.error = Some(message);
                run.completed_at = Some(at);
            }
        }
        Ok(true)
    }

    async fn count_runs(&self) -> StoreResult<RunCounts> {
        let state = self.lock()?;
        let mut counts = RunCounts::default();
        for run in state.runs.values() {
            match run.status {
                RunStatus::Running => counts.running += 1,
                RunStatus::Completed => counts.completed += 1,
                RunStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl QueueStore for InMemoryStore {
    async fn enqueue(&self, job: &QueueJob) -> StoreResult<()> {
        self.lock()?.jobs.push(job.clone());
        Ok(())
    }

    async fn due_jobs(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<QueueJob>> {
        let state = self.lock()?;
        let mut due: Vec<_> = state
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Queued && j.next_attempt_at <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn claim_job(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut state = self.lock()?;
        match state.jobs.iter_mut().find(|j| j.id == id && j.status == JobStatus::Queued) {
            Some(job) => {
                job.status = JobStatus::Running;
                job.started_at = Some(now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn requeue_job(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        last_error: &str,
    ) -> StoreResult<bool> {
        let mut state = self.lock()?;
        let Some(job) = state.jobs.iter_mut().find(|j| holds_claim(j, id, claimed_at)) else {
            return Ok(false);
        };
        job.status = JobStatus::Queued;
        job.attempts = attempts;
        job.next_attempt_at = next_attempt_at;
        job.last_error = Some(last_error.to_string());
        job.started_at = None;
        Ok(true)
    }

    async fn delete_job(&self, id: Uuid, claimed_at: DateTime<Utc>) -> StoreResult<bool> {
        Ok(take_claimed(&mut self.lock()?.jobs, id, claimed_at))
    }

    async fn jobs_for_run(&self, run_id: Uuid) -> StoreResult<Vec<QueueJob>> {
        let state = self.lock()?;
        let mut jobs: Vec<_> = state.jobs.iter().filter(|j| j.run_id == run_id).cloned().collect();
        jobs.sort_by_key(|j| j.action_step_index);
        Ok(jobs)
    }

    async fn release_stale_jobs(&self, claimed_before: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.lock()?;
        let mut released = 0;
        for job in state.jobs.iter_mut() {
            let stale = job.status == JobStatus::Running && job.started_at.is_some_and(|t| t < claimed_before);
            if stale {
                job.status = JobStatus::Queued;
                job.started_at = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn count_jobs(&self) -> StoreResult<QueueCounts> {
        let state = self.lock()?;
        Ok(QueueCounts {
            queued: state.jobs.iter().filter(|j| j.status == JobStatus::Queued).count() as i64,
            running: state.jobs.iter().filter(|j| j.status == JobStatus::Running).count() as i64,
        })
    }
}

#[async_trait]
impl LogStore for InMemoryStore {
    async fn write_log(&self, entry: &AutomationLog) -> StoreResult<()> {
        self.lock()?.logs.push(entry.clone());
        Ok(())
    }

    async fn logs_for_run(&self, run_id: Uuid) -> StoreResult<Vec<AutomationLog>> {
        Ok(self
            .lock()?
            .logs
            .iter()
            .filter(|l| l.run_id == run_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn insert_record(&self, table: &str, record: &Map<String, Value>) -> StoreResult<()> {
        validate_identifier(table)?;
        validate_columns(record.keys())?;
        if record.is_empty() {
            return Err(StoreError::InvalidRecord("record has no columns".to_string()));
        }
        self.lock()?
            .records
            .entry(table.to_string())
            .or_default()
            .push(record.clone());
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

        let mut state = self.lock()?;
        let mut affected = 0;
        if let Some(rows) = state.records.get_mut(table) {
            for row in rows.iter_mut().filter(|row| row_matches(row, filter)) {
                for (column, value) in changes {
                    row.insert(column.clone(), value.clone());
                }
                affected += 1;
            }
        }
        Ok(affected)
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

        let key: Map<String, Value> = conflict
            .iter()
            .map(|c| (c.to_string(), record.get(*c).cloned().unwrap_or(Value::Null)))
            .collect();

        let mut state = self.lock()?;
        let rows = state.records.entry(table.to_string()).or_default();
        if rows.iter().any(|row| row_matches(row, &key)) {
            return Ok(false);
        }
        rows.push(record.clone());
        Ok(true)
    }
}
