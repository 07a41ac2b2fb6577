// Automation Worker - Polls the queue and executes one step per job

use autoflow_shared::{
    AutomationLog, JobStatus, QueueJob, ResultStatus, RunStatus, StepResult, WorkerStatsSnapshot,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::actions::ActionSpec;
use super::engine::AutomationRun;
use super::executor::{ActionError, ActionExecutor, ExecutionContext, StepOutcome};
use super::retry::RetryPolicy;
use crate::store::{AutomationStore, StepTransition, StoreError};

pub const WORKFLOW_MISSING: &str = "workflow missing";

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub batch_size: usize,
    /// Claimed jobs processed at once; each belongs to a different run
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub busy_pause: Duration,
    pub error_backoff: Duration,
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            concurrency: 4,
            poll_interval: Duration::from_millis(1000),
            busy_pause: Duration::from_millis(50),
            error_backoff: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

/// Counters owned by a worker and readable from elsewhere through `Worker::stats`
#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    orphaned: AtomicU64,
    lost_claims: AtomicU64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            orphaned: self.orphaned.load(Ordering::Relaxed),
            lost_claims: self.lost_claims.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct Worker {
    id: String,
    store: Arc<dyn AutomationStore>,
    executor: Arc<ActionExecutor>,
    config: WorkerConfig,
    stats: Arc<WorkerStats>,
}

impl Worker {
    pub fn new(store: Arc<dyn AutomationStore>, executor: Arc<ActionExecutor>, config: WorkerConfig) -> Self {
        let id = format!("worker-{}", &Uuid::new_v4().simple().to_string()[..8]);
        Self {
            id,
            store,
            executor,
            config,
            stats: Arc::new(WorkerStats::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    /// Poll until `shutdown` fires. The batch in flight when it fires is finished first.
    pub async fn run(&self, shutdown: CancellationToken) -> WorkerStatsSnapshot {
        info!(
            worker = %self.id,
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            "Automation worker started"
        );

        while !shutdown.is_cancelled() {
            let pause = match self.run_cycle(Utc::now()).await {
                Ok(0) => self.config.poll_interval,
                Ok(count) => {
                    debug!(worker = %self.id, "Processed {} job(s)", count);
                    self.config.busy_pause
                }
                Err(e) => {
                    error!(worker = %self.id, "Worker cycle failed: {}", e);
                    self.config.error_backoff
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        let summary = self.stats.snapshot();
        info!(
            worker = %self.id,
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            retried = summary.retried,
            "Automation worker stopped"
        );
        summary
    }

    /// Claim and process the jobs due at `now`. Returns how many jobs were claimed.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let due = self.store.due_jobs(now, self.config.batch_size as i64).await?;

        let mut claimed = Vec::with_capacity(due.len());
        let mut claim_error = None;
        for job in due {
            match self.store.claim_job(job.id, now).await {
                Ok(true) => claimed.push(QueueJob {
                    status: JobStatus::Running,
                    started_at: Some(now),
                    ..job
                }),
                Ok(false) => debug!(worker = %self.id, job_id = %job.id, "Job claimed by another worker"),
                Err(e) => {
                    claim_error = Some(e);
                    break;
                }
            }
        }

        let count = claimed.len();
        futures::stream::iter(claimed)
            .for_each_concurrent(self.config.concurrency.max(1), |job| async move {
                let job_id = job.id;
                if let Err(e) = self.process_job(job, now).await {
                    // Left running; stale-claim recovery returns it to the queue
                    error!(worker = %self.id, job_id = %job_id, "Failed to process job: {}", e);
                }
            })
            .await;

        match claim_error {
            Some(e) => Err(e),
            None => Ok(count),
        }
    }

    /// Every queue mutation below is scoped to the claim made at `now`
    async fn process_job(&self, job: QueueJob, now: DateTime<Utc>) -> Result<(), StoreError> {
        WorkerStats::bump(&self.stats.processed);

        let Some(run) = self.store.get_run(job.run_id).await? else {
            warn!(job_id = %job.id, run_id = %job.run_id, "Dropping job for missing run");
            if self.store.delete_job(job.id, now).await? {
                WorkerStats::bump(&self.stats.orphaned);
            } else {
                self.claim_lost(&job);
            }
            return Ok(());
        };

        if run.status.is_terminal() {
            warn!(job_id = %job.id, run_id = %run.id, "Dropping job for {} run", run.status.as_str());
            if self.store.delete_job(job.id, now).await? {
                WorkerStats::bump(&self.stats.orphaned);
            } else {
                self.claim_lost(&job);
            }
            return Ok(());
        }

        if self.store.get_workflow(run.workflow_id).await?.is_none() {
            warn!(run_id = %run.id, workflow_id = %run.workflow_id, "Workflow deleted, failing run");
            if !self.store.delete_job(job.id, now).await? {
                self.claim_lost(&job);
                return Ok(());
            }
            self.store
                .finish_run(run.id, RunStatus::Failed, Some(WORKFLOW_MISSING), Utc::now().max(now))
                .await?;
            WorkerStats::bump(&self.stats.orphaned);
            return Ok(());
        }

        let step = job.action_step_index.max(0) as usize;
        let Some(action) = run.actions.get(step) else {
            debug!(run_id = %run.id, "No step {}, completing run", step);
            if !self.store.delete_job(job.id, now).await? {
                self.claim_lost(&job);
                return Ok(());
            }
            self.store
                .finish_run(run.id, RunStatus::Completed, None, Utc::now().max(now))
                .await?;
            return Ok(());
        };

        let ctx = ExecutionContext {
            run_id: run.id,
            workflow_id: run.workflow_id,
            step_index: job.action_step_index,
            attempt: job.attempts + 1,
            trigger_data: run.trigger_data.clone(),
            step_outputs: step_outputs(&run, step),
        };

        let started = Instant::now();
        let (action_data, result) = match self.executor.prepare(action, &ctx) {
            Ok(prepared) => {
                let result = self.executor.run(&prepared, &ctx).await;
                (serde_json::to_value(prepared.redacted()), result)
            }
            Err(e) => (serde_json::to_value(action.redacted()), Err(e)),
        };
        let duration_ms = started.elapsed().as_millis() as i64;
        let resolved_at = Utc::now().max(now);
        let action_data = action_data.unwrap_or(Value::Null);

        let claimed_at = now;
        match result {
            Ok(outcome) => {
                self.on_success(&job, claimed_at, &run, action, action_data, outcome, duration_ms, resolved_at)
                    .await
            }
            Err(e) => {
                self.on_failure(&job, claimed_at, &run, action, action_data, e, duration_ms, resolved_at)
                    .await
            }
        }
    }

    fn claim_lost(&self, job: &QueueJob) {
        warn!(
            worker = %self.id,
            job_id = %job.id,
            run_id = %job.run_id,
            "Claim on job was released before it resolved, leaving it to the new owner"
        );
        WorkerStats::bump(&self.stats.lost_claims);
    }

    #[allow(clippy::too_many_arguments)]
    async fn on_success(
        &self,
        job: &QueueJob,
        claimed_at: DateTime<Utc>,
        run: &AutomationRun,
        action: &ActionSpec,
        action_data: Value,
        outcome: StepOutcome,
        duration_ms: i64,
        resolved_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let attempt = job.attempts + 1;
        self.write_log(job, run, action, attempt, action_data, ResultStatus::Success, outcome.output.clone(), None, duration_ms, resolved_at)
            .await;

        let next_step = job.action_step_index + 1;
        let transition = if (next_step as usize) < run.actions.len() {
            let defer = outcome
                .defer_next
                .and_then(|d| chrono::Duration::from_std(d).ok())
                .unwrap_or_else(chrono::Duration::zero);
            let due = resolved_at.checked_add_signed(defer).unwrap_or(resolved_at);
            StepTransition::Next(QueueJob::new(run.id, next_step, due))
        } else {
            StepTransition::Complete
        };

        let result = StepResult {
            step_index: job.action_step_index,
            action_type: action.kind().to_string(),
            status: ResultStatus::Success,
            output: outcome.output,
            error: None,
            attempts: attempt,
            duration_ms,
            completed_at: resolved_at,
        };

        let completes = matches!(transition, StepTransition::Complete);
        if !self
            .store
            .resolve_step(job.id, claimed_at, run.id, &result, transition, resolved_at)
            .await?
        {
            self.claim_lost(job);
            return Ok(());
        }
        WorkerStats::bump(&self.stats.succeeded);

        if completes {
            info!(run_id = %run.id, workflow = %run.workflow_name, "Run completed");
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn on_failure(
        &self,
        job: &QueueJob,
        claimed_at: DateTime<Utc>,
        run: &AutomationRun,
        action: &ActionSpec,
        action_data: Value,
        error: ActionError,
        duration_ms: i64,
        resolved_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let attempts = job.attempts + 1;
        let message = error.to_string();
        self.write_log(job, run, action, attempts, action_data, ResultStatus::Failed, None, Some(message.clone()), duration_ms, resolved_at)
            .await;

        if let Some(next_attempt_at) = self.config.retry.next_attempt_at(attempts, resolved_at) {
            warn!(
                run_id = %run.id,
                step = job.action_step_index,
                attempt = attempts,
                "Step {} failed, retrying at {}: {}",
                action.kind(),
                next_attempt_at,
                message
            );
            if self
                .store
                .requeue_job(job.id, claimed_at, attempts, next_attempt_at, &message)
                .await?
            {
                WorkerStats::bump(&self.stats.retried);
            } else {
                self.claim_lost(job);
            }
            return Ok(());
        }

        error!(
            run_id = %run.id,
            step = job.action_step_index,
            "Step {} failed after {} attempt(s): {}",
            action.kind(),
            attempts,
            message
        );

        let result = StepResult {
            step_index: job.action_step_index,
            action_type: action.kind().to_string(),
            status: ResultStatus::Failed,
            output: None,
            error: Some(message.clone()),
            attempts,
            duration_ms,
            completed_at: resolved_at,
        };
        let reason = format!(
            "step {} ({}) failed after {} attempt(s): {}",
            job.action_step_index,
            action.kind(),
            attempts,
            message
        );
        if self
            .store
            .resolve_step(job.id, claimed_at, run.id, &result, StepTransition::Fail(reason), resolved_at)
            .await?
        {
            WorkerStats::bump(&self.stats.failed);
        } else {
            self.claim_lost(job);
        }
        Ok(())
    }

    /// Log write failures never fail the step
    #[allow(clippy::too_many_arguments)]
    async fn write_log(
        &self,
        job: &QueueJob,
        run: &AutomationRun,
        action: &ActionSpec,
        attempt: i32,
        action_data: Value,
        status: ResultStatus,
        result_data: Option<Value>,
        error_message: Option<String>,
        execution_time_ms: i64,
        at: DateTime<Utc>,
    ) {
        let entry = AutomationLog {
            id: Uuid::new_v4(),
            workflow_id: run.workflow_id,
            run_id: run.id,
            step_index: job.action_step_index,
            attempt,
            action_type: action.kind().to_string(),
            action_data,
            result_status: status,
            result_data,
            error_message,
            execution_time_ms,
            created_at: at,
        };
        if let Err(e) = self.store.write_log(&entry).await {
            warn!(run_id = %run.id, "Failed to write automation log: {}", e);
        }
    }
}

/// Outputs of successful earlier steps, indexed by step
fn step_outputs(run: &AutomationRun, upto: usize) -> Vec<Value> {
    let mut outputs = vec![Value::Null; upto];
    for result in &run.results {
        let index = result.step_index.max(0) as usize;
        if index < upto && result.status == ResultStatus::Success {
            outputs[index] = result.output.clone().unwrap_or(Value::Null);
        }
    }
    outputs
}
