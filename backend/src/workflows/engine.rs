// Workflow Engine - Event dispatch and workflow management

use autoflow_shared::{
    AutomationLog, AutomationStats, QueueJob, RunStatus, StepResult, TestDispatchResponse, WorkerStatsSnapshot,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

use super::actions::ActionSpec;
use super::conditions::{self, ConditionTree};
use super::triggers::TriggerEvent;
use crate::store::{AutomationStore, RunFilter, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub trigger_event_type: String,
    pub conditions: Option<ConditionTree>,
    pub actions: Vec<ActionSpec>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// One execution of a workflow for one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationRun {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub workflow_name: String,
    pub trigger_event_type: String,
    pub trigger_data: Value,
    /// Action list captured when the run was dispatched
    pub actions: Vec<ActionSpec>,
    pub status: RunStatus,
    pub results: Vec<StepResult>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Create/update payload for a workflow
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WorkflowInput {
    #[validate(length(min = 1, max = 200, message = "name must be 1-200 characters"))]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 100, message = "trigger_event_type must be 1-100 characters"))]
    pub trigger_event_type: String,
    #[serde(default)]
    pub conditions: Option<ConditionTree>,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Workflow {0} not found")]
    WorkflowNotFound(Uuid),
    #[error("Run {0} not found")]
    RunNotFound(Uuid),
    #[error("Invalid workflow: {0}")]
    Invalid(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl WorkflowInput {
    fn check_actions(&self) -> EngineResult<()> {
        for (index, action) in self.actions.iter().enumerate() {
            action
                .validate()
                .map_err(|e| EngineError::Invalid(format!("action {}: {}", index, e)))?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct WorkflowEngine {
    store: Arc<dyn AutomationStore>,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn AutomationStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn AutomationStore> {
        &self.store
    }

    // ==================== Dispatch ====================

    /// Start a run for every enabled workflow on `event_type` whose conditions match.
    /// Returns the ids of the runs created; no action executes here.
    pub async fn dispatch(&self, event_type: &str, payload: Value) -> EngineResult<Vec<Uuid>> {
        let workflows = self.store.enabled_workflows_for_event(event_type).await?;
        let mut run_ids = Vec::new();

        for workflow in &workflows {
            if !conditions::matches(workflow.conditions.as_ref(), &payload) {
                debug!("Workflow {} conditions not met for {}", workflow.name, event_type);
                continue;
            }
            run_ids.push(self.start_run(workflow, event_type, &payload).await?);
        }

        info!(
            "Event {} matched {} of {} workflow(s)",
            event_type,
            run_ids.len(),
            workflows.len()
        );
        Ok(run_ids)
    }

    pub async fn dispatch_event(&self, event: &TriggerEvent) -> EngineResult<Vec<Uuid>> {
        debug!(event_id = %event.event_id, source = ?event.source, "Dispatching {}", event.event_type);
        self.dispatch(&event.event_type, event.payload.clone()).await
    }

    /// Evaluate one workflow against `payload` regardless of its enabled flag
    pub async fn test_dispatch(&self, workflow_id: Uuid, payload: Value, dry_run: bool) -> EngineResult<TestDispatchResponse> {
        let workflow = self.get_workflow(workflow_id).await?;
        let matched = conditions::matches(workflow.conditions.as_ref(), &payload);

        let run_id = if matched && !dry_run {
            Some(self.start_run(&workflow, &workflow.trigger_event_type, &payload).await?)
        } else {
            None
        };

        Ok(TestDispatchResponse {
            workflow_id,
            matched,
            run_id,
            dry_run,
        })
    }

    async fn start_run(&self, workflow: &WorkflowDefinition, event_type: &str, payload: &Value) -> EngineResult<Uuid> {
        let now = Utc::now();
        let empty = workflow.actions.is_empty();

        let run = AutomationRun {
            id: Uuid::new_v4(),
            workflow_id: workflow.id,
            workflow_name: workflow.name.clone(),
            trigger_event_type: event_type.to_string(),
            trigger_data: payload.clone(),
            actions: workflow.actions.clone(),
            status: if empty { RunStatus::Completed } else { RunStatus::Running },
            results: Vec::new(),
            error: None,
            started_at: now,
            completed_at: if empty { Some(now) } else { None },
        };

        let first_job = (!empty).then(|| QueueJob::new(run.id, 0, now));
        self.store.create_run(&run, first_job.as_ref()).await?;

        info!("Started run {} for workflow {}", run.id, workflow.name);
        Ok(run.id)
    }

    // ==================== Workflow management ====================

    pub async fn list_workflows(&self, limit: i64, offset: i64) -> EngineResult<(Vec<WorkflowDefinition>, i64)> {
        Ok(self.store.list_workflows(limit, offset).await?)
    }

    pub async fn get_workflow(&self, id: Uuid) -> EngineResult<WorkflowDefinition> {
        self.store
            .get_workflow(id)
            .await?
            .ok_or(EngineError::WorkflowNotFound(id))
    }

    pub async fn create_workflow(&self, input: WorkflowInput) -> EngineResult<WorkflowDefinition> {
        input.check_actions()?;

        let workflow = WorkflowDefinition {
            id: Uuid::new_v4(),
            name: input.name,
            description: input.description,
            trigger_event_type: input.trigger_event_type,
            conditions: input.conditions,
            actions: input.actions,
            enabled: input.enabled,
            created_at: Utc::now(),
            updated_at: None,
        };
        self.store.insert_workflow(&workflow).await?;

        info!("Created workflow {} ({})", workflow.name, workflow.id);
        Ok(workflow)
    }

    pub async fn update_workflow(&self, id: Uuid, input: WorkflowInput) -> EngineResult<WorkflowDefinition> {
        input.check_actions()?;
        let existing = self.get_workflow(id).await?;

        let workflow = WorkflowDefinition {
            id,
            name: input.name,
            description: input.description,
            trigger_event_type: input.trigger_event_type,
            conditions: input.conditions,
            actions: input.actions,
            enabled: input.enabled,
            created_at: existing.created_at,
            updated_at: Some(Utc::now()),
        };

        if !self.store.update_workflow(&workflow).await? {
            return Err(EngineError::WorkflowNotFound(id));
        }
        Ok(workflow)
    }

    /// Deleting a workflow leaves its runs in place; their pending steps fail as orphans
    pub async fn delete_workflow(&self, id: Uuid) -> EngineResult<()> {
        if !self.store.delete_workflow(id).await? {
            return Err(EngineError::WorkflowNotFound(id));
        }
        info!("Deleted workflow {}", id);
        Ok(())
    }

    pub async fn toggle_workflow(&self, id: Uuid) -> EngineResult<WorkflowDefinition> {
        let mut workflow = self.get_workflow(id).await?;
        workflow.enabled = !workflow.enabled;
        workflow.updated_at = Some(Utc::now());

        if !self.store.update_workflow(&workflow).await? {
            return Err(EngineError::WorkflowNotFound(id));
        }
        info!(
            "Workflow {} {}",
            workflow.name,
            if workflow.enabled { "enabled" } else { "disabled" }
        );
        Ok(workflow)
    }

    // ==================== Runs ====================

    pub async fn get_run(&self, id: Uuid) -> EngineResult<AutomationRun> {
        self.store.get_run(id).await?.ok_or(EngineError::RunNotFound(id))
    }

    pub async fn list_runs(&self, filter: &RunFilter, limit: i64, offset: i64) -> EngineResult<(Vec<AutomationRun>, i64)> {
        Ok(self.store.list_runs(filter, limit, offset).await?)
    }

    pub async fn run_logs(&self, run_id: Uuid) -> EngineResult<Vec<AutomationLog>> {
        // 404 for unknown runs rather than an empty list
        self.get_run(run_id).await?;
        Ok(self.store.logs_for_run(run_id).await?)
    }

    pub async fn stats(&self, worker: Option<WorkerStatsSnapshot>) -> EngineResult<AutomationStats> {
        let (workflows_total, workflows_enabled) = self.store.count_workflows().await?;
        Ok(AutomationStats {
            workflows_total,
            workflows_enabled,
            runs: self.store.count_runs().await?,
            queue: self.store.count_jobs().await?,
            worker,
        })
    }
}
