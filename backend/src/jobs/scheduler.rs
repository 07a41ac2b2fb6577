// Job Scheduler - Cron-driven maintenance for the automation queue

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler as TokioScheduler, JobSchedulerError};
use tracing::{error, info};

use super::MaintenanceJobs;
use crate::config::MaintenanceSettings;
use crate::store::{AutomationStore, StoreError};

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] JobSchedulerError),
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Clone, PartialEq)]
pub struct JobConfig {
    /// Six-field cron expression for the maintenance pass
    pub maintenance_cron: String,
    pub stale_job_timeout: Duration,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            // every 5 minutes
            maintenance_cron: "0 */5 * * * *".to_string(),
            stale_job_timeout: Duration::from_secs(900),
        }
    }
}

impl From<&MaintenanceSettings> for JobConfig {
    fn from(settings: &MaintenanceSettings) -> Self {
        Self {
            maintenance_cron: settings.cron.clone(),
            stale_job_timeout: settings.stale_job_timeout(),
        }
    }
}

pub struct JobScheduler {
    scheduler: TokioScheduler,
    store: Arc<dyn AutomationStore>,
    config: JobConfig,
}

impl JobScheduler {
    pub async fn new(store: Arc<dyn AutomationStore>, config: JobConfig) -> JobResult<Self> {
        let scheduler = TokioScheduler::new().await?;
        Ok(Self { scheduler, store, config })
    }

    pub async fn start(&self) -> JobResult<()> {
        info!("Starting background job scheduler");

        self.schedule_maintenance().await?;
        self.scheduler.start().await?;

        info!("Background job scheduler started successfully");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> JobResult<()> {
        info!("Shutting down background job scheduler");
        self.scheduler.shutdown().await?;
        Ok(())
    }

    async fn schedule_maintenance(&self) -> JobResult<()> {
        let store = self.store.clone();
        let config = self.config.clone();

        let job = Job::new_async(self.config.maintenance_cron.as_str(), move |_uuid, _lock| {
            let store = store.clone();
            let config = config.clone();

            Box::pin(async move {
                match MaintenanceJobs::run_all(&store, config.stale_job_timeout, Utc::now()).await {
                    Ok(report) => info!(
                        stale_jobs_released = report.stale_jobs_released,
                        "Automation maintenance completed"
                    ),
                    Err(e) => error!("Automation maintenance failed: {}", e),
                }
            })
        })?;

        self.scheduler.add(job).await?;
        info!("Scheduled automation maintenance ({})", self.config.maintenance_cron);

        Ok(())
    }
}
