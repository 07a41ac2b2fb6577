// Maintenance Jobs - Queue recovery
//
// Automation logs are append-only and never touched here.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::scheduler::{JobError, JobResult};
use crate::store::AutomationStore;

/// Outcome of one maintenance pass
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MaintenanceReport {
    pub stale_jobs_released: u64,
}

pub struct MaintenanceJobs;

impl MaintenanceJobs {
    /// Requeue jobs whose worker claimed them more than `stale_after` ago and never
    /// resolved them, e.g. because the process died mid-step.
    pub async fn recover_stale_jobs(
        store: &Arc<dyn AutomationStore>,
        stale_after: Duration,
        now: DateTime<Utc>,
    ) -> JobResult<u64> {
        let stale_after = ChronoDuration::from_std(stale_after)
            .map_err(|e| JobError::ConfigError(format!("stale job timeout out of range: {}", e)))?;

        let released = store.release_stale_jobs(now - stale_after).await?;
        if released > 0 {
            warn!("Released {} stale automation job(s) back to the queue", released);
        }
        Ok(released)
    }

    pub async fn run_all(
        store: &Arc<dyn AutomationStore>,
        stale_after: Duration,
        now: DateTime<Utc>,
    ) -> JobResult<MaintenanceReport> {
        Ok(MaintenanceReport {
            stale_jobs_released: Self::recover_stale_jobs(store, stale_after, now).await?,
        })
    }
}
