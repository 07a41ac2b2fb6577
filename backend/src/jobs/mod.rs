// Background Jobs
//
// Scheduled housekeeping for the automation queue, run by tokio-cron-scheduler
// alongside the worker.

pub mod maintenance;
pub mod scheduler;

pub use maintenance::{MaintenanceJobs, MaintenanceReport};
pub use scheduler::{JobConfig, JobError, JobResult, JobScheduler};
