pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod pagination;
pub mod services;
pub mod store;
pub mod workflows;

pub use error::{ApiError, ApiResult, AppError};
pub use pagination::{PaginatedResponse, PaginationMeta, PaginationParams};

use std::sync::Arc;
use workflows::{WorkerStats, WorkflowEngine};


pub struct AppState {
    pub engine: WorkflowEngine,
    /// Counters of the in-process worker, absent when the worker is disabled
    pub worker_stats: Option<Arc<WorkerStats>>,
}
