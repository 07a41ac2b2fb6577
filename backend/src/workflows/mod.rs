// Workflow Automation Engine
//
// Event-driven automation for the creator platform: events are matched to workflows,
// each match becomes a run, and a polling worker executes the run's steps from a
// durable queue with retry and backoff.

pub mod actions;
pub mod conditions;
pub mod engine;
pub mod executor;
pub mod handlers;
pub mod interpolation;
pub mod retry;
pub mod triggers;
pub mod worker;

pub use actions::{ActionKind, ActionSpec};
pub use conditions::{Condition, ConditionGroup, ConditionOperator, ConditionTree, Logic};
pub use engine::{AutomationRun, EngineError, WorkflowDefinition, WorkflowEngine, WorkflowInput};
pub use executor::{ActionError, ActionExecutor, ActionHandler, CustomFunction, ExecutionContext, StepOutcome};
pub use handlers::HandlerDeps;
pub use retry::RetryPolicy;
pub use triggers::{EventSource, TriggerEvent};
pub use worker::{Worker, WorkerConfig, WorkerStats};
