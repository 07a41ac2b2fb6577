// Workflow Executor - Dispatches a single action step to its handler

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use super::actions::{ActionKind, ActionSpec};
use super::handlers::{self, CustomCodeHandler, HandlerDeps};
use crate::services::EmailError;
use crate::store::StoreError;

/// Default per-call execution budget
pub const DEFAULT_MAX_EXECUTION_TIME: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum ActionError {
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
    #[error("No handler registered for action '{0}'")]
    NoHandler(ActionKind),
    #[error("Unknown custom function '{0}'")]
    UnknownCustomFunction(String),
    #[error("Action timed out after {0:?}")]
    Timeout(Duration),
    #[error("Email delivery failed: {0}")]
    Email(#[from] EmailError),
    #[error("Webhook failed: {0}")]
    Webhook(String),
    #[error("Target not found: {0}")]
    TargetNotFound(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Interpolation error: {0}")]
    Interpolation(#[from] serde_json::Error),
    #[error("{0}")]
    Custom(String),
}

/// Context for one attempt of one step
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub run_id: Uuid,
    pub workflow_id: Uuid,
    pub step_index: i32,
    pub attempt: i32,
    pub trigger_data: Value,
    /// Outputs of earlier steps, indexed by step (null when a step produced none)
    pub step_outputs: Vec<Value>,
}

impl ExecutionContext {
    /// Data visible to `{{path}}` placeholders. Trigger payload keys sit on top of the
    /// `trigger`, `run`, `steps` and `last` entries.
    pub fn template_context(&self) -> Value {
        let mut root = Map::new();
        root.insert("trigger".to_string(), self.trigger_data.clone());
        root.insert(
            "run".to_string(),
            json!({"id": self.run_id, "workflow_id": self.workflow_id, "step": self.step_index}),
        );
        root.insert("steps".to_string(), Value::Array(self.step_outputs.clone()));
        root.insert(
            "last".to_string(),
            self.step_outputs.last().cloned().unwrap_or(Value::Null),
        );

        if let Value::Object(payload) = &self.trigger_data {
            for (key, value) in payload {
                root.insert(key.clone(), value.clone());
            }
        }

        Value::Object(root)
    }

    /// Key used by side-effecting handlers to make a step idempotent across retries
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.run_id, self.step_index)
    }
}

/// What a successful handler call produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    pub output: Option<Value>,
    /// Schedule the next step this far in the future
    pub defer_next: Option<Duration>,
}

impl StepOutcome {
    pub fn with_output(output: Value) -> Self {
        Self {
            output: Some(output),
            defer_next: None,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// `action` has already been interpolated
    async fn handle(&self, action: &ActionSpec, ctx: &ExecutionContext) -> Result<StepOutcome, ActionError>;
}

/// A named function invoked by `custom_code` steps
#[async_trait]
pub trait CustomFunction: Send + Sync {
    async fn call(&self, params: Value, ctx: &ExecutionContext) -> Result<Value, ActionError>;
}

#[async_trait]
impl<F, Fut> CustomFunction for F
where
    F: Fn(Value, ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ActionError>> + Send,
{
    async fn call(&self, params: Value, ctx: &ExecutionContext) -> Result<Value, ActionError> {
        (self)(params, ctx.clone()).await
    }
}

/// Shared lookup of custom functions by name
#[derive(Clone, Default)]
pub struct CustomFunctionRegistry {
    functions: Arc<RwLock<HashMap<String, Arc<dyn CustomFunction>>>>,
}

impl CustomFunctionRegistry {
    pub async fn register(&self, name: &str, function: Arc<dyn CustomFunction>) {
        let replaced = self.functions.write().await.insert(name.to_string(), function);
        if replaced.is_some() {
            warn!("Custom function '{}' was re-registered", name);
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn CustomFunction>> {
        self.functions.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.functions.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

pub struct ActionExecutor {
    handlers: HashMap<ActionKind, Arc<dyn ActionHandler>>,
    custom_functions: CustomFunctionRegistry,
    max_execution_time: Duration,
}

impl ActionExecutor {
    /// An executor with only `custom_code` wired up
    pub fn new(max_execution_time: Duration) -> Self {
        let custom_functions = CustomFunctionRegistry::default();
        let mut handlers: HashMap<ActionKind, Arc<dyn ActionHandler>> = HashMap::new();
        handlers.insert(
            ActionKind::CustomCode,
            Arc::new(CustomCodeHandler::new(custom_functions.clone())),
        );

        Self {
            handlers,
            custom_functions,
            max_execution_time,
        }
    }

    /// An executor with every built-in handler registered
    pub fn with_builtin_handlers(deps: HandlerDeps, max_execution_time: Duration) -> Self {
        let mut executor = Self::new(max_execution_time);
        for (kind, handler) in handlers::builtin_handlers(deps) {
            executor.register_handler(kind, handler);
        }
        executor
    }

    pub fn register_handler(&mut self, kind: ActionKind, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(kind, handler);
    }

    pub async fn register_custom_function<F>(&self, name: &str, function: F)
    where
        F: CustomFunction + 'static,
    {
        self.custom_functions.register(name, Arc::new(function)).await;
    }

    pub fn custom_functions(&self) -> &CustomFunctionRegistry {
        &self.custom_functions
    }

    pub fn max_execution_time(&self) -> Duration {
        self.max_execution_time
    }

    /// Interpolate placeholders against the context and check the result
    pub fn prepare(&self, action: &ActionSpec, ctx: &ExecutionContext) -> Result<ActionSpec, ActionError> {
        let prepared = action.interpolate(&ctx.template_context())?;
        prepared.validate().map_err(ActionError::InvalidParams)?;
        Ok(prepared)
    }

    /// Run an already prepared action within the execution budget
    pub async fn run(&self, action: &ActionSpec, ctx: &ExecutionContext) -> Result<StepOutcome, ActionError> {
        let kind = action.kind();
        let handler = self.handlers.get(&kind).ok_or(ActionError::NoHandler(kind))?;

        debug!(
            run_id = %ctx.run_id,
            step = ctx.step_index,
            attempt = ctx.attempt,
            "Executing action {}",
            kind
        );

        match tokio::time::timeout(self.max_execution_time, handler.handle(action, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(ActionError::Timeout(self.max_execution_time)),
        }
    }

    pub async fn execute(&self, action: &ActionSpec, ctx: &ExecutionContext) -> Result<StepOutcome, ActionError> {
        let prepared = self.prepare(action, ctx)?;
        self.run(&prepared, ctx).await
    }
}
