//! Step executor registry: the seam between the engine and the work a step
//! performs.
//!
//! Every step type maps to one `StepExecutor` with a single `execute`
//! operation. Executors receive an already-resolved step and a read-only
//! snapshot of the execution context; they never write to the context and
//! know nothing about retries. External collaborators (network client, agent
//! gateway, notification dispatcher) are injected as ports.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use uuid::Uuid;

use stepflow_types::error::StateError;
use stepflow_types::execution::{ErrorKind, StepFailure};
use stepflow_types::workflow::{NotificationConfig, StepDefinition, StepType};

use super::expression::ExpressionError;

/// Boxed, sendable future returned by executors and ports.
pub type StepFuture<'a, T = Value> = Pin<Box<dyn Future<Output = Result<T, StepError>> + Send + 'a>>;

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Why a single step attempt failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StepError {
    /// Resolved config is missing or malformed.
    #[error("config error: {0}")]
    Config(String),

    #[error("expression error: {0}")]
    Expression(#[from] ExpressionError),

    /// Network-level failure before a response was received.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("step timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The external party answered, but with a failure.
    #[error("provider error: {message}")]
    Provider { status: Option<u16>, message: String },

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("dependency '{0}' has no successful output")]
    Dependency(String),

    /// Sub-steps of a parallel step failed; carries every outcome collected.
    #[error("{} parallel sub-step(s) failed", .errors.len())]
    Parallel {
        results: BTreeMap<String, Value>,
        errors: BTreeMap<String, StepError>,
    },

    /// Anything that fits no known class.
    #[error("{0}")]
    Other(String),
}

impl StepError {
    pub(crate) fn mismatch(step: &StepDefinition, expected: StepType) -> Self {
        StepError::Config(format!(
            "step '{}' is a {} step, not {expected}",
            step.id,
            step.step_type()
        ))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StepError::Config(_) => ErrorKind::Config,
            StepError::Expression(_) => ErrorKind::Expression,
            StepError::Transport(_) => ErrorKind::Transport,
            StepError::Timeout { .. } => ErrorKind::Timeout,
            StepError::Provider { .. } => ErrorKind::Provider,
            StepError::State(_) => ErrorKind::State,
            StepError::Dependency(_) => ErrorKind::Dependency,
            StepError::Parallel { .. } => ErrorKind::Parallel,
            StepError::Other(_) => ErrorKind::Unclassified,
        }
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// `retry_unclassified` decides the fate of `Other` errors.
    pub fn is_retriable(&self, retry_unclassified: bool) -> bool {
        match self {
            StepError::Config(_)
            | StepError::Expression(_)
            | StepError::State(_)
            | StepError::Dependency(_) => false,
            StepError::Transport(_) | StepError::Timeout { .. } => true,
            StepError::Provider { status, .. } => match status {
                Some(429) => true,
                Some(code) if (400..500).contains(code) => false,
                _ => true,
            },
            StepError::Parallel { errors, .. } => errors
                .values()
                .any(|e| e.is_retriable(retry_unclassified)),
            StepError::Other(_) => retry_unclassified,
        }
    }

    /// Convert into the persisted failure record.
    pub fn to_failure(&self, retry_unclassified: bool) -> StepFailure {
        let status_code = match self {
            StepError::Provider { status, .. } => *status,
            _ => None,
        };
        let details = match self {
            StepError::Parallel { results, errors } => {
                let errors: BTreeMap<&String, String> =
                    errors.iter().map(|(id, e)| (id, e.to_string())).collect();
                Some(json!({ "results": results, "errors": errors }))
            }
            _ => None,
        };
        StepFailure {
            kind: self.kind(),
            message: self.to_string(),
            status_code,
            retriable: self.is_retriable(retry_unclassified),
            details,
        }
    }
}

// ---------------------------------------------------------------------------
// Executor contract
// ---------------------------------------------------------------------------

/// Read-only view of an execution handed to executors.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    /// Expression context snapshot (`input`, `steps`, `errors`, `execution`).
    pub data: Arc<Value>,
}

/// A stateless capability that performs one kind of step.
pub trait StepExecutor: Send + Sync {
    fn execute<'a>(&'a self, step: &'a StepDefinition, context: &'a StepContext)
        -> StepFuture<'a>;
}

/// Run one attempt of a step, racing it against `timeout`.
pub async fn dispatch(
    executor: &dyn StepExecutor,
    step: &StepDefinition,
    context: &StepContext,
    timeout: Duration,
) -> Result<Value, StepError> {
    match tokio::time::timeout(timeout, executor.execute(step, context)).await {
        Ok(result) => result,
        Err(_) => Err(StepError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

// ---------------------------------------------------------------------------
// Collaborator ports
// ---------------------------------------------------------------------------

/// Outbound HTTP request built by the `http` executor.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

/// Response surfaced to the `http` executor. `body` is parsed JSON when the
/// payload parses, otherwise a JSON string.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

/// Network client used by `http` steps.
pub trait HttpClient: Send + Sync {
    fn send(&self, request: HttpRequest) -> StepFuture<'_, HttpResponse>;
}

/// External agent invocation gateway used by `agent` steps.
pub trait AgentGateway: Send + Sync {
    fn invoke<'a>(&'a self, agent_id: &'a str, input: Value) -> StepFuture<'a>;
}

/// Notification dispatcher used by `notification` steps.
pub trait Notifier: Send + Sync {
    fn notify<'a>(&'a self, notification: &'a NotificationConfig) -> StepFuture<'a, ()>;
}

/// The collaborators the built-in executors need.
#[derive(Clone)]
pub struct ExecutorPorts {
    pub http: Arc<dyn HttpClient>,
    pub agents: Arc<dyn AgentGateway>,
    pub notifier: Arc<dyn Notifier>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Maps each step type to the executor that runs it.
#[derive(Clone, Default)]
pub struct StepRegistry {
    executors: HashMap<StepType, Arc<dyn StepExecutor>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in executor wired to the given ports.
    ///
    /// Parallel sub-steps are dispatched through a copy of the registry that
    /// excludes `parallel` itself; sub-steps without their own timeout get
    /// `default_timeout`.
    pub fn builtin(ports: ExecutorPorts, default_timeout: Duration) -> Self {
        use super::executors::{
            AgentExecutor, ConditionalExecutor, DelayExecutor, HttpExecutor,
            NotificationExecutor, ParallelExecutor, TransformExecutor,
        };

        let leaves = Self::new()
            .with(StepType::Http, HttpExecutor::new(ports.http))
            .with(StepType::Agent, AgentExecutor::new(ports.agents))
            .with(StepType::Transform, TransformExecutor)
            .with(StepType::Conditional, ConditionalExecutor)
            .with(StepType::Delay, DelayExecutor)
            .with(StepType::Notification, NotificationExecutor::new(ports.notifier));

        let parallel = ParallelExecutor::new(leaves.clone(), default_timeout);
        leaves.with(StepType::Parallel, parallel)
    }

    /// Builder-style registration; replaces any executor already registered.
    pub fn with(mut self, step_type: StepType, executor: impl StepExecutor + 'static) -> Self {
        self.register(step_type, Arc::new(executor));
        self
    }

    pub fn register(
        &mut self,
        step_type: StepType,
        executor: Arc<dyn StepExecutor>,
    ) -> Option<Arc<dyn StepExecutor>> {
        self.executors.insert(step_type, executor)
    }

    pub fn get(&self, step_type: StepType) -> Option<Arc<dyn StepExecutor>> {
        self.executors.get(&step_type).cloned()
    }

    pub fn contains(&self, step_type: StepType) -> bool {
        self.executors.contains_key(&step_type)
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&StepType> = self.executors.keys().collect();
        types.sort();
        f.debug_struct("StepRegistry")
            .field("step_types", &types)
            .finish()
    }
}
