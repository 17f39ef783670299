//! Workflow engine: drives executions of published definitions to a terminal
//! state.
//!
//! Each execution runs on its own tokio task and walks the definition's steps
//! strictly in order:
//!
//! 1. Skip steps already settled (only happens on resume). A recorded
//!    success that missed its commit is committed instead of re-run.
//! 2. Check `depends_on`, resolve the step config against the context.
//! 3. Dispatch to the registered executor, racing its timeout and the
//!    execution's cancellation token.
//! 4. Record the attempt. A success is recorded and committed to
//!    `steps.<id>` in the same checkpoint.
//! 5. On failure ask the retry policy, then apply the workflow's `on_error`.
//!
//! Every transition is checkpointed before the loop moves on, so a crashed
//! process can pick executions back up with `resume`/`recover_interrupted`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Value};
use stepflow_types::config::EngineConfig;
use stepflow_types::error::{RepositoryError, StateError};
use stepflow_types::execution::{Execution, ExecutionStatus, StepResult};
use stepflow_types::workflow::{DefinitionStatus, OnError, StepDefinition, WorkflowDefinition};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::event::EventBus;
use crate::repository::workflow::{DefinitionRepository, ExecutionRepository};

use super::checkpoint::{CheckpointError, CheckpointManager};
use super::registry::{dispatch, StepContext, StepError, StepRegistry};
use super::resolver::resolve_step;
use super::retry::{RetryDecision, RetryPolicy};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by the engine's public operations.
///
/// Step failures are not errors at this level: they end up in the
/// execution's status and step history.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("workflow {id} is {status}, only published workflows can run")]
    NotPublished { id: Uuid, status: DefinitionStatus },

    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("execution {0} is already being driven by this engine")]
    AlreadyRunning(Uuid),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl From<CheckpointError> for EngineError {
    fn from(err: CheckpointError) -> Self {
        match err {
            CheckpointError::Repository(e) => EngineError::Repository(e),
            CheckpointError::ExecutionNotFound(id) => EngineError::ExecutionNotFound(id),
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionSummary
// ---------------------------------------------------------------------------

/// Caller-facing view of an execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionSummary {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub workflow_version: u32,
    pub status: ExecutionStatus,
    pub output: Option<Value>,
    pub step_results: Vec<StepResult>,
    pub error: Option<String>,
    pub failed_step_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Execution> for ExecutionSummary {
    fn from(execution: &Execution) -> Self {
        Self {
            id: execution.id(),
            workflow_id: execution.workflow_id(),
            workflow_version: execution.workflow_version(),
            status: execution.status(),
            output: execution.output().cloned(),
            step_results: execution.step_results().to_vec(),
            error: execution.error().map(str::to_string),
            failed_step_id: execution.failed_step_id().map(str::to_string),
            created_at: execution.created_at(),
            started_at: execution.started_at(),
            completed_at: execution.completed_at(),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Where the step loop goes after a step has been handled.
enum StepFlow {
    /// The step is settled; move to the next one.
    Next(Execution),
    /// The execution reached a terminal state.
    Stop(Execution),
}

/// Executes published workflow definitions.
///
/// Cheap to clone: clones share repositories, registry, event bus and the
/// table of in-flight executions.
pub struct WorkflowEngine<D: DefinitionRepository, E: ExecutionRepository> {
    definitions: Arc<D>,
    checkpoints: CheckpointManager<E>,
    registry: Arc<StepRegistry>,
    policy: RetryPolicy,
    events: EventBus,
    default_timeout: Duration,
    max_output_bytes: usize,
    /// Cancellation tokens of executions driven by this engine, keyed by id.
    running: Arc<DashMap<Uuid, CancellationToken>>,
}

impl<D: DefinitionRepository, E: ExecutionRepository> Clone for WorkflowEngine<D, E> {
    fn clone(&self) -> Self {
        Self {
            definitions: Arc::clone(&self.definitions),
            checkpoints: self.checkpoints.clone(),
            registry: Arc::clone(&self.registry),
            policy: self.policy,
            events: self.events.clone(),
            default_timeout: self.default_timeout,
            max_output_bytes: self.max_output_bytes,
            running: Arc::clone(&self.running),
        }
    }
}

impl<D, E> WorkflowEngine<D, E>
where
    D: DefinitionRepository + 'static,
    E: ExecutionRepository + 'static,
{
    pub fn new(
        definitions: Arc<D>,
        executions: Arc<E>,
        registry: StepRegistry,
        config: &EngineConfig,
    ) -> Self {
        let events = EventBus::new(config.event_bus_capacity);
        Self {
            definitions,
            checkpoints: CheckpointManager::new(executions, events.clone()),
            registry: Arc::new(registry),
            policy: RetryPolicy::from_config(config),
            events,
            default_timeout: Duration::from_millis(config.default_step_timeout_ms),
            max_output_bytes: config.max_step_output_bytes,
            running: Arc::new(DashMap::new()),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn definitions(&self) -> &D {
        &self.definitions
    }

    // -----------------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------------

    /// Accept a run of a published workflow and drive it in the background.
    ///
    /// Definition problems (unknown id, not published) are returned here;
    /// everything after acceptance is reported through the execution itself.
    pub async fn execute(&self, workflow_id: Uuid, input: Value) -> Result<Uuid, EngineError> {
        let (definition, execution, token) = self.accept(workflow_id, input).await?;
        let execution_id = execution.id();
        let engine = self.clone();
        tokio::spawn(async move {
            let _ = engine.drive(definition, execution, token).await;
        });
        Ok(execution_id)
    }

    /// Like `execute`, but waits for the execution to finish.
    pub async fn run(&self, workflow_id: Uuid, input: Value) -> Result<Execution, EngineError> {
        let (definition, execution, token) = self.accept(workflow_id, input).await?;
        self.drive(definition, execution, token).await
    }

    pub async fn get_execution(&self, execution_id: Uuid) -> Result<ExecutionSummary, EngineError> {
        let execution = self.checkpoints.restore(execution_id).await?;
        Ok(ExecutionSummary::from(&execution))
    }

    /// Executions of one workflow, newest first.
    pub async fn list_executions(
        &self,
        workflow_id: Uuid,
        limit: u32,
    ) -> Result<Vec<ExecutionSummary>, EngineError> {
        let executions = self
            .checkpoints
            .repo()
            .list_executions(&workflow_id, limit)
            .await?;
        Ok(executions.iter().map(ExecutionSummary::from).collect())
    }

    /// Request cancellation of a Running execution.
    ///
    /// The step in flight is abandoned and its result never committed. An
    /// execution persisted as Running but not driven by this engine (left over
    /// from a crash) is cancelled directly in storage.
    pub async fn cancel_execution(&self, execution_id: Uuid) -> Result<(), EngineError> {
        loop {
            match self.track(execution_id) {
                Ok(_) => {
                    // Holding the slot keeps `resume` from driving the
                    // snapshot while it is cancelled in storage.
                    let result = self.cancel_stored(execution_id).await;
                    self.running.remove(&execution_id);
                    result?;
                    tracing::info!(execution_id = %execution_id, "cancelled stranded execution");
                    return Ok(());
                }
                Err(EngineError::AlreadyRunning(_)) => {
                    let execution = self.checkpoints.restore(execution_id).await?;
                    if execution.status() != ExecutionStatus::Running {
                        return Err(StateError::new("cancel", execution.status()).into());
                    }
                    if let Some(token) = self.running.get(&execution_id) {
                        token.cancel();
                        tracing::info!(execution_id = %execution_id, "cancellation requested");
                        return Ok(());
                    }
                    // The driver settled the execution meanwhile; look again.
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Continue an interrupted execution from its last checkpoint.
    ///
    /// Steps already settled (output or tolerated error committed) are not
    /// run again; a step interrupted mid-attempt is re-run with the attempt
    /// counter continuing where it stopped.
    pub async fn resume(&self, execution_id: Uuid) -> Result<Execution, EngineError> {
        let token = self.track(execution_id)?;
        let (definition, execution) = match self.load_interrupted(execution_id).await {
            Ok(loaded) => loaded,
            Err(e) => {
                self.running.remove(&execution_id);
                return Err(e);
            }
        };

        tracing::info!(
            execution_id = %execution_id,
            settled_steps = execution.context().steps().len() + execution.context().errors().len(),
            "resuming execution"
        );
        self.drive(Arc::new(definition), execution, token).await
    }

    /// Resume, in the background, every execution left Pending or Running
    /// that this engine is not already driving. Returns their ids.
    pub async fn recover_interrupted(&self) -> Result<Vec<Uuid>, EngineError> {
        let repo = self.checkpoints.repo();
        let mut stranded = repo.list_by_status(ExecutionStatus::Running).await?;
        stranded.extend(repo.list_by_status(ExecutionStatus::Pending).await?);

        let mut recovered = Vec::new();
        for execution in stranded {
            let execution_id = execution.id();
            if self.running.contains_key(&execution_id) {
                continue;
            }
            let engine = self.clone();
            tokio::spawn(async move {
                if let Err(e) = engine.resume(execution_id).await {
                    tracing::warn!(execution_id = %execution_id, error = %e, "failed to resume execution");
                }
            });
            recovered.push(execution_id);
        }

        if !recovered.is_empty() {
            tracing::info!(count = recovered.len(), "recovering interrupted executions");
        }
        Ok(recovered)
    }

    // -----------------------------------------------------------------------
    // Acceptance
    // -----------------------------------------------------------------------

    async fn load_definition(&self, workflow_id: Uuid) -> Result<WorkflowDefinition, EngineError> {
        match self.definitions.load_published(&workflow_id).await {
            Ok(definition) => Ok(definition),
            Err(RepositoryError::NotFound) => {
                match self.definitions.get_definition(&workflow_id).await? {
                    Some(definition) => Err(EngineError::NotPublished {
                        id: workflow_id,
                        status: definition.status(),
                    }),
                    None => Err(EngineError::WorkflowNotFound(workflow_id)),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn accept(
        &self,
        workflow_id: Uuid,
        input: Value,
    ) -> Result<(Arc<WorkflowDefinition>, Execution, CancellationToken), EngineError> {
        let definition = self.load_definition(workflow_id).await?;
        let execution = Execution::new(definition.id(), definition.version(), input);
        self.checkpoints.checkpoint_created(&execution).await?;
        let token = self.track(execution.id())?;

        tracing::info!(
            execution_id = %execution.id(),
            workflow_id = %definition.id(),
            version = definition.version(),
            "execution accepted"
        );
        Ok((Arc::new(definition), execution, token))
    }

    fn track(&self, execution_id: Uuid) -> Result<CancellationToken, EngineError> {
        match self.running.entry(execution_id) {
            Entry::Occupied(_) => Err(EngineError::AlreadyRunning(execution_id)),
            Entry::Vacant(slot) => {
                let token = CancellationToken::new();
                slot.insert(token.clone());
                Ok(token)
            }
        }
    }

    /// Cancel an execution no task of this engine is driving. The caller
    /// holds the execution's slot in `running`.
    async fn cancel_stored(&self, execution_id: Uuid) -> Result<(), EngineError> {
        let execution = self.checkpoints.restore(execution_id).await?;
        if execution.status() != ExecutionStatus::Running {
            return Err(StateError::new("cancel", execution.status()).into());
        }
        self.cancel(execution).await?;
        Ok(())
    }

    async fn load_interrupted(
        &self,
        execution_id: Uuid,
    ) -> Result<(WorkflowDefinition, Execution), EngineError> {
        let execution = self.checkpoints.restore(execution_id).await?;
        if execution.status().is_terminal() {
            return Err(StateError::new("resume", execution.status()).into());
        }
        let definition = self
            .definitions
            .get_definition(&execution.workflow_id())
            .await?
            .ok_or(EngineError::WorkflowNotFound(execution.workflow_id()))?;
        Ok((definition, execution))
    }

    // -----------------------------------------------------------------------
    // Step loop
    // -----------------------------------------------------------------------

    async fn drive(
        &self,
        definition: Arc<WorkflowDefinition>,
        execution: Execution,
        token: CancellationToken,
    ) -> Result<Execution, EngineError> {
        let execution_id = execution.id();
        let span = tracing::info_span!(
            "workflow_execution",
            execution_id = %execution_id,
            workflow_id = %definition.id(),
        );
        let result = self
            .run_steps(&definition, execution, &token)
            .instrument(span)
            .await;
        self.running.remove(&execution_id);

        match &result {
            Ok(done) => tracing::info!(
                execution_id = %execution_id,
                status = %done.status(),
                error = ?done.error(),
                "execution finished"
            ),
            Err(e) => tracing::error!(execution_id = %execution_id, error = %e, "execution aborted"),
        }
        result
    }

    async fn run_steps(
        &self,
        definition: &WorkflowDefinition,
        mut execution: Execution,
        token: &CancellationToken,
    ) -> Result<Execution, EngineError> {
        if execution.status() == ExecutionStatus::Pending {
            execution = self.checkpoints.checkpoint(execution.start()?).await?;
        }

        for step in definition.steps() {
            if execution.context().is_settled(&step.id) {
                tracing::debug!(step_id = %step.id, "step already settled, skipping");
                continue;
            }
            if let Some(output) = execution.recorded_output(&step.id).cloned() {
                tracing::debug!(step_id = %step.id, "committing recorded output of succeeded step");
                execution = self
                    .checkpoints
                    .checkpoint(execution.commit_output(&step.id, output)?)
                    .await?;
                continue;
            }
            if token.is_cancelled() {
                return self.cancel(execution).await;
            }
            match self.run_step(definition, execution, step, token).await? {
                StepFlow::Next(next) => execution = next,
                StepFlow::Stop(done) => return Ok(done),
            }
        }

        if token.is_cancelled() {
            return self.cancel(execution).await;
        }
        let output = execution.successful_outputs();
        Ok(self.checkpoints.checkpoint(execution.complete(output)?).await?)
    }

    /// Run every attempt of one step and settle it.
    async fn run_step(
        &self,
        definition: &WorkflowDefinition,
        mut execution: Execution,
        step: &StepDefinition,
        token: &CancellationToken,
    ) -> Result<StepFlow, EngineError> {
        let handling = definition.error_handling();
        let retry = RetryPolicy::effective(step, &handling);
        let mut attempt = execution.attempts_for(&step.id);

        loop {
            attempt += 1;
            let started_at = Utc::now();
            let clock = Instant::now();

            let outcome = match self.prepare(&execution, step) {
                Ok((resolved, context)) => {
                    match self.dispatch_cancellable(resolved, context, token).await {
                        Some(outcome) => outcome,
                        None => return Ok(StepFlow::Stop(self.cancel(execution).await?)),
                    }
                }
                Err(e) => Err(e),
            };
            let duration_ms = clock.elapsed().as_millis() as u64;

            let error = match outcome {
                Ok(output) => {
                    let output = self.cap_output(&step.id, output);
                    tracing::info!(step_id = %step.id, attempt, duration_ms, "step succeeded");
                    let result =
                        StepResult::success(&step.id, attempt, output, started_at, duration_ms);
                    execution = self
                        .checkpoints
                        .checkpoint(execution.commit_success(result)?)
                        .await?;
                    return Ok(StepFlow::Next(execution));
                }
                Err(error) => error,
            };

            let failure = error.to_failure(self.policy.retry_unclassified);
            tracing::warn!(
                step_id = %step.id,
                attempt,
                retriable = failure.retriable,
                error = %error,
                "step attempt failed"
            );
            let result =
                StepResult::failure(&step.id, attempt, failure.clone(), started_at, duration_ms);
            execution = self
                .checkpoints
                .checkpoint(execution.record_step_result(result)?)
                .await?;

            let decision = self.policy.decide(retry.as_ref(), attempt, &error);
            if let RetryDecision::RetryAfter(delay) = decision {
                tracing::info!(
                    step_id = %step.id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying step after backoff"
                );
                tokio::select! {
                    _ = token.cancelled() => {
                        return Ok(StepFlow::Stop(self.cancel(execution).await?));
                    }
                    _ = tokio::time::sleep(delay) => continue,
                }
            }

            let flow = match handling.on_error {
                OnError::Continue => {
                    tracing::info!(step_id = %step.id, "recording error and continuing");
                    let next = execution.commit_error(&step.id, failure)?;
                    StepFlow::Next(self.checkpoints.checkpoint(next).await?)
                }
                OnError::Retry if decision == RetryDecision::Exhausted => {
                    let message = format!(
                        "max retries exceeded for step '{}' after {attempt} attempt(s): {error}",
                        step.id
                    );
                    let failed = execution.fail(message, Some(&step.id))?;
                    StepFlow::Stop(self.checkpoints.checkpoint(failed).await?)
                }
                OnError::Fail | OnError::Retry => {
                    let failed = execution.fail(error.to_string(), Some(&step.id))?;
                    StepFlow::Stop(self.checkpoints.checkpoint(failed).await?)
                }
            };
            return Ok(flow);
        }
    }

    /// Check dependencies and resolve the step config against the context.
    fn prepare(
        &self,
        execution: &Execution,
        step: &StepDefinition,
    ) -> Result<(StepDefinition, StepContext), StepError> {
        for dependency in &step.depends_on {
            if execution.context().step_output(dependency).is_none() {
                return Err(StepError::Dependency(dependency.clone()));
            }
        }

        let data = execution
            .context()
            .to_expression_context(execution.id(), execution.workflow_id());
        let resolved_step = resolve_step(step, &data)?;
        let context = StepContext {
            execution_id: execution.id(),
            workflow_id: execution.workflow_id(),
            data: Arc::new(data),
        };
        Ok((resolved_step, context))
    }

    /// Dispatch on a separate task. `None` means the execution was cancelled
    /// first; the task is detached and its result dropped.
    async fn dispatch_cancellable(
        &self,
        step: StepDefinition,
        context: StepContext,
        token: &CancellationToken,
    ) -> Option<Result<Value, StepError>> {
        let Some(executor) = self.registry.get(step.step_type()) else {
            return Some(Err(StepError::Config(format!(
                "no executor registered for {} steps",
                step.step_type()
            ))));
        };
        let timeout = step
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);

        let handle =
            tokio::spawn(async move { dispatch(executor.as_ref(), &step, &context, timeout).await });

        tokio::select! {
            biased;
            _ = token.cancelled() => None,
            joined = handle => Some(joined.unwrap_or_else(|e| {
                Err(StepError::Other(format!("step task failed: {e}")))
            })),
        }
    }

    /// Replace outputs larger than the configured limit with a marker.
    fn cap_output(&self, step_id: &str, output: Value) -> Value {
        if self.max_output_bytes == 0 {
            return output;
        }
        let size = serde_json::to_vec(&output).map(|b| b.len()).unwrap_or(0);
        if size <= self.max_output_bytes {
            return output;
        }
        tracing::warn!(step_id, size, limit = self.max_output_bytes, "step output truncated");
        json!({
            "_truncated": true,
            "original_bytes": size,
            "limit_bytes": self.max_output_bytes,
        })
    }

    async fn cancel(&self, execution: Execution) -> Result<Execution, EngineError> {
        tracing::info!(execution_id = %execution.id(), "execution cancelled");
        Ok(self.checkpoints.checkpoint(execution.cancel()?).await?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
