//! Execution aggregate: status state machine, append-only context, and step
//! result history.
//!
//! Transitions never mutate in place. Each one takes the current snapshot and
//! returns a `Transition` holding the next snapshot plus the domain events it
//! produced, so the engine decides when to persist and publish.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::StateError;
use crate::event::ExecutionEvent;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of an execution. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!("unknown execution status '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Step failures and results
// ---------------------------------------------------------------------------

/// Classification of a step failure, persisted alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Expression,
    Transport,
    Timeout,
    Provider,
    State,
    Dependency,
    Parallel,
    Unclassified,
}

/// A recorded step failure: what went wrong and how it was classified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub retriable: bool,
    /// Structured payload, e.g. the partial results of a failed parallel step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// One attempt of one step. A retried step accumulates several of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    /// 1-based attempt number.
    pub attempt: u32,
    pub success: bool,
    /// `Null` for failed attempts.
    #[serde(default)]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepFailure>,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
}

impl StepResult {
    pub fn success(
        step_id: impl Into<String>,
        attempt: u32,
        output: Value,
        started_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            attempt,
            success: true,
            output,
            error: None,
            duration_ms,
            started_at,
        }
    }

    pub fn failure(
        step_id: impl Into<String>,
        attempt: u32,
        error: StepFailure,
        started_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            attempt,
            success: false,
            output: Value::Null,
            error: Some(error),
            duration_ms,
            started_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Per-execution state consulted during variable resolution.
///
/// `steps` and `errors` are append-only: an entry, once written, is never
/// replaced. Writes happen only through `Execution` transitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    #[serde(default)]
    input: Value,
    #[serde(default)]
    steps: BTreeMap<String, Value>,
    #[serde(default)]
    errors: BTreeMap<String, StepFailure>,
}

impl ExecutionContext {
    pub fn new(input: Value) -> Self {
        Self {
            input,
            steps: BTreeMap::new(),
            errors: BTreeMap::new(),
        }
    }

    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn steps(&self) -> &BTreeMap<String, Value> {
        &self.steps
    }

    pub fn errors(&self) -> &BTreeMap<String, StepFailure> {
        &self.errors
    }

    pub fn step_output(&self, step_id: &str) -> Option<&Value> {
        self.steps.get(step_id)
    }

    pub fn step_error(&self, step_id: &str) -> Option<&StepFailure> {
        self.errors.get(step_id)
    }

    /// Whether the step already left a committed outcome (output or error).
    pub fn is_settled(&self, step_id: &str) -> bool {
        self.steps.contains_key(step_id) || self.errors.contains_key(step_id)
    }

    /// Build the object expressions are evaluated against.
    ///
    /// Shape: `{ input, steps: {id: output}, errors: {id: {kind, message}},
    /// execution: {id, workflow_id} }`.
    pub fn to_expression_context(&self, execution_id: Uuid, workflow_id: Uuid) -> Value {
        let errors: serde_json::Map<String, Value> = self
            .errors
            .iter()
            .map(|(id, failure)| {
                (
                    id.clone(),
                    json!({ "kind": failure.kind, "message": failure.message }),
                )
            })
            .collect();

        json!({
            "input": self.input,
            "steps": self.steps,
            "errors": errors,
            "execution": {
                "id": execution_id.to_string(),
                "workflow_id": workflow_id.to_string(),
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// The result of a transition: the next snapshot and the events it raised.
#[derive(Debug, Clone)]
pub struct Transition {
    pub execution: Execution,
    pub events: Vec<ExecutionEvent>,
}

/// One run of a published workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    id: Uuid,
    workflow_id: Uuid,
    workflow_version: u32,
    status: ExecutionStatus,
    context: ExecutionContext,
    #[serde(default)]
    step_results: Vec<StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failed_step_id: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
}

impl Execution {
    /// Create a Pending execution for the given definition version.
    pub fn new(workflow_id: Uuid, workflow_version: u32, input: Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            workflow_version,
            status: ExecutionStatus::Pending,
            context: ExecutionContext::new(input),
            step_results: Vec::new(),
            output: None,
            error: None,
            failed_step_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn workflow_id(&self) -> Uuid {
        self.workflow_id
    }

    pub fn workflow_version(&self) -> u32 {
        self.workflow_version
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn input(&self) -> &Value {
        self.context.input()
    }

    pub fn step_results(&self) -> &[StepResult] {
        &self.step_results
    }

    pub fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn failed_step_id(&self) -> Option<&str> {
        self.failed_step_id.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Number of attempts recorded so far for a step.
    pub fn attempts_for(&self, step_id: &str) -> u32 {
        self.step_results
            .iter()
            .filter(|r| r.step_id == step_id)
            .count() as u32
    }

    /// Output of the latest successful attempt of a step, if any.
    pub fn recorded_output(&self, step_id: &str) -> Option<&Value> {
        self.step_results
            .iter()
            .rev()
            .find(|r| r.step_id == step_id && r.success)
            .map(|r| &r.output)
    }

    /// Every committed step output keyed by step id.
    pub fn successful_outputs(&self) -> Value {
        Value::Object(
            self.context
                .steps
                .iter()
                .map(|(id, output)| (id.clone(), output.clone()))
                .collect(),
        )
    }

    fn require(&self, operation: &str, allowed: &[ExecutionStatus]) -> Result<(), StateError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(StateError::new(operation, self.status))
        }
    }

    // -- Transitions ---------------------------------------------------------

    /// Pending -> Running.
    pub fn start(&self) -> Result<Transition, StateError> {
        self.require("start", &[ExecutionStatus::Pending])?;
        let mut next = self.clone();
        next.status = ExecutionStatus::Running;
        next.started_at = Some(Utc::now());
        let events = vec![ExecutionEvent::ExecutionStarted {
            execution_id: next.id,
            workflow_id: next.workflow_id,
        }];
        Ok(Transition {
            execution: next,
            events,
        })
    }

    /// Append one attempt to the history. Running only.
    pub fn record_step_result(&self, result: StepResult) -> Result<Transition, StateError> {
        self.require("record step result", &[ExecutionStatus::Running])?;
        let event = if result.success {
            ExecutionEvent::StepCompleted {
                execution_id: self.id,
                step_id: result.step_id.clone(),
                attempt: result.attempt,
                duration_ms: result.duration_ms,
            }
        } else {
            ExecutionEvent::StepFailed {
                execution_id: self.id,
                step_id: result.step_id.clone(),
                attempt: result.attempt,
                error: result
                    .error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_default(),
            }
        };
        let mut next = self.clone();
        next.step_results.push(result);
        Ok(Transition {
            execution: next,
            events: vec![event],
        })
    }

    /// Write a successful output into `steps.<id>`. Running only, once per step.
    pub fn commit_output(&self, step_id: &str, output: Value) -> Result<Transition, StateError> {
        self.require("commit step output", &[ExecutionStatus::Running])?;
        if self.context.is_settled(step_id) {
            return Err(StateError::new(
                format!("commit output for '{step_id}'"),
                "already committed",
            ));
        }
        let mut next = self.clone();
        next.context.steps.insert(step_id.to_string(), output);
        Ok(Transition {
            execution: next,
            events: Vec::new(),
        })
    }

    /// Record a successful attempt and commit its output in one snapshot.
    pub fn commit_success(&self, result: StepResult) -> Result<Transition, StateError> {
        if !result.success {
            return Err(StateError::new(
                format!("commit success for '{}'", result.step_id),
                "attempt failed",
            ));
        }
        let step_id = result.step_id.clone();
        let output = result.output.clone();
        let recorded = self.record_step_result(result)?;
        let committed = recorded.execution.commit_output(&step_id, output)?;
        Ok(Transition {
            execution: committed.execution,
            events: recorded.events,
        })
    }

    /// Write a tolerated failure into `errors.<id>`. Running only, once per step.
    pub fn commit_error(
        &self,
        step_id: &str,
        failure: StepFailure,
    ) -> Result<Transition, StateError> {
        self.require("commit step error", &[ExecutionStatus::Running])?;
        if self.context.is_settled(step_id) {
            return Err(StateError::new(
                format!("commit error for '{step_id}'"),
                "already committed",
            ));
        }
        let mut next = self.clone();
        next.context.errors.insert(step_id.to_string(), failure);
        Ok(Transition {
            execution: next,
            events: Vec::new(),
        })
    }

    /// Running -> Completed.
    pub fn complete(&self, output: Value) -> Result<Transition, StateError> {
        self.require("complete", &[ExecutionStatus::Running])?;
        let mut next = self.clone();
        next.status = ExecutionStatus::Completed;
        next.output = Some(output);
        next.completed_at = Some(Utc::now());
        let events = vec![ExecutionEvent::ExecutionCompleted {
            execution_id: next.id,
            workflow_id: next.workflow_id,
        }];
        Ok(Transition {
            execution: next,
            events,
        })
    }

    /// Pending or Running -> Failed.
    pub fn fail(
        &self,
        message: impl Into<String>,
        step_id: Option<&str>,
    ) -> Result<Transition, StateError> {
        self.require("fail", &[ExecutionStatus::Pending, ExecutionStatus::Running])?;
        let message = message.into();
        let mut next = self.clone();
        next.status = ExecutionStatus::Failed;
        next.error = Some(message.clone());
        next.failed_step_id = step_id.map(str::to_string);
        next.completed_at = Some(Utc::now());
        let events = vec![ExecutionEvent::ExecutionFailed {
            execution_id: next.id,
            workflow_id: next.workflow_id,
            step_id: next.failed_step_id.clone(),
            error: message,
        }];
        Ok(Transition {
            execution: next,
            events,
        })
    }

    /// Running -> Cancelled.
    pub fn cancel(&self) -> Result<Transition, StateError> {
        self.require("cancel", &[ExecutionStatus::Running])?;
        let mut next = self.clone();
        next.status = ExecutionStatus::Cancelled;
        next.completed_at = Some(Utc::now());
        let events = vec![ExecutionEvent::ExecutionCancelled {
            execution_id: next.id,
            workflow_id: next.workflow_id,
        }];
        Ok(Transition {
            execution: next,
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running() -> Execution {
        Execution::new(Uuid::now_v7(), 1, json!({"order_id": 7}))
            .start()
            .unwrap()
            .execution
    }

    fn failure(message: &str) -> StepFailure {
        StepFailure {
            kind: ErrorKind::Transport,
            message: message.to_string(),
            status_code: None,
            retriable: true,
            details: None,
        }
    }

    // -----------------------------------------------------------------------
    // Status transitions
    // -----------------------------------------------------------------------

    #[test]
    fn test_start_emits_started_event() {
        let exec = Execution::new(Uuid::now_v7(), 3, json!({}));
        let t = exec.start().unwrap();
        assert_eq!(t.execution.status(), ExecutionStatus::Running);
        assert!(t.execution.started_at().is_some());
        assert!(matches!(
            t.events.as_slice(),
            [ExecutionEvent::ExecutionStarted { .. }]
        ));
        // The source snapshot is untouched.
        assert_eq!(exec.status(), ExecutionStatus::Pending);
    }

    #[test]
    fn test_pending_can_fail_but_not_complete_or_cancel() {
        let exec = Execution::new(Uuid::now_v7(), 1, json!({}));
        assert!(exec.complete(json!({})).is_err());
        assert!(exec.cancel().is_err());
        assert!(exec.record_step_result(StepResult::success("step_a", 1, json!(1), Utc::now(), 1)).is_err());
        let t = exec.fail("definition vanished", None).unwrap();
        assert_eq!(t.execution.status(), ExecutionStatus::Failed);
        assert_eq!(t.execution.failed_step_id(), None);
    }

    #[test]
    fn test_terminal_states_reject_every_transition() {
        let completed = running().complete(json!({})).unwrap().execution;
        let failed = running().fail("boom", Some("step_b")).unwrap().execution;
        let cancelled = running().cancel().unwrap().execution;

        for exec in [completed, failed, cancelled] {
            assert!(exec.status().is_terminal());
            assert!(exec.start().is_err());
            assert!(exec.complete(json!({})).is_err());
            assert!(exec.fail("again", None).is_err());
            assert!(exec.cancel().is_err());
            assert!(exec.commit_output("step_x", json!(1)).is_err());
            assert!(exec
                .record_step_result(StepResult::success("step_x", 1, json!(1), Utc::now(), 0))
                .is_err());
        }
    }

    #[test]
    fn test_fail_records_message_and_step() {
        let t = running().fail("upstream returned 500", Some("step_b")).unwrap();
        assert_eq!(t.execution.error(), Some("upstream returned 500"));
        assert_eq!(t.execution.failed_step_id(), Some("step_b"));
        match &t.events[0] {
            ExecutionEvent::ExecutionFailed { step_id, error, .. } => {
                assert_eq!(step_id.as_deref(), Some("step_b"));
                assert_eq!(error, "upstream returned 500");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    // -----------------------------------------------------------------------
    // History and context
    // -----------------------------------------------------------------------

    #[test]
    fn test_step_results_are_appended_per_attempt() {
        let mut exec = running();
        for attempt in 1..=2 {
            exec = exec
                .record_step_result(StepResult::failure(
                    "step_a",
                    attempt,
                    failure("reset"),
                    Utc::now(),
                    5,
                ))
                .unwrap()
                .execution;
        }
        exec = exec
            .record_step_result(StepResult::success("step_a", 3, json!({"ok": true}), Utc::now(), 5))
            .unwrap()
            .execution;

        assert_eq!(exec.step_results().len(), 3);
        assert_eq!(exec.attempts_for("step_a"), 3);
        let attempts: Vec<u32> = exec.step_results().iter().map(|r| r.attempt).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[test]
    fn test_commit_success_records_and_commits_together() {
        let t = running()
            .commit_success(StepResult::success("step_a", 1, json!({"n": 1}), Utc::now(), 4))
            .unwrap();
        assert_eq!(t.execution.step_results().len(), 1);
        assert_eq!(t.execution.context().step_output("step_a"), Some(&json!({"n": 1})));
        assert!(matches!(
            t.events.as_slice(),
            [ExecutionEvent::StepCompleted { attempt: 1, .. }]
        ));

        // Settled steps reject a second success; failed attempts are refused.
        let exec = t.execution;
        assert!(exec
            .commit_success(StepResult::success("step_a", 2, json!(2), Utc::now(), 1))
            .is_err());
        assert!(exec
            .commit_success(StepResult::failure("step_b", 1, failure("x"), Utc::now(), 1))
            .is_err());
        assert_eq!(exec.step_results().len(), 1);
    }

    #[test]
    fn test_recorded_output_finds_latest_success() {
        let exec = running()
            .record_step_result(StepResult::failure("step_a", 1, failure("reset"), Utc::now(), 2))
            .unwrap()
            .execution;
        assert_eq!(exec.recorded_output("step_a"), None);

        let exec = exec
            .record_step_result(StepResult::success("step_a", 2, json!({"ok": true}), Utc::now(), 2))
            .unwrap()
            .execution;
        assert_eq!(exec.recorded_output("step_a"), Some(&json!({"ok": true})));
        assert!(!exec.context().is_settled("step_a"));
    }

    #[test]
    fn test_context_namespaces_are_append_only() {
        let exec = running()
            .commit_output("step_a", json!({"v": 1}))
            .unwrap()
            .execution;
        assert!(exec.commit_output("step_a", json!({"v": 2})).is_err());
        assert!(exec.commit_error("step_a", failure("late")).is_err());

        let exec = exec.commit_error("step_b", failure("down")).unwrap().execution;
        assert!(exec.context().step_output("step_b").is_none());
        assert_eq!(exec.context().step_error("step_b").unwrap().message, "down");
        assert_eq!(exec.successful_outputs(), json!({"step_a": {"v": 1}}));
    }

    #[test]
    fn test_expression_context_shape() {
        let exec = running()
            .commit_output("step_a", json!({"status": 200}))
            .unwrap()
            .execution
            .commit_error("step_b", failure("down"))
            .unwrap()
            .execution;
        let ctx = exec
            .context()
            .to_expression_context(exec.id(), exec.workflow_id());
        assert_eq!(ctx["input"]["order_id"], 7);
        assert_eq!(ctx["steps"]["step_a"]["status"], 200);
        assert_eq!(ctx["errors"]["step_b"]["message"], "down");
        assert_eq!(ctx["errors"]["step_b"]["kind"], "transport");
        assert_eq!(ctx["execution"]["id"], exec.id().to_string());
    }

    #[test]
    fn test_snapshot_roundtrip_preserves_state() {
        let exec = running()
            .record_step_result(StepResult::success("step_a", 1, json!({"n": 1}), Utc::now(), 12))
            .unwrap()
            .execution
            .commit_output("step_a", json!({"n": 1}))
            .unwrap()
            .execution
            .record_step_result(StepResult::failure("step_b", 1, failure("x"), Utc::now(), 3))
            .unwrap()
            .execution
            .commit_error("step_b", failure("x"))
            .unwrap()
            .execution
            .fail("max retries exceeded", Some("step_c"))
            .unwrap()
            .execution;

        let json = serde_json::to_string(&exec).unwrap();
        let restored: Execution = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, exec);
        assert_eq!(restored.status(), exec.status());
        assert_eq!(restored.context(), exec.context());
        assert_eq!(restored.step_results(), exec.step_results());
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<ExecutionStatus>().unwrap(), status);
        }
        assert!("paused".parse::<ExecutionStatus>().is_err());
    }
}
