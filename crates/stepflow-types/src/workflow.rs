//! Workflow definition types and the authoring lifecycle.
//!
//! A `WorkflowDefinition` is authored as a Draft, frozen by `publish()`, and
//! superseded (never edited) by `create_new_version()`. Steps carry a closed
//! set of per-type configurations; the JSON/YAML shape is
//! `{id, name, type, config: {...}, depends_on?, timeout_ms?, retry?}`.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::error::StateError;

/// Upper bound for `RetryConfig::max_attempts`.
pub const MAX_ATTEMPTS_LIMIT: u32 = 5;

/// Upper bound for `ErrorHandling::max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 5;

/// HTTP methods accepted by `http` steps.
pub const HTTP_METHODS: [&str; 5] = ["GET", "POST", "PUT", "DELETE", "PATCH"];

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while authoring or publishing a definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error("workflow validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("step '{0}' not found")]
    StepNotFound(String),

    #[error("step '{0}' already exists")]
    DuplicateStep(String),
}

// ---------------------------------------------------------------------------
// Lifecycle status
// ---------------------------------------------------------------------------

/// Lifecycle of a definition. Only `Draft` definitions are mutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

impl DefinitionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DefinitionStatus::Draft => "draft",
            DefinitionStatus::Published => "published",
            DefinitionStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for DefinitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Error handling policy
// ---------------------------------------------------------------------------

/// What the engine does after a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// Fail the execution and stop.
    #[default]
    Fail,
    /// Record the error under `errors.<id>` and move on.
    Continue,
    /// Re-run the step under the retry policy.
    Retry,
}

/// Workflow-wide error handling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorHandling {
    #[serde(default)]
    pub on_error: OnError,
    /// Retries after the first attempt when `on_error = retry` (0-5).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed delay between workflow-level retries.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for ErrorHandling {
    fn default() -> Self {
        Self {
            on_error: OnError::Fail,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Retry configuration
// ---------------------------------------------------------------------------

/// Delay growth between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    #[default]
    Fixed,
    Exponential,
    Linear,
}

/// Per-step retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first (1-5, default 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: Backoff,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: Backoff::Fixed,
            initial_delay_ms: default_initial_delay_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Step types and configuration
// ---------------------------------------------------------------------------

/// The kind of step. Each kind has exactly one `StepConfig` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Http,
    Agent,
    Transform,
    Conditional,
    Parallel,
    Delay,
    Notification,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Http => "http",
            StepType::Agent => "agent",
            StepType::Transform => "transform",
            StepType::Conditional => "conditional",
            StepType::Parallel => "parallel",
            StepType::Delay => "delay",
            StepType::Notification => "notification",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    pub url: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_id: String,
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformConfig {
    pub expression: String,
    #[serde(default = "default_output_key")]
    pub output_key: String,
}

fn default_output_key() -> String {
    "result".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalConfig {
    pub condition: String,
    pub branches: Branches,
}

/// Step ids a conditional points at for each outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branches {
    #[serde(rename = "true")]
    pub on_true: String,
    #[serde(rename = "false")]
    pub on_false: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelConfig {
    pub steps: Vec<StepDefinition>,
    #[serde(default = "default_wait_for_all")]
    pub wait_for_all: bool,
}

fn default_wait_for_all() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayConfig {
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub channel: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<String>,
}

/// Per-type step configuration.
///
/// Serialized without a tag: the step's `type` field carries the kind, and
/// `from_value` picks the variant from it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StepConfig {
    Http(HttpConfig),
    Agent(AgentConfig),
    Transform(TransformConfig),
    Conditional(ConditionalConfig),
    Parallel(ParallelConfig),
    Delay(DelayConfig),
    Notification(NotificationConfig),
}

impl StepConfig {
    pub fn step_type(&self) -> StepType {
        match self {
            StepConfig::Http(_) => StepType::Http,
            StepConfig::Agent(_) => StepType::Agent,
            StepConfig::Transform(_) => StepType::Transform,
            StepConfig::Conditional(_) => StepType::Conditional,
            StepConfig::Parallel(_) => StepType::Parallel,
            StepConfig::Delay(_) => StepType::Delay,
            StepConfig::Notification(_) => StepType::Notification,
        }
    }

    /// Decode the config object of a step of the given type.
    pub fn from_value(step_type: StepType, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match step_type {
            StepType::Http => StepConfig::Http(serde_json::from_value(value)?),
            StepType::Agent => StepConfig::Agent(serde_json::from_value(value)?),
            StepType::Transform => StepConfig::Transform(serde_json::from_value(value)?),
            StepType::Conditional => StepConfig::Conditional(serde_json::from_value(value)?),
            StepType::Parallel => StepConfig::Parallel(serde_json::from_value(value)?),
            StepType::Delay => StepConfig::Delay(serde_json::from_value(value)?),
            StepType::Notification => StepConfig::Notification(serde_json::from_value(value)?),
        })
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

// ---------------------------------------------------------------------------
// Step definition
// ---------------------------------------------------------------------------

/// A single step of a workflow.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawStep")]
pub struct StepDefinition {
    /// `step_<alnum>`, unique within the definition.
    pub id: String,
    pub name: String,
    pub config: StepConfig,
    /// Ids of earlier steps whose successful output this step needs.
    pub depends_on: Vec<String>,
    /// Overrides the engine's default step timeout.
    pub timeout_ms: Option<u64>,
    pub retry: Option<RetryConfig>,
}

impl StepDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, config: StepConfig) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            config,
            depends_on: Vec::new(),
            timeout_ms: None,
            retry: None,
        }
    }

    pub fn with_depends_on(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn step_type(&self) -> StepType {
        self.config.step_type()
    }
}

/// Wire shape of a step before its config is decoded by type.
#[derive(Deserialize)]
struct RawStep {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    step_type: StepType,
    #[serde(default = "empty_object")]
    config: Value,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default, alias = "timeout")]
    timeout_ms: Option<u64>,
    #[serde(default)]
    retry: Option<RetryConfig>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl TryFrom<RawStep> for StepDefinition {
    type Error = String;

    fn try_from(raw: RawStep) -> Result<Self, Self::Error> {
        let config = StepConfig::from_value(raw.step_type, raw.config)
            .map_err(|e| format!("step '{}': invalid {} config: {e}", raw.id, raw.step_type))?;
        Ok(Self {
            id: raw.id,
            name: raw.name,
            config,
            depends_on: raw.depends_on,
            timeout_ms: raw.timeout_ms,
            retry: raw.retry,
        })
    }
}

impl Serialize for StepDefinition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct StepRepr<'a> {
            id: &'a str,
            name: &'a str,
            #[serde(rename = "type")]
            step_type: StepType,
            config: &'a StepConfig,
            #[serde(skip_serializing_if = "<[String]>::is_empty")]
            depends_on: &'a [String],
            #[serde(skip_serializing_if = "Option::is_none")]
            timeout_ms: Option<u64>,
            #[serde(skip_serializing_if = "Option::is_none")]
            retry: Option<RetryConfig>,
        }

        StepRepr {
            id: &self.id,
            name: &self.name,
            step_type: self.step_type(),
            config: &self.config,
            depends_on: &self.depends_on,
            timeout_ms: self.timeout_ms,
            retry: self.retry,
        }
        .serialize(serializer)
    }
}

// ---------------------------------------------------------------------------
// Workflow definition
// ---------------------------------------------------------------------------

/// A versioned, ordered description of steps plus an error policy.
///
/// Fields are read through accessors; every mutation goes through a method
/// that refuses to run unless the definition is still a Draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default = "Uuid::now_v7")]
    id: Uuid,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    status: DefinitionStatus,
    #[serde(default)]
    steps: Vec<StepDefinition>,
    #[serde(default)]
    error_handling: ErrorHandling,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    updated_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

impl WorkflowDefinition {
    /// Start a new Draft at version 1.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            description: None,
            version: 1,
            status: DefinitionStatus::Draft,
            steps: Vec::new(),
            error_handling: ErrorHandling::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn status(&self) -> DefinitionStatus {
        self.status
    }

    pub fn is_published(&self) -> bool {
        self.status == DefinitionStatus::Published
    }

    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    pub fn step(&self, step_id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn error_handling(&self) -> ErrorHandling {
        self.error_handling
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn ensure_draft(&self, operation: &str) -> Result<(), StateError> {
        if self.status == DefinitionStatus::Draft {
            Ok(())
        } else {
            Err(StateError::new(operation, self.status))
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    // -- Draft-only mutations ------------------------------------------------

    pub fn add_step(&mut self, step: StepDefinition) -> Result<(), DefinitionError> {
        self.ensure_draft("add step")?;
        if self.step(&step.id).is_some() {
            return Err(DefinitionError::DuplicateStep(step.id));
        }
        self.steps.push(step);
        self.touch();
        Ok(())
    }

    pub fn remove_step(&mut self, step_id: &str) -> Result<StepDefinition, DefinitionError> {
        self.ensure_draft("remove step")?;
        let index = self
            .steps
            .iter()
            .position(|s| s.id == step_id)
            .ok_or_else(|| DefinitionError::StepNotFound(step_id.to_string()))?;
        let removed = self.steps.remove(index);
        self.touch();
        Ok(removed)
    }

    /// Replace the step with id `step_id`, keeping its position.
    pub fn update_step(
        &mut self,
        step_id: &str,
        step: StepDefinition,
    ) -> Result<(), DefinitionError> {
        self.ensure_draft("update step")?;
        if step.id != step_id && self.step(&step.id).is_some() {
            return Err(DefinitionError::DuplicateStep(step.id));
        }
        let slot = self
            .steps
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or_else(|| DefinitionError::StepNotFound(step_id.to_string()))?;
        *slot = step;
        self.touch();
        Ok(())
    }

    pub fn set_description(
        &mut self,
        description: Option<String>,
    ) -> Result<(), DefinitionError> {
        self.ensure_draft("set description")?;
        self.description = description;
        self.touch();
        Ok(())
    }

    pub fn set_error_handling(&mut self, policy: ErrorHandling) -> Result<(), DefinitionError> {
        self.ensure_draft("set error handling")?;
        self.error_handling = policy;
        self.touch();
        Ok(())
    }

    // -- Lifecycle -----------------------------------------------------------

    /// Validate and freeze the definition.
    pub fn publish(&mut self) -> Result<(), DefinitionError> {
        self.ensure_draft("publish")?;
        self.validate()?;
        self.status = DefinitionStatus::Published;
        self.touch();
        Ok(())
    }

    /// Retire a published definition so it can no longer be executed.
    pub fn archive(&mut self) -> Result<(), StateError> {
        if self.status != DefinitionStatus::Published {
            return Err(StateError::new("archive", self.status));
        }
        self.status = DefinitionStatus::Archived;
        self.touch();
        Ok(())
    }

    /// Clone into a fresh Draft at `version + 1`; `self` is left untouched.
    pub fn create_new_version(&self) -> Result<WorkflowDefinition, StateError> {
        if self.status == DefinitionStatus::Draft {
            return Err(StateError::new("create new version", self.status));
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::now_v7(),
            name: self.name.clone(),
            description: self.description.clone(),
            version: self.version + 1,
            status: DefinitionStatus::Draft,
            steps: self.steps.clone(),
            error_handling: self.error_handling,
            created_at: now,
            updated_at: now,
        })
    }

    /// Check every structural invariant, collecting all problems found.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let mut issues = Vec::new();

        if self.name.trim().is_empty() {
            issues.push("workflow name must not be empty".to_string());
        }
        if self.error_handling.max_retries > MAX_RETRIES_LIMIT {
            issues.push(format!(
                "error_handling.max_retries must be at most {MAX_RETRIES_LIMIT}, got {}",
                self.error_handling.max_retries
            ));
        }

        validate_step_list(&self.steps, "workflow", &HashSet::new(), false, &mut issues);

        if issues.is_empty() {
            Ok(())
        } else {
            Err(DefinitionError::Validation(issues))
        }
    }
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

/// `step_` followed by at least one ASCII alphanumeric or underscore.
pub fn is_valid_step_id(id: &str) -> bool {
    id.strip_prefix("step_").is_some_and(|rest| {
        !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

fn validate_step_list(
    steps: &[StepDefinition],
    scope: &str,
    reserved: &HashSet<&str>,
    nested: bool,
    issues: &mut Vec<String>,
) {
    if steps.is_empty() {
        issues.push(format!("{scope} must contain at least one step"));
        return;
    }

    let all_ids: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
    let mut seen: HashSet<&str> = HashSet::new();

    for step in steps {
        let id = step.id.as_str();

        if !is_valid_step_id(id) {
            issues.push(format!("step id '{id}' must match step_<alnum>"));
        }
        if !seen.insert(id) {
            issues.push(format!("duplicate step id '{id}'"));
        }
        if reserved.contains(id) {
            issues.push(format!("step id '{id}' in {scope} collides with a top-level step"));
        }

        if nested && !step.depends_on.is_empty() {
            issues.push(format!("sub-step '{id}' in {scope} cannot declare depends_on"));
        }
        for dep in &step.depends_on {
            if dep == id {
                issues.push(format!("step '{id}' depends on itself"));
            } else if !all_ids.contains(dep.as_str()) {
                issues.push(format!("step '{id}' depends on unknown step '{dep}'"));
            } else if !seen.contains(dep.as_str()) {
                issues.push(format!("step '{id}' depends on later step '{dep}'"));
            }
        }

        if step.timeout_ms == Some(0) {
            issues.push(format!("step '{id}' timeout_ms must be positive"));
        }
        if let Some(retry) = &step.retry {
            if !(1..=MAX_ATTEMPTS_LIMIT).contains(&retry.max_attempts) {
                issues.push(format!(
                    "step '{id}' retry.max_attempts must be between 1 and {MAX_ATTEMPTS_LIMIT}, got {}",
                    retry.max_attempts
                ));
            }
        }

        validate_config(step, scope, &all_ids, reserved, nested, issues);
    }
}

fn require(issues: &mut Vec<String>, step: &StepDefinition, present: bool, key: &str) {
    if !present {
        issues.push(format!(
            "step '{}' ({}) requires '{key}'",
            step.id,
            step.step_type()
        ));
    }
}

fn validate_config(
    step: &StepDefinition,
    scope: &str,
    siblings: &HashSet<&str>,
    reserved: &HashSet<&str>,
    nested: bool,
    issues: &mut Vec<String>,
) {
    let id = step.id.as_str();

    match &step.config {
        StepConfig::Http(c) => {
            require(issues, step, !c.url.trim().is_empty(), "url");
            if !HTTP_METHODS.contains(&c.method.to_ascii_uppercase().as_str()) {
                issues.push(format!(
                    "step '{id}' has unsupported http method '{}'",
                    c.method
                ));
            }
        }
        StepConfig::Agent(c) => {
            require(issues, step, !c.agent_id.trim().is_empty(), "agent_id");
            require(issues, step, !c.input.is_null(), "input");
        }
        StepConfig::Transform(c) => {
            require(issues, step, !c.expression.trim().is_empty(), "expression");
            require(issues, step, !c.output_key.trim().is_empty(), "output_key");
        }
        StepConfig::Conditional(c) => {
            require(issues, step, !c.condition.trim().is_empty(), "condition");
            for target in [&c.branches.on_true, &c.branches.on_false] {
                if target == id {
                    issues.push(format!("conditional step '{id}' cannot target itself"));
                } else if !siblings.contains(target.as_str()) {
                    issues.push(format!(
                        "conditional step '{id}' targets unknown step '{target}'"
                    ));
                }
            }
        }
        StepConfig::Parallel(c) => {
            if nested {
                issues.push(format!("parallel step '{id}' cannot be nested in {scope}"));
                return;
            }
            let mut outer: HashSet<&str> = reserved.clone();
            outer.extend(siblings.iter().copied());
            validate_step_list(
                &c.steps,
                &format!("parallel step '{id}'"),
                &outer,
                true,
                issues,
            );
        }
        StepConfig::Delay(c) => {
            if c.duration_ms == 0 {
                issues.push(format!("delay step '{id}' duration_ms must be positive"));
            }
        }
        StepConfig::Notification(c) => {
            require(issues, step, !c.channel.trim().is_empty(), "channel");
            require(issues, step, !c.message.trim().is_empty(), "message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn http_step(id: &str) -> StepDefinition {
        StepDefinition::new(
            id,
            format!("Call {id}"),
            StepConfig::Http(HttpConfig {
                url: "https://example.com/api".to_string(),
                method: "GET".to_string(),
                headers: BTreeMap::new(),
                body: None,
            }),
        )
    }

    fn conditional_step(id: &str, on_true: &str, on_false: &str) -> StepDefinition {
        StepDefinition::new(
            id,
            "Branch",
            StepConfig::Conditional(ConditionalConfig {
                condition: "steps.step_a.status == 200".to_string(),
                branches: Branches {
                    on_true: on_true.to_string(),
                    on_false: on_false.to_string(),
                },
            }),
        )
    }

    fn draft_with(steps: Vec<StepDefinition>) -> WorkflowDefinition {
        let mut def = WorkflowDefinition::new("test-flow");
        for step in steps {
            def.add_step(step).unwrap();
        }
        def
    }

    fn validation_issues(err: DefinitionError) -> Vec<String> {
        match err {
            DefinitionError::Validation(issues) => issues,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    #[test]
    fn test_new_definition_is_draft_v1() {
        let def = WorkflowDefinition::new("flow");
        assert_eq!(def.status(), DefinitionStatus::Draft);
        assert_eq!(def.version(), 1);
        assert!(def.steps().is_empty());
    }

    #[test]
    fn test_publish_valid_definition() {
        let mut def = draft_with(vec![http_step("step_a"), http_step("step_b")]);
        def.publish().unwrap();
        assert!(def.is_published());
    }

    #[test]
    fn test_published_definition_rejects_mutation() {
        let mut def = draft_with(vec![http_step("step_a")]);
        def.publish().unwrap();

        let add = def.add_step(http_step("step_b")).unwrap_err();
        assert!(matches!(add, DefinitionError::State(_)));

        let remove = def.remove_step("step_a").unwrap_err();
        assert!(matches!(remove, DefinitionError::State(_)));

        let update = def.update_step("step_a", http_step("step_a")).unwrap_err();
        assert!(matches!(update, DefinitionError::State(_)));

        assert!(matches!(
            def.set_error_handling(ErrorHandling::default()),
            Err(DefinitionError::State(_))
        ));
        assert_eq!(def.steps().len(), 1);
    }

    #[test]
    fn test_publish_twice_is_state_error() {
        let mut def = draft_with(vec![http_step("step_a")]);
        def.publish().unwrap();
        assert!(matches!(def.publish(), Err(DefinitionError::State(_))));
    }

    #[test]
    fn test_create_new_version_leaves_original_untouched() {
        let mut def = draft_with(vec![http_step("step_a")]);
        def.publish().unwrap();
        let original = def.clone();

        let mut next = def.create_new_version().unwrap();
        assert_eq!(next.version(), 2);
        assert_eq!(next.status(), DefinitionStatus::Draft);
        assert_eq!(next.name(), def.name());
        assert_ne!(next.id(), def.id());

        next.add_step(http_step("step_b")).unwrap();
        assert_eq!(def, original);
        assert_eq!(next.steps().len(), 2);
    }

    #[test]
    fn test_create_new_version_from_draft_is_rejected() {
        let def = WorkflowDefinition::new("flow");
        assert!(def.create_new_version().is_err());
    }

    #[test]
    fn test_archive_only_from_published() {
        let mut def = draft_with(vec![http_step("step_a")]);
        assert!(def.archive().is_err());
        def.publish().unwrap();
        def.archive().unwrap();
        assert_eq!(def.status(), DefinitionStatus::Archived);
        assert!(def.archive().is_err());
    }

    #[test]
    fn test_draft_mutations() {
        let mut def = draft_with(vec![http_step("step_a"), http_step("step_b")]);
        assert!(matches!(
            def.add_step(http_step("step_a")),
            Err(DefinitionError::DuplicateStep(_))
        ));

        def.update_step("step_a", http_step("step_c")).unwrap();
        assert_eq!(def.steps()[0].id, "step_c");

        let removed = def.remove_step("step_b").unwrap();
        assert_eq!(removed.id, "step_b");
        assert!(matches!(
            def.remove_step("step_b"),
            Err(DefinitionError::StepNotFound(_))
        ));
    }

    // -----------------------------------------------------------------------
    // Validation boundaries
    // -----------------------------------------------------------------------

    #[test]
    fn test_publish_rejects_empty_definition() {
        let mut def = WorkflowDefinition::new("empty");
        let issues = validation_issues(def.publish().unwrap_err());
        assert!(issues[0].contains("at least one step"));
        assert_eq!(def.status(), DefinitionStatus::Draft);
    }

    #[test]
    fn test_publish_rejects_unknown_branch_target() {
        let mut def = draft_with(vec![
            http_step("step_a"),
            conditional_step("step_b", "step_a", "step_missing"),
        ]);
        let issues = validation_issues(def.publish().unwrap_err());
        assert!(issues.iter().any(|i| i.contains("unknown step 'step_missing'")));
    }

    #[test]
    fn test_publish_rejects_bad_dependencies() {
        let mut def = draft_with(vec![
            http_step("step_a").with_depends_on(vec!["step_b".to_string()]),
            http_step("step_b").with_depends_on(vec!["step_zzz".to_string()]),
        ]);
        let issues = validation_issues(def.publish().unwrap_err());
        assert!(issues.iter().any(|i| i.contains("later step 'step_b'")));
        assert!(issues.iter().any(|i| i.contains("unknown step 'step_zzz'")));
    }

    #[test]
    fn test_publish_rejects_bad_ids_and_config() {
        let mut bad_http = http_step("fetch-data");
        if let StepConfig::Http(c) = &mut bad_http.config {
            c.method = "TRACE".to_string();
            c.url = " ".to_string();
        }
        let mut def = draft_with(vec![bad_http]);
        let issues = validation_issues(def.publish().unwrap_err());
        assert!(issues.iter().any(|i| i.contains("must match step_<alnum>")));
        assert!(issues.iter().any(|i| i.contains("requires 'url'")));
        assert!(issues.iter().any(|i| i.contains("unsupported http method")));
    }

    #[test]
    fn test_publish_rejects_retry_bounds() {
        let mut def = draft_with(vec![http_step("step_a").with_retry(RetryConfig {
            max_attempts: 6,
            ..RetryConfig::default()
        })]);
        def.set_error_handling(ErrorHandling {
            on_error: OnError::Retry,
            max_retries: 9,
            retry_delay_ms: 10,
        })
        .unwrap();
        let issues = validation_issues(def.publish().unwrap_err());
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn test_publish_rejects_nested_parallel() {
        let inner = StepDefinition::new(
            "step_inner",
            "Inner",
            StepConfig::Parallel(ParallelConfig {
                steps: vec![http_step("step_x")],
                wait_for_all: true,
            }),
        );
        let outer = StepDefinition::new(
            "step_outer",
            "Outer",
            StepConfig::Parallel(ParallelConfig {
                steps: vec![inner, http_step("step_outer2")],
                wait_for_all: true,
            }),
        );
        let mut def = draft_with(vec![outer]);
        let issues = validation_issues(def.publish().unwrap_err());
        assert!(issues.iter().any(|i| i.contains("cannot be nested")));
    }

    #[test]
    fn test_parallel_sub_step_ids_cannot_shadow_top_level() {
        let fan_out = StepDefinition::new(
            "step_fan",
            "Fan out",
            StepConfig::Parallel(ParallelConfig {
                steps: vec![http_step("step_a"), http_step("step_p1")],
                wait_for_all: true,
            }),
        );
        let mut def = draft_with(vec![http_step("step_a"), fan_out]);
        let issues = validation_issues(def.publish().unwrap_err());
        assert!(issues.iter().any(|i| i.contains("collides with a top-level step")));
    }

    #[test]
    fn test_step_id_format() {
        assert!(is_valid_step_id("step_1"));
        assert!(is_valid_step_id("step_fetch_user"));
        assert!(!is_valid_step_id("step_"));
        assert!(!is_valid_step_id("fetch"));
        assert!(!is_valid_step_id("step_a-b"));
    }

    // -----------------------------------------------------------------------
    // Serialization
    // -----------------------------------------------------------------------

    #[test]
    fn test_deserialize_schema_shape() {
        let raw = json!({
            "name": "order-sync",
            "version": 1,
            "steps": [
                {
                    "id": "step_fetch",
                    "name": "Fetch order",
                    "type": "http",
                    "config": { "url": "https://shop.test/orders/{{ input.order_id }}", "method": "GET" },
                    "timeout": 5000,
                    "retry": { "max_attempts": 3, "backoff": "exponential", "initial_delay_ms": 200 }
                },
                {
                    "id": "step_total",
                    "name": "Total",
                    "type": "transform",
                    "config": { "expression": "steps.step_fetch.body.total * 2" },
                    "depends_on": ["step_fetch"]
                },
                {
                    "id": "step_wait",
                    "name": "Wait",
                    "type": "delay",
                    "config": { "duration_ms": 100 }
                }
            ],
            "error_handling": { "on_error": "continue", "max_retries": 2, "retry_delay_ms": 500 }
        });

        let mut def: WorkflowDefinition = serde_json::from_value(raw).unwrap();
        assert_eq!(def.status(), DefinitionStatus::Draft);
        assert_eq!(def.steps().len(), 3);
        assert_eq!(def.steps()[0].timeout_ms, Some(5000));
        assert_eq!(def.steps()[0].retry.unwrap().backoff, Backoff::Exponential);
        match &def.steps()[1].config {
            StepConfig::Transform(t) => assert_eq!(t.output_key, "result"),
            other => panic!("expected transform, got {other:?}"),
        }
        assert_eq!(def.error_handling().on_error, OnError::Continue);
        def.publish().unwrap();
    }

    #[test]
    fn test_step_missing_required_key_fails_to_decode() {
        let raw = json!({
            "id": "step_a",
            "name": "A",
            "type": "http",
            "config": { "method": "GET" }
        });
        let err = serde_json::from_value::<StepDefinition>(raw).unwrap_err();
        assert!(err.to_string().contains("url"));
    }

    #[test]
    fn test_step_serializes_type_and_config() {
        let value = serde_json::to_value(http_step("step_a")).unwrap();
        assert_eq!(value["type"], "http");
        assert_eq!(value["config"]["method"], "GET");
        assert!(value.get("depends_on").is_none());
    }

    #[test]
    fn test_definition_json_roundtrip() {
        let mut def = draft_with(vec![
            http_step("step_a"),
            conditional_step("step_b", "step_a", "step_c"),
            StepDefinition::new(
                "step_c",
                "Fan out",
                StepConfig::Parallel(ParallelConfig {
                    steps: vec![http_step("step_p1"), http_step("step_p2")],
                    wait_for_all: false,
                }),
            ),
        ]);
        def.publish().unwrap();

        let json = serde_json::to_string(&def).unwrap();
        let parsed: WorkflowDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, def);
    }
}
