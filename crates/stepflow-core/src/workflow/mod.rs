//! Workflow engine core: definitions, resolution, step dispatch, retries and
//! the execution loop.
//!
//! - `definition` -- YAML/JSON parsing and workflow files
//! - `expression` -- JEXL evaluator for templates, transforms and conditions
//! - `resolver` -- `{{ }}` / `${{ }}` expansion of step config
//! - `registry` -- executor contract, collaborator ports, step type registry
//! - `executors` -- the built-in executor for each step type
//! - `retry` -- backoff computation and retry decisions
//! - `checkpoint` -- snapshot persistence plus event publication
//! - `engine` -- the sequential execution loop and its public API
//! - `memory` -- in-memory repositories

pub mod checkpoint;
pub mod definition;
pub mod engine;
pub mod executors;
pub mod expression;
pub mod memory;
pub mod registry;
pub mod resolver;
pub mod retry;

pub use engine::{EngineError, ExecutionSummary, WorkflowEngine};
pub use registry::{ExecutorPorts, StepError, StepRegistry};
