//! Shared domain types for Stepflow.
//!
//! Workflow definitions, executions, domain events, configuration, and their
//! error types. Zero infrastructure dependencies -- only serde, uuid, chrono,
//! thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod execution;
pub mod workflow;
