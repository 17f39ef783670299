//! Workflow repository trait definitions.
//!
//! Two ports: `DefinitionRepository` stores authored definitions (all
//! versions, all statuses) and `ExecutionRepository` stores execution
//! snapshots. The infrastructure layer (stepflow-infra) implements both with
//! SQLite; `crate::workflow::memory` implements both in memory.

use stepflow_types::error::RepositoryError;
use stepflow_types::execution::{Execution, ExecutionStatus};
use stepflow_types::workflow::{DefinitionStatus, WorkflowDefinition};
use uuid::Uuid;

/// Storage for workflow definitions.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait DefinitionRepository: Send + Sync {
    /// Upsert a definition (insert or replace by ID).
    fn save_definition(
        &self,
        def: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a definition by ID regardless of status.
    fn get_definition(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    /// List definitions, newest first, optionally filtered by status.
    fn list_definitions(
        &self,
        status: Option<DefinitionStatus>,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowDefinition>, RepositoryError>> + Send;

    /// Load a definition only if it is Published.
    ///
    /// Returns `RepositoryError::NotFound` when the ID is unknown or the
    /// definition is a Draft or Archived.
    fn load_published(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<WorkflowDefinition, RepositoryError>> + Send {
        async move {
            match self.get_definition(id).await? {
                Some(def) if def.is_published() => Ok(def),
                _ => Err(RepositoryError::NotFound),
            }
        }
    }
}

/// Storage for execution snapshots.
pub trait ExecutionRepository: Send + Sync {
    /// Upsert the latest snapshot of an execution.
    fn save_execution(
        &self,
        execution: &Execution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Load the latest snapshot of an execution.
    fn get_execution(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Execution>, RepositoryError>> + Send;

    /// List executions of one workflow, newest first.
    fn list_executions(
        &self,
        workflow_id: &Uuid,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Execution>, RepositoryError>> + Send;

    /// List executions currently in the given status (used for crash recovery).
    fn list_by_status(
        &self,
        status: ExecutionStatus,
    ) -> impl std::future::Future<Output = Result<Vec<Execution>, RepositoryError>> + Send;
}
