//! In-memory implementations of the workflow repository ports.
//!
//! Backed by `DashMap`, so clones share storage. Used by tests and by
//! callers that embed the engine without a database.

use std::sync::Arc;

use dashmap::DashMap;
use stepflow_types::error::RepositoryError;
use stepflow_types::execution::{Execution, ExecutionStatus};
use stepflow_types::workflow::{DefinitionStatus, WorkflowDefinition};
use uuid::Uuid;

use crate::repository::workflow::{DefinitionRepository, ExecutionRepository};

#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkflowRepository {
    definitions: Arc<DashMap<Uuid, WorkflowDefinition>>,
    executions: Arc<DashMap<Uuid, Execution>>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DefinitionRepository for InMemoryWorkflowRepository {
    async fn save_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        self.definitions.insert(def.id(), def.clone());
        Ok(())
    }

    async fn get_definition(&self, id: &Uuid) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self.definitions.get(id).map(|entry| entry.value().clone()))
    }

    async fn list_definitions(
        &self,
        status: Option<DefinitionStatus>,
    ) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let mut defs: Vec<WorkflowDefinition> = self
            .definitions
            .iter()
            .filter(|entry| status.is_none_or(|s| entry.status() == s))
            .map(|entry| entry.value().clone())
            .collect();
        defs.sort_by(|a, b| b.created_at().cmp(&a.created_at()).then(b.id().cmp(&a.id())));
        Ok(defs)
    }
}

impl ExecutionRepository for InMemoryWorkflowRepository {
    async fn save_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        self.executions.insert(execution.id(), execution.clone());
        Ok(())
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<Execution>, RepositoryError> {
        Ok(self.executions.get(id).map(|entry| entry.value().clone()))
    }

    async fn list_executions(
        &self,
        workflow_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let mut found: Vec<Execution> = self
            .executions
            .iter()
            .filter(|entry| entry.workflow_id() == *workflow_id)
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by(|a, b| b.created_at().cmp(&a.created_at()).then(b.id().cmp(&a.id())));
        found.truncate(limit as usize);
        Ok(found)
    }

    async fn list_by_status(&self, status: ExecutionStatus) -> Result<Vec<Execution>, RepositoryError> {
        let mut found: Vec<Execution> = self
            .executions
            .iter()
            .filter(|entry| entry.status() == status)
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by_key(|e| e.created_at());
        Ok(found)
    }
}
