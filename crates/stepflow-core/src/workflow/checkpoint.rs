//! Durable checkpoints for execution snapshots.
//!
//! Every transition the engine applies goes through `CheckpointManager`:
//! the new snapshot is persisted first, then the transition's events are
//! published. A crash between two checkpoints loses at most the in-flight
//! step, which `resume` re-runs.

use std::sync::Arc;

use stepflow_types::error::RepositoryError;
use stepflow_types::execution::{Execution, Transition};
use uuid::Uuid;

use crate::event::EventBus;
use crate::repository::workflow::ExecutionRepository;

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Persists execution snapshots and fans out their events.
///
/// Generic over `R: ExecutionRepository` so it works with any storage backend
/// (SQLite, in-memory).
pub struct CheckpointManager<R: ExecutionRepository> {
    repo: Arc<R>,
    events: EventBus,
}

impl<R: ExecutionRepository> Clone for CheckpointManager<R> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
            events: self.events.clone(),
        }
    }
}

impl<R: ExecutionRepository> CheckpointManager<R> {
    pub fn new(repo: Arc<R>, events: EventBus) -> Self {
        Self { repo, events }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Persist the snapshot of a new execution before it starts.
    pub async fn checkpoint_created(&self, execution: &Execution) -> Result<(), CheckpointError> {
        self.repo.save_execution(execution).await?;
        tracing::debug!(execution_id = %execution.id(), "checkpointed new execution");
        Ok(())
    }

    /// Persist a transition's snapshot, then publish its events.
    ///
    /// Returns the snapshot so callers can continue from it.
    pub async fn checkpoint(&self, transition: Transition) -> Result<Execution, CheckpointError> {
        let Transition { execution, events } = transition;
        self.repo.save_execution(&execution).await?;

        tracing::debug!(
            execution_id = %execution.id(),
            status = %execution.status(),
            step_results = execution.step_results().len(),
            "checkpointed execution"
        );

        self.events.publish_all(events);
        Ok(execution)
    }

    /// Load the latest persisted snapshot.
    pub async fn restore(&self, execution_id: Uuid) -> Result<Execution, CheckpointError> {
        self.repo
            .get_execution(&execution_id)
            .await?
            .ok_or(CheckpointError::ExecutionNotFound(execution_id))
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;
    use stepflow_types::event::ExecutionEvent;
    use stepflow_types::execution::ExecutionStatus;

    use super::*;
    use crate::workflow::memory::InMemoryWorkflowRepository;

    #[tokio::test]
    async fn test_checkpoint_persists_then_publishes() {
        let repo = Arc::new(InMemoryWorkflowRepository::new());
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let manager = CheckpointManager::new(repo.clone(), bus);

        let execution = Execution::new(Uuid::now_v7(), 1, json!({ "n": 1 }));
        manager.checkpoint_created(&execution).await.unwrap();
        let running = manager
            .checkpoint(execution.start().unwrap())
            .await
            .unwrap();

        assert_eq!(running.status(), ExecutionStatus::Running);
        let stored = manager.restore(execution.id()).await.unwrap();
        assert_eq!(stored, running);
        assert!(matches!(
            rx.recv().await.unwrap(),
            ExecutionEvent::ExecutionStarted { .. }
        ));
    }

    #[tokio::test]
    async fn test_restore_unknown_execution() {
        let manager = CheckpointManager::new(
            Arc::new(InMemoryWorkflowRepository::new()),
            EventBus::default(),
        );
        let err = manager.restore(Uuid::nil()).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
