//! Domain events raised by execution transitions.
//!
//! `ExecutionEvent` is Clone + Send + Sync so it can travel over the tokio
//! broadcast channel behind the engine's event bus.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events emitted as an execution moves through its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// The execution left Pending and began running steps.
    ExecutionStarted { execution_id: Uuid, workflow_id: Uuid },

    /// One attempt of a step succeeded.
    StepCompleted {
        execution_id: Uuid,
        step_id: String,
        attempt: u32,
        duration_ms: u64,
    },

    /// One attempt of a step failed. Retries, if any, follow as new attempts.
    StepFailed {
        execution_id: Uuid,
        step_id: String,
        attempt: u32,
        error: String,
    },

    ExecutionCompleted { execution_id: Uuid, workflow_id: Uuid },

    ExecutionFailed {
        execution_id: Uuid,
        workflow_id: Uuid,
        step_id: Option<String>,
        error: String,
    },

    ExecutionCancelled { execution_id: Uuid, workflow_id: Uuid },
}

impl ExecutionEvent {
    pub fn execution_id(&self) -> Uuid {
        match self {
            ExecutionEvent::ExecutionStarted { execution_id, .. }
            | ExecutionEvent::StepCompleted { execution_id, .. }
            | ExecutionEvent::StepFailed { execution_id, .. }
            | ExecutionEvent::ExecutionCompleted { execution_id, .. }
            | ExecutionEvent::ExecutionFailed { execution_id, .. }
            | ExecutionEvent::ExecutionCancelled { execution_id, .. } => *execution_id,
        }
    }

    /// Whether this event closes the execution's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionEvent::ExecutionCompleted { .. }
                | ExecutionEvent::ExecutionFailed { .. }
                | ExecutionEvent::ExecutionCancelled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = ExecutionEvent::ExecutionFailed {
            execution_id: Uuid::nil(),
            workflow_id: Uuid::nil(),
            step_id: Some("step_b".to_string()),
            error: "boom".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "execution_failed");
        assert_eq!(value["step_id"], "step_b");

        let parsed: ExecutionEvent = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, event);
        assert!(parsed.is_terminal());
    }

    #[test]
    fn test_step_events_are_not_terminal() {
        let id = Uuid::now_v7();
        let event = ExecutionEvent::StepCompleted {
            execution_id: id,
            step_id: "step_a".to_string(),
            attempt: 1,
            duration_ms: 4,
        };
        assert!(!event.is_terminal());
        assert_eq!(event.execution_id(), id);
    }
}
