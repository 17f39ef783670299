use thiserror::Error;

/// An operation was attempted that the current lifecycle state forbids.
///
/// Raised by both workflow definitions (mutating a published definition) and
/// executions (transitioning out of a terminal state). Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {operation} while {state}")]
pub struct StateError {
    pub operation: String,
    pub state: String,
}

impl StateError {
    pub fn new(operation: impl Into<String>, state: impl std::fmt::Display) -> Self {
        Self {
            operation: operation.into(),
            state: state.to_string(),
        }
    }
}

/// Errors from repository operations (used by trait definitions in stepflow-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_error_display() {
        let err = StateError::new("add step", "published");
        assert_eq!(err.to_string(), "cannot add step while published");
    }

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }
}
