//! SQLite workflow repository implementation.
//!
//! Implements both storage ports from `stepflow-core` on top of the split
//! read/write pool. Definitions and execution snapshots are stored as JSON
//! documents; the columns beside them exist only for filtering and ordering.

use chrono::{DateTime, Utc};
use sqlx::Row;
use stepflow_core::repository::workflow::{DefinitionRepository, ExecutionRepository};
use stepflow_types::error::RepositoryError;
use stepflow_types::execution::{Execution, ExecutionStatus};
use stepflow_types::workflow::{DefinitionStatus, WorkflowDefinition};
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed definition and execution storage.
#[derive(Clone)]
pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn query_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn decode_definition(row: &sqlx::sqlite::SqliteRow) -> Result<WorkflowDefinition, RepositoryError> {
    let json: String = row.try_get("definition").map_err(query_error)?;
    serde_json::from_str(&json)
        .map_err(|e| RepositoryError::Query(format!("invalid workflow definition JSON: {e}")))
}

fn decode_execution(row: &sqlx::sqlite::SqliteRow) -> Result<Execution, RepositoryError> {
    let json: String = row.try_get("snapshot").map_err(query_error)?;
    serde_json::from_str(&json)
        .map_err(|e| RepositoryError::Query(format!("invalid execution snapshot JSON: {e}")))
}

fn decode_all<T>(
    rows: &[sqlx::sqlite::SqliteRow],
    decode: fn(&sqlx::sqlite::SqliteRow) -> Result<T, RepositoryError>,
) -> Result<Vec<T>, RepositoryError> {
    rows.iter().map(decode).collect()
}

// ---------------------------------------------------------------------------
// DefinitionRepository impl
// ---------------------------------------------------------------------------

impl DefinitionRepository for SqliteWorkflowRepository {
    async fn save_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let definition_json = serde_json::to_string(def)
            .map_err(|e| RepositoryError::Query(format!("serialize definition: {e}")))?;

        sqlx::query(
            r#"INSERT INTO workflow_definitions (id, name, version, status, definition, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 version = excluded.version,
                 status = excluded.status,
                 definition = excluded.definition,
                 updated_at = excluded.updated_at"#,
        )
        .bind(def.id().to_string())
        .bind(def.name())
        .bind(i64::from(def.version()))
        .bind(def.status().as_str())
        .bind(&definition_json)
        .bind(format_datetime(&def.created_at()))
        .bind(format_datetime(&def.updated_at()))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        tracing::debug!(workflow_id = %def.id(), status = %def.status(), "saved workflow definition");
        Ok(())
    }

    async fn get_definition(
        &self,
        id: &Uuid,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = sqlx::query("SELECT definition FROM workflow_definitions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.as_ref().map(decode_definition).transpose()
    }

    async fn list_definitions(
        &self,
        status: Option<DefinitionStatus>,
    ) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT definition FROM workflow_definitions WHERE status = ? ORDER BY created_at DESC, id DESC",
                )
                .bind(status.as_str())
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT definition FROM workflow_definitions ORDER BY created_at DESC, id DESC",
                )
                .fetch_all(&self.pool.reader)
                .await
            }
        }
        .map_err(query_error)?;

        decode_all(&rows, decode_definition)
    }
}

// ---------------------------------------------------------------------------
// ExecutionRepository impl
// ---------------------------------------------------------------------------

impl ExecutionRepository for SqliteWorkflowRepository {
    async fn save_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let snapshot = serde_json::to_string(execution)
            .map_err(|e| RepositoryError::Query(format!("serialize execution: {e}")))?;

        sqlx::query(
            r#"INSERT INTO workflow_executions (id, workflow_id, status, snapshot, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 snapshot = excluded.snapshot,
                 updated_at = excluded.updated_at"#,
        )
        .bind(execution.id().to_string())
        .bind(execution.workflow_id().to_string())
        .bind(execution.status().as_str())
        .bind(&snapshot)
        .bind(format_datetime(&execution.created_at()))
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| {
            let orphaned =
                matches!(&e, sqlx::Error::Database(db) if db.is_foreign_key_violation());
            if orphaned {
                RepositoryError::Conflict(format!(
                    "workflow {} does not exist",
                    execution.workflow_id()
                ))
            } else {
                query_error(e)
            }
        })?;

        Ok(())
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<Execution>, RepositoryError> {
        let row = sqlx::query("SELECT snapshot FROM workflow_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.as_ref().map(decode_execution).transpose()
    }

    async fn list_executions(
        &self,
        workflow_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT snapshot FROM workflow_executions WHERE workflow_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(workflow_id.to_string())
        .bind(i64::from(limit))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        decode_all(&rows, decode_execution)
    }

    async fn list_by_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT snapshot FROM workflow_executions WHERE status = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        decode_all(&rows, decode_execution)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
