//! Workflow definition and execution-launch handlers.
//!
//! Definitions are created as drafts (or already-published documents, which
//! are validated on the way in), published, and branched into new versions.
//! Executions are accepted with 202 and driven in the background.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use stepflow_core::repository::workflow::DefinitionRepository;
use stepflow_core::workflow::ExecutionSummary;
use stepflow_types::error::StateError;
use stepflow_types::workflow::{DefinitionError, DefinitionStatus, WorkflowDefinition};

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListWorkflowsQuery {
    pub status: Option<DefinitionStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ListExecutionsQuery {
    #[serde(default = "default_execution_limit")]
    pub limit: u32,
}

fn default_execution_limit() -> u32 {
    20
}

/// Body of `POST /workflows/{id}/executions`.
#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default = "empty_input")]
    pub input: Value,
}

fn empty_input() -> Value {
    Value::Object(serde_json::Map::new())
}

fn workflow_link(id: Uuid) -> String {
    format!("/api/v1/workflows/{id}")
}

async fn load(state: &AppState, id: Uuid) -> Result<WorkflowDefinition, AppError> {
    state
        .repo
        .get_definition(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("workflow not found: {id}")))
}

// ---------------------------------------------------------------------------
// Definition handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/workflows - Store a workflow definition.
///
/// An existing draft with the same id is replaced; published and archived
/// definitions cannot be overwritten.
pub async fn create_workflow(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Response, AppError> {
    let timer = RequestTimer::start();

    let def: WorkflowDefinition = serde_json::from_value(body)
        .map_err(|e| AppError::BadRequest(format!("invalid workflow definition: {e}")))?;
    if def.is_published() {
        def.validate()?;
    }
    if let Some(existing) = state.repo.get_definition(&def.id()).await?
        && existing.status() != DefinitionStatus::Draft
    {
        return Err(DefinitionError::State(StateError::new("replace", existing.status())).into());
    }

    state.repo.save_definition(&def).await?;
    tracing::info!(workflow_id = %def.id(), status = %def.status(), "workflow stored");

    let id = def.id();
    Ok(timer
        .success(def)
        .with_link("self", workflow_link(id))
        .with_status(StatusCode::CREATED))
}

/// GET /api/v1/workflows - List definitions, newest first.
pub async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<ListWorkflowsQuery>,
) -> Result<ApiResponse<Vec<WorkflowDefinition>>, AppError> {
    let timer = RequestTimer::start();
    let defs = state.repo.list_definitions(query.status).await?;
    Ok(timer.success(defs).with_link("self", "/api/v1/workflows"))
}

/// GET /api/v1/workflows/{id}
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<WorkflowDefinition>, AppError> {
    let timer = RequestTimer::start();
    let def = load(&state, id).await?;
    Ok(timer
        .success(def)
        .with_link("self", workflow_link(id))
        .with_link("executions", format!("{}/executions", workflow_link(id))))
}

/// POST /api/v1/workflows/{id}/publish - Validate and freeze a draft.
pub async fn publish_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<WorkflowDefinition>, AppError> {
    let timer = RequestTimer::start();
    let mut def = load(&state, id).await?;
    def.publish()?;
    state.repo.save_definition(&def).await?;
    tracing::info!(workflow_id = %id, version = def.version(), "workflow published");
    Ok(timer.success(def).with_link("self", workflow_link(id)))
}

/// POST /api/v1/workflows/{id}/versions - Branch a new draft version.
pub async fn create_version(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let timer = RequestTimer::start();
    let current = load(&state, id).await?;
    let draft = current
        .create_new_version()
        .map_err(DefinitionError::from)?;
    state.repo.save_definition(&draft).await?;

    let draft_id = draft.id();
    Ok(timer
        .success(draft)
        .with_link("self", workflow_link(draft_id))
        .with_link("previous", workflow_link(id))
        .with_status(StatusCode::CREATED))
}

// ---------------------------------------------------------------------------
// Execution launch and listing
// ---------------------------------------------------------------------------

/// POST /api/v1/workflows/{id}/executions - Accept a run (202).
pub async fn execute_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ExecuteRequest>,
) -> Result<Response, AppError> {
    let timer = RequestTimer::start();
    let execution_id = state.engine.execute(id, body.input).await?;

    Ok(timer
        .success(serde_json::json!({ "execution_id": execution_id }))
        .with_link("execution", format!("/api/v1/executions/{execution_id}"))
        .with_status(StatusCode::ACCEPTED))
}

/// GET /api/v1/workflows/{id}/executions - Recent executions, newest first.
pub async fn list_workflow_executions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ListExecutionsQuery>,
) -> Result<ApiResponse<Vec<ExecutionSummary>>, AppError> {
    let timer = RequestTimer::start();
    load(&state, id).await?;
    let executions = state.engine.list_executions(id, query.limit).await?;
    Ok(timer.success(executions))
}
