//! Execution inspection and cancellation handlers.

use axum::extract::{Path, State};
use uuid::Uuid;

use stepflow_core::workflow::ExecutionSummary;

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

/// GET /api/v1/executions/{id}
pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<ExecutionSummary>, AppError> {
    let timer = RequestTimer::start();
    let summary = state.engine.get_execution(id).await?;
    let workflow_link = format!("/api/v1/workflows/{}", summary.workflow_id);
    Ok(timer
        .success(summary)
        .with_link("self", format!("/api/v1/executions/{id}"))
        .with_link("workflow", workflow_link))
}

/// POST /api/v1/executions/{id}/cancel
///
/// Cancellation is cooperative: the step in flight is abandoned and the
/// execution settles as Cancelled shortly after. 409 unless Running.
pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    let timer = RequestTimer::start();
    state.engine.cancel_execution(id).await?;
    Ok(timer
        .success(serde_json::json!({ "execution_id": id, "cancel_requested": true }))
        .with_link("execution", format!("/api/v1/executions/{id}")))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use stepflow_core::repository::workflow::DefinitionRepository;
    use stepflow_types::workflow::{DelayConfig, StepConfig, StepDefinition, WorkflowDefinition};

    use crate::http::router::build_router;
    use crate::state::AppState;

    #[tokio::test]
    async fn test_cancel_running_execution() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::open(dir.path()).await.unwrap();

        let mut def = WorkflowDefinition::new("sleepy");
        def.add_step(StepDefinition::new(
            "step_sleep",
            "Sleep",
            StepConfig::Delay(DelayConfig { duration_ms: 60_000 }),
        ))
        .unwrap();
        def.publish().unwrap();
        state.repo.save_definition(&def).await.unwrap();
        let execution_id = state.engine.execute(def.id(), json!({})).await.unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_router(state)).await.unwrap();
        });
        let base = format!("http://{addr}/api/v1/executions/{execution_id}");
        let client = reqwest::Client::new();

        // Wait until the execution has started.
        for _ in 0..100 {
            let body: serde_json::Value = client.get(&base).send().await.unwrap().json().await.unwrap();
            if body["data"]["status"] == "running" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let resp = client.post(format!("{base}/cancel")).send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 200);

        let mut status = json!(null);
        for _ in 0..100 {
            let body: serde_json::Value = client.get(&base).send().await.unwrap().json().await.unwrap();
            status = body["data"]["status"].clone();
            if status == "cancelled" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, "cancelled");

        // A terminal execution cannot be cancelled again.
        let resp = client.post(format!("{base}/cancel")).send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 409);
    }
}
