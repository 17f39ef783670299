//! Axum router configuration with middleware.
//!
//! All API routes are under `/api/v1/`. Middleware: CORS and request
//! tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Definitions
        .route(
            "/workflows",
            post(handlers::workflow::create_workflow).get(handlers::workflow::list_workflows),
        )
        .route("/workflows/{id}", get(handlers::workflow::get_workflow))
        .route(
            "/workflows/{id}/publish",
            post(handlers::workflow::publish_workflow),
        )
        .route(
            "/workflows/{id}/versions",
            post(handlers::workflow::create_version),
        )
        // Executions
        .route(
            "/workflows/{id}/executions",
            post(handlers::workflow::execute_workflow)
                .get(handlers::workflow::list_workflow_executions),
        )
        .route("/executions/{id}", get(handlers::execution::get_execution))
        .route(
            "/executions/{id}/cancel",
            post(handlers::execution::cancel_execution),
        );

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Liveness check.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
