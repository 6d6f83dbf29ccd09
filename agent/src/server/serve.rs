//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::AgentError;
use crate::server::handlers::{
    build_image_handler, check_health_handler, detect_project_handler, get_deployment_handler,
    health_handler, history_handler, logs_handler, prepare_repository_handler, rollback_handler,
    start_deployment_handler, stop_deployment_handler, version_handler,
};
use crate::server::state::ServerState;

/// Routes of the local API
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Deployments
        .route("/deployments", post(start_deployment_handler))
        .route("/deployments/{id}", get(get_deployment_handler))
        .route("/deployments/{id}/health", post(check_health_handler))
        .route("/deployments/{id}/stop", post(stop_deployment_handler))
        .route("/deployments/{id}/logs", get(logs_handler))
        .route("/rollback", post(rollback_handler))
        .route("/services/{name}/history", get(history_handler))
        // Build pipeline
        .route("/repositories/prepare", post(prepare_repository_handler))
        .route("/images/build", post(build_image_handler))
        .route("/projects/detect", post(detect_project_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), AgentError>>, AgentError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| AgentError::ServerError(format!("Failed to bind {}: {}", addr, e)))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| AgentError::ServerError(e.to_string()))
    });

    Ok(handle)
}
