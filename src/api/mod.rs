//! HTTP API module for superflow.
//!
//! Provides REST endpoints for submitting superjobs, inspecting their
//! records, and reporting task outcomes from an external runtime.

mod errors;
mod handlers;
mod responses;

pub use errors::{ApiError, ErrorResponse};
pub use handlers::{ApiState, FailRequest, SubmitRequest};
pub use responses::*;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::engine::Engine;
use crate::storage::Storage;

/// Build the API router with all endpoints.
pub fn build_router<S: Storage + 'static>(state: ApiState<S>) -> Router {
    Router::new()
        // Health check
        .route("/api/health", get(handlers::health))
        // Definitions
        .route("/api/workflows", get(handlers::list_workflows::<S>))
        // Superjobs
        .route(
            "/api/superjobs",
            get(handlers::list_superjobs::<S>).post(handlers::submit_superjob::<S>),
        )
        .route("/api/superjobs/{superjob_id}", get(handlers::get_superjob::<S>))
        .route(
            "/api/superjobs/{superjob_id}/records",
            get(handlers::list_records::<S>),
        )
        // Runtime callbacks
        .route("/api/tasks/{key}/complete", post(handlers::complete_task::<S>))
        .route("/api/tasks/{key}/fail", post(handlers::fail_task::<S>))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Create the API state from an engine.
pub fn create_api_state<S: Storage>(engine: Arc<Engine<S>>) -> ApiState<S> {
    ApiState { engine }
}

/// Start the API server.
///
/// This function spawns the server and returns a handle to the task.
/// The server runs until the task is aborted or the process exits.
pub async fn start_server<S: Storage + 'static>(
    config: &ApiConfig,
    state: ApiState<S>,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let router = build_router(state);
    let listener = TcpListener::bind(config.bind_addr()).await?;
    let addr = listener.local_addr()?;
    tracing::info!("API server listening on http://{}", addr);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(handle)
}
