//! API request handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::core::types::{SuperjobId, TaskKey};
use crate::engine::{Engine, EngineError, SubmitOptions};
use crate::storage::Storage;

use super::errors::ApiError;
use super::responses::{
    HealthResponse, MessageResponse, RecordListResponse, RecordResponse, SubmitResponse,
    SuperjobListResponse, SuperjobResponse, TaskTypeResponse, WorkflowListResponse,
    WorkflowResponse,
};

/// Shared application state for API handlers.
pub struct ApiState<S: Storage> {
    pub engine: Arc<Engine<S>>,
}

impl<S: Storage> Clone for ApiState<S> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

/// Body of `POST /api/superjobs`.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub workflow: String,
    #[serde(default)]
    pub args: Vec<Value>,
    /// Explicit options; when absent a trailing object in `args` is read instead.
    #[serde(default)]
    pub options: Option<SubmitOptions>,
}

/// Body of `POST /api/tasks/{key}/fail`.
#[derive(Debug, Deserialize)]
pub struct FailRequest {
    pub error: String,
}

/// Query parameters for list_superjobs endpoint.
#[derive(Debug, Deserialize)]
pub struct ListSuperjobsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

/// List registered workflows and task types.
pub async fn list_workflows<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
) -> Json<WorkflowListResponse> {
    let registry = state.engine.registry();
    let workflows: Vec<WorkflowResponse> = registry
        .workflows()
        .into_iter()
        .map(WorkflowResponse::from)
        .collect();
    let task_types = registry
        .task_types()
        .into_iter()
        .map(TaskTypeResponse::from)
        .collect();
    let count = workflows.len();
    Json(WorkflowListResponse {
        workflows,
        task_types,
        count,
    })
}

/// Submit a superjob.
pub async fn submit_superjob<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let superjob_id = match request.options {
        Some(options) => {
            state
                .engine
                .submit(&request.workflow, request.args, options)
                .await?
        }
        None => {
            state
                .engine
                .submit_with_trailing_options(&request.workflow, request.args)
                .await?
        }
    };

    Ok(Json(SubmitResponse {
        superjob_id: superjob_id.to_string(),
        workflow: request.workflow.clone(),
        message: format!("workflow '{}' submitted", request.workflow),
    }))
}

/// List superjobs, most recent first.
pub async fn list_superjobs<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Query(query): Query<ListSuperjobsQuery>,
) -> Result<Json<SuperjobListResponse>, ApiError> {
    let superjobs: Vec<SuperjobResponse> = state
        .engine
        .superjobs()
        .await?
        .into_iter()
        .rev()
        .take(query.limit)
        .map(SuperjobResponse::from)
        .collect();
    let count = superjobs.len();
    Ok(Json(SuperjobListResponse { superjobs, count }))
}

/// Get a specific superjob.
pub async fn get_superjob<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(superjob_id): Path<String>,
) -> Result<Json<SuperjobResponse>, ApiError> {
    let superjob = state.engine.superjob(&SuperjobId::new(superjob_id)).await?;
    Ok(Json(SuperjobResponse::from(superjob)))
}

/// List the task records of a superjob.
pub async fn list_records<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(superjob_id): Path<String>,
) -> Result<Json<RecordListResponse>, ApiError> {
    let records: Vec<RecordResponse> = state
        .engine
        .records(&SuperjobId::new(superjob_id))
        .await?
        .into_iter()
        .map(RecordResponse::from)
        .collect();
    let count = records.len();
    Ok(Json(RecordListResponse { records, count }))
}

/// Report a task as complete.
pub async fn complete_task<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(key): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let key: TaskKey = key.parse().map_err(EngineError::from)?;
    state.engine.on_complete(&key).await?;
    Ok(Json(MessageResponse {
        message: format!("task {} completed", key),
    }))
}

/// Report a task as failed.
pub async fn fail_task<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(key): Path<String>,
    Json(request): Json<FailRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let key: TaskKey = key.parse().map_err(EngineError::from)?;
    state.engine.on_failure(&key, &request.error).await?;
    Ok(Json(MessageResponse {
        message: format!("task {} failed", key),
    }))
}
