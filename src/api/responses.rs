//! API response types.

use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::core::definition::{TaskType, WorkflowDefinition};
use crate::core::record::{TaskKind, TaskRecord, TaskStatus};
use crate::storage::{StoredSuperjob, SuperjobStatus};

/// Convert SystemTime to milliseconds since Unix epoch.
fn system_time_to_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Convert Duration to milliseconds.
fn duration_to_millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Workflow summary.
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub name: String,
    pub params: Vec<String>,
    pub statement_count: usize,
}

impl From<&WorkflowDefinition> for WorkflowResponse {
    fn from(workflow: &WorkflowDefinition) -> Self {
        Self {
            name: workflow.name().to_string(),
            params: workflow.params().to_vec(),
            statement_count: workflow.body().len(),
        }
    }
}

/// Task type summary.
#[derive(Debug, Serialize)]
pub struct TaskTypeResponse {
    pub name: String,
    pub params: Vec<String>,
}

impl From<&TaskType> for TaskTypeResponse {
    fn from(task_type: &TaskType) -> Self {
        Self {
            name: task_type.name.clone(),
            params: task_type.params.clone(),
        }
    }
}

/// Registered workflows and task types.
#[derive(Debug, Serialize)]
pub struct WorkflowListResponse {
    pub workflows: Vec<WorkflowResponse>,
    pub task_types: Vec<TaskTypeResponse>,
    pub count: usize,
}

/// Submission response.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub superjob_id: String,
    pub workflow: String,
    pub message: String,
}

/// Superjob details.
#[derive(Debug, Serialize)]
pub struct SuperjobResponse {
    pub id: String,
    pub workflow: String,
    pub label: Option<String>,
    pub args: Vec<Value>,
    pub status: SuperjobStatus,
    pub delete_records_on_completion: bool,
    pub submitted_at: u64,
    pub finished_at: Option<u64>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}

impl From<StoredSuperjob> for SuperjobResponse {
    fn from(superjob: StoredSuperjob) -> Self {
        let duration_ms = superjob.duration().map(duration_to_millis);
        Self {
            id: superjob.id.to_string(),
            workflow: superjob.workflow,
            label: superjob.label,
            args: superjob.args,
            status: superjob.status,
            delete_records_on_completion: superjob.delete_records_on_completion,
            submitted_at: system_time_to_millis(superjob.submitted_at),
            finished_at: superjob.finished_at.map(system_time_to_millis),
            duration_ms,
            error: superjob.error,
        }
    }
}

/// List of superjobs response.
#[derive(Debug, Serialize)]
pub struct SuperjobListResponse {
    pub superjobs: Vec<SuperjobResponse>,
    pub count: usize,
}

/// One task record.
#[derive(Debug, Serialize)]
pub struct RecordResponse {
    pub key: String,
    pub id: u32,
    pub parent_id: Option<u32>,
    pub children_ids: Vec<u32>,
    pub next_id: Option<u32>,
    pub kind: TaskKind,
    pub task_type: String,
    pub args: Vec<Value>,
    pub status: TaskStatus,
    pub descendants_complete: bool,
}

impl From<TaskRecord> for RecordResponse {
    fn from(record: TaskRecord) -> Self {
        Self {
            key: record.key().to_string(),
            id: record.id.get(),
            parent_id: record.parent_id.map(|id| id.get()),
            children_ids: record.children_ids.iter().map(|id| id.get()).collect(),
            next_id: record.next_id.map(|id| id.get()),
            kind: record.kind,
            task_type: record.task_type,
            args: record.arg_values,
            status: record.status,
            descendants_complete: record.descendants_complete,
        }
    }
}

/// List of records response.
#[derive(Debug, Serialize)]
pub struct RecordListResponse {
    pub records: Vec<RecordResponse>,
    pub count: usize,
}

/// Generic message response.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}
