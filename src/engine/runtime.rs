//! The seams between the engine and the job runtime.
//!
//! The engine hands leaves to a [`JobRuntime`]; the runtime reports each
//! dispatched task back exactly once through a [`CompletionListener`].

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use super::EngineError;
use crate::core::record::TaskRecord;
use crate::core::types::TaskKey;

/// A leaf task handed to the job runtime.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dispatch {
    /// Key to report back with.
    pub key: TaskKey,
    /// Task type to run.
    pub task_type: String,
    /// Resolved argument values, in declaration order.
    pub args: Vec<Value>,
    /// Name of the submitted workflow.
    pub workflow: String,
    /// Metadata attached at submission.
    pub meta: Option<Value>,
}

impl From<&TaskRecord> for Dispatch {
    fn from(record: &TaskRecord) -> Self {
        Self {
            key: record.key(),
            task_type: record.task_type.clone(),
            args: record.arg_values.clone(),
            workflow: record.workflow.clone(),
            meta: record.meta.clone(),
        }
    }
}

/// Errors a runtime can return when refusing a dispatch.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// No handler is registered for the task type.
    #[error("unknown task type: {0}")]
    UnknownTaskType(String),

    /// The runtime cannot accept work right now.
    #[error("runtime unavailable: {0}")]
    Unavailable(String),

    /// The runtime rejected this dispatch.
    #[error("dispatch rejected: {0}")]
    Rejected(String),
}

/// An asynchronous job-execution runtime.
///
/// `dispatch` must not wait for the task to finish.
#[async_trait]
pub trait JobRuntime: Send + Sync {
    /// Accept a task for execution.
    async fn dispatch(&self, dispatch: Dispatch) -> Result<(), RuntimeError>;
}

/// Callback interface a runtime reports task outcomes through.
#[async_trait]
pub trait CompletionListener: Send + Sync {
    /// The task finished successfully.
    async fn on_complete(&self, key: &TaskKey) -> Result<(), EngineError>;

    /// The task failed.
    async fn on_failure(&self, key: &TaskKey, error: &str) -> Result<(), EngineError>;
}
