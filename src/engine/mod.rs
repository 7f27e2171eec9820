//! Completion-propagation engine.
//!
//! The engine submits superjobs and reacts to the job runtime's completion
//! and failure callbacks, activating the next records and bubbling
//! completion up through composite records.

mod options;
mod propagation;
mod runtime;

pub use options::{SubmitOptions, split_trailing_options};
pub use propagation::Engine;
pub use runtime::{CompletionListener, Dispatch, JobRuntime, RuntimeError};

use thiserror::Error;

use crate::core::error::WorkflowError;
use crate::core::record::TaskStatus;
use crate::core::types::{InvalidTaskKey, SuperjobId, TaskKey};
use crate::storage::StorageError;

/// Errors that can occur in the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Building or compiling the workflow failed.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A callback named a task with no record.
    #[error("unknown task: {0}")]
    UnknownTask(TaskKey),

    /// A callback arrived for a record in a state it cannot leave that way.
    #[error("cannot {action} task {key} while it is {status}")]
    InvalidTransition {
        key: TaskKey,
        status: TaskStatus,
        action: &'static str,
    },

    /// A task key string could not be parsed.
    #[error(transparent)]
    InvalidTaskKey(#[from] InvalidTaskKey),

    /// The trailing submission options could not be read.
    #[error("invalid submission options: {0}")]
    InvalidOptions(String),

    /// Superjob not found.
    #[error("superjob not found: {0}")]
    SuperjobNotFound(SuperjobId),
}
