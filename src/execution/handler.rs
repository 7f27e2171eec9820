//! The trait local task implementations satisfy.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::engine::Dispatch;

/// Errors that can occur while running a task.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Task execution failed with a message.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// Task timed out.
    #[error("task timed out after {0:?}")]
    Timeout(Duration),

    /// External command exited unsuccessfully.
    #[error("command exited with code {code}: {stderr}")]
    CommandFailed { code: i32, stderr: String },

    /// The handler panicked.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// Generic error wrapper.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Runs one task type inside the local runtime.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use superflow::engine::Dispatch;
/// use superflow::execution::{TaskError, TaskHandler};
///
/// struct Greet;
///
/// #[async_trait]
/// impl TaskHandler for Greet {
///     async fn run(&self, dispatch: &Dispatch) -> Result<(), TaskError> {
///         println!("hello {:?}", dispatch.args);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run the task to completion.
    async fn run(&self, dispatch: &Dispatch) -> Result<(), TaskError>;
}

/// A handler backed by a synchronous closure.
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Dispatch) -> Result<(), TaskError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> TaskHandler for FnHandler<F>
where
    F: Fn(&Dispatch) -> Result<(), TaskError> + Send + Sync,
{
    async fn run(&self, dispatch: &Dispatch) -> Result<(), TaskError> {
        (self.f)(dispatch)
    }
}
