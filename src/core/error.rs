//! Errors raised while building or compiling a workflow.
//!
//! Every variant is raised before any task record is persisted.

use thiserror::Error;

/// Errors that can occur when turning a workflow definition into task records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    /// The definition is structurally invalid (argument counts, scoping, cycles).
    #[error("malformed workflow '{workflow}': {reason}")]
    MalformedWorkflow { workflow: String, reason: String },

    /// A batch's bound arrays differ in length.
    #[error("batch arrays differ in length: {}", describe_lengths(.bindings, .lengths))]
    ArityMismatch {
        bindings: Vec<String>,
        lengths: Vec<usize>,
    },

    /// A statement names neither a task type nor a workflow.
    #[error("unknown task reference '{name}' in workflow '{workflow}'")]
    UnknownTaskReference { workflow: String, name: String },

    /// No workflow is registered under this name.
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    /// A task type or workflow name was registered twice.
    #[error("duplicate definition: {0}")]
    DuplicateDefinition(String),

    /// Submission supplied the wrong number of positional arguments.
    #[error("wrong number of arguments for '{workflow}' ({given} for {expected})")]
    WrongArgumentCount {
        workflow: String,
        expected: usize,
        given: usize,
    },

    /// A batch plural parameter is not bound to an array.
    #[error("batch parameter '{param}' is not an array")]
    NotAnArray { param: String },

    /// A referenced parameter has no bound value.
    #[error("missing argument for parameter '{param}'")]
    MissingArgument { param: String },
}

impl WorkflowError {
    pub(crate) fn malformed(workflow: &str, reason: impl Into<String>) -> Self {
        WorkflowError::MalformedWorkflow {
            workflow: workflow.to_string(),
            reason: reason.into(),
        }
    }
}

fn describe_lengths(bindings: &[String], lengths: &[usize]) -> String {
    bindings
        .iter()
        .zip(lengths)
        .map(|(name, len)| format!("{}={}", name, len))
        .collect::<Vec<_>>()
        .join(", ")
}
