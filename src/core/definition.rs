//! Workflow definitions and the registry that resolves names.
//!
//! A workflow is a named program: an ordered list of declared parameter keys
//! and a body of statements. Each statement calls a task type or another
//! workflow by name, or fans out with a batch, and may carry a nested body of
//! statements that run after it completes.
//!
//! ```
//! use superflow::{ArgRef, Statement, TaskType, WorkflowDefinition, WorkflowRegistry};
//!
//! let mut registry = WorkflowRegistry::new();
//! registry.register_task_type(TaskType::new("notify", ["user_id"])).unwrap();
//! registry
//!     .register_workflow(
//!         WorkflowDefinition::new("notify_all", ["user_ids"]).statement(
//!             Statement::batch([("user_ids", "user_id")])
//!                 .then([Statement::call("notify", [ArgRef::param("user_id")])]),
//!         ),
//!     )
//!     .unwrap();
//!
//! assert!(registry.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::error::WorkflowError;
use super::record::{BATCH_ELEMENT_TASK_TYPE, BATCH_TASK_TYPE};
use super::tree::TreeBuilder;

/// A reference to an argument value: a declared parameter or a literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ArgRefRepr", into = "ArgRefRepr")]
pub enum ArgRef {
    /// Reference to a parameter in scope (workflow param or batch element).
    Param(String),
    /// A literal value passed through unchanged.
    Literal(Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ParamRef {
    param: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ArgRefRepr {
    Param(ParamRef),
    Literal(Value),
}

impl From<ArgRefRepr> for ArgRef {
    fn from(repr: ArgRefRepr) -> Self {
        match repr {
            ArgRefRepr::Param(p) => ArgRef::Param(p.param),
            ArgRefRepr::Literal(v) => ArgRef::Literal(v),
        }
    }
}

impl From<ArgRef> for ArgRefRepr {
    fn from(arg: ArgRef) -> Self {
        match arg {
            ArgRef::Param(param) => ArgRefRepr::Param(ParamRef { param }),
            ArgRef::Literal(v) => ArgRefRepr::Literal(v),
        }
    }
}

impl ArgRef {
    /// Reference a parameter by name.
    pub fn param(name: impl Into<String>) -> Self {
        ArgRef::Param(name.into())
    }

    /// Pass a literal value.
    pub fn literal(value: impl Into<Value>) -> Self {
        ArgRef::Literal(value.into())
    }
}

/// A concrete task type the job runtime knows how to execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskType {
    /// Task type name, as dispatched to the runtime.
    pub name: String,
    /// Declared parameter keys; their count is the task's arity.
    #[serde(default)]
    pub params: Vec<String>,
}

impl TaskType {
    pub fn new<I, P>(name: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            name: name.into(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    /// Number of arguments a call must supply.
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// One plural → singular binding of a batch statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchBinding {
    /// Parameter holding the array to fan out over.
    pub plural: String,
    /// Name each element is bound to inside the batch body.
    pub singular: String,
}

/// What a statement does.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementTarget {
    /// Call a task type or a workflow by name.
    Call { name: String, args: Vec<ArgRef> },
    /// Run the statement body once per index of the bound arrays.
    Batch { bindings: Vec<BatchBinding> },
}

/// A statement in a workflow body.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub target: StatementTarget,
    /// Dependent statements, run after this one completes.
    pub body: Vec<Statement>,
}

impl Statement {
    /// Call a task type or workflow with the given arguments.
    pub fn call<I>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = ArgRef>,
    {
        Self {
            target: StatementTarget::Call {
                name: name.into(),
                args: args.into_iter().collect(),
            },
            body: Vec::new(),
        }
    }

    /// Fan out over `(plural, singular)` bindings.
    pub fn batch<I, P, S>(bindings: I) -> Self
    where
        I: IntoIterator<Item = (P, S)>,
        P: Into<String>,
        S: Into<String>,
    {
        Self {
            target: StatementTarget::Batch {
                bindings: bindings
                    .into_iter()
                    .map(|(plural, singular)| BatchBinding {
                        plural: plural.into(),
                        singular: singular.into(),
                    })
                    .collect(),
            },
            body: Vec::new(),
        }
    }

    /// Attach the nested body.
    pub fn then<I>(mut self, body: I) -> Self
    where
        I: IntoIterator<Item = Statement>,
    {
        self.body.extend(body);
        self
    }
}

/// A named workflow program.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowDefinition {
    name: String,
    params: Vec<String>,
    body: Vec<Statement>,
}

impl WorkflowDefinition {
    pub fn new<I, P>(name: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            name: name.into(),
            params: params.into_iter().map(Into::into).collect(),
            body: Vec::new(),
        }
    }

    /// Append a top-level statement.
    pub fn statement(mut self, statement: Statement) -> Self {
        self.body.push(statement);
        self
    }

    /// Replace the body.
    pub fn with_body(mut self, body: Vec<Statement>) -> Self {
        self.body = body;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn body(&self) -> &[Statement] {
        &self.body
    }
}

/// What a statement name resolves to.
#[derive(Debug, Clone, Copy)]
pub enum Callable<'a> {
    Task(&'a TaskType),
    Workflow(&'a WorkflowDefinition),
}

impl Callable<'_> {
    pub fn arity(&self) -> usize {
        match self {
            Callable::Task(t) => t.arity(),
            Callable::Workflow(w) => w.params().len(),
        }
    }
}

/// Registry of task types and workflow definitions.
///
/// Names share one namespace so a statement name resolves unambiguously.
#[derive(Debug, Clone, Default)]
pub struct WorkflowRegistry {
    task_types: HashMap<String, TaskType>,
    workflows: HashMap<String, WorkflowDefinition>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task type.
    pub fn register_task_type(&mut self, task_type: TaskType) -> Result<(), WorkflowError> {
        self.check_name(&task_type.name)?;
        self.task_types.insert(task_type.name.clone(), task_type);
        Ok(())
    }

    /// Register a workflow definition.
    ///
    /// References inside the body are resolved lazily, so workflows may be
    /// registered in any order; call [`validate`](Self::validate) once all
    /// names are known.
    pub fn register_workflow(&mut self, workflow: WorkflowDefinition) -> Result<(), WorkflowError> {
        self.check_name(workflow.name())?;
        self.workflows.insert(workflow.name().to_string(), workflow);
        Ok(())
    }

    fn check_name(&self, name: &str) -> Result<(), WorkflowError> {
        if name == BATCH_TASK_TYPE || name == BATCH_ELEMENT_TASK_TYPE {
            return Err(WorkflowError::malformed(
                name,
                format!("'{}' is a reserved name", name),
            ));
        }
        if self.task_types.contains_key(name) || self.workflows.contains_key(name) {
            return Err(WorkflowError::DuplicateDefinition(name.to_string()));
        }
        Ok(())
    }

    pub fn task_type(&self, name: &str) -> Option<&TaskType> {
        self.task_types.get(name)
    }

    pub fn workflow(&self, name: &str) -> Option<&WorkflowDefinition> {
        self.workflows.get(name)
    }

    /// Resolve a statement name.
    pub fn resolve(&self, name: &str) -> Option<Callable<'_>> {
        self.task_types
            .get(name)
            .map(Callable::Task)
            .or_else(|| self.workflows.get(name).map(Callable::Workflow))
    }

    /// Workflow definitions sorted by name.
    pub fn workflows(&self) -> Vec<&WorkflowDefinition> {
        let mut result: Vec<_> = self.workflows.values().collect();
        result.sort_by(|a, b| a.name().cmp(b.name()));
        result
    }

    /// Task types sorted by name.
    pub fn task_types(&self) -> Vec<&TaskType> {
        let mut result: Vec<_> = self.task_types.values().collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        result
    }

    /// Build every registered workflow, returning the first error.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        let builder = TreeBuilder::new(self);
        for workflow in self.workflows() {
            builder.build(workflow)?;
        }
        Ok(())
    }
}
