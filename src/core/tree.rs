//! Tree builder: turns a workflow definition into an abstract node tree.
//!
//! Every name is resolved and every argument reference is checked against its
//! scope here, so a tree that builds successfully can only fail to compile on
//! the concrete argument values.

use std::collections::HashSet;

use super::definition::{
    ArgRef, BatchBinding, Callable, Statement, StatementTarget, WorkflowDefinition,
    WorkflowRegistry,
};
use super::error::WorkflowError;

/// A compile-time node of a workflow tree.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeNode {
    /// A task type call and the dependent work that runs after it.
    Task {
        task_type: String,
        args: Vec<ArgRef>,
        children: Vec<TreeNode>,
    },
    /// A nested workflow, inlined in place.
    ///
    /// `body` is the nested definition's own chain and only sees `params`,
    /// bound positionally to `args`. `children` is the dependent work
    /// attached to the calling statement; it runs after `body` in the same
    /// chain, in the caller's scope.
    Workflow {
        name: String,
        args: Vec<ArgRef>,
        params: Vec<String>,
        body: Vec<TreeNode>,
        children: Vec<TreeNode>,
    },
    /// Fan-out template, instantiated once per index of the bound arrays.
    Batch {
        bindings: Vec<BatchBinding>,
        children: Vec<TreeNode>,
    },
}

impl TreeNode {
    /// Number of nodes in this subtree, not counting batch expansion.
    pub fn node_count(&self) -> usize {
        1 + match self {
            TreeNode::Task { children, .. } | TreeNode::Batch { children, .. } => {
                children.iter().map(TreeNode::node_count).sum::<usize>()
            }
            TreeNode::Workflow { body, children, .. } => body
                .iter()
                .chain(children.iter())
                .map(TreeNode::node_count)
                .sum::<usize>(),
        }
    }
}

/// The built tree of a top-level workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowTree {
    pub workflow: String,
    pub params: Vec<String>,
    /// The root chain.
    pub nodes: Vec<TreeNode>,
}

/// Names visible to argument references.
type Scope = HashSet<String>;

/// Builds [`WorkflowTree`]s against a registry.
pub struct TreeBuilder<'a> {
    registry: &'a WorkflowRegistry,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(registry: &'a WorkflowRegistry) -> Self {
        Self { registry }
    }

    /// Build the tree for a definition.
    pub fn build(&self, definition: &WorkflowDefinition) -> Result<WorkflowTree, WorkflowError> {
        let mut stack = vec![definition.name().to_string()];
        let nodes = self.build_definition(definition, &mut stack)?;
        Ok(WorkflowTree {
            workflow: definition.name().to_string(),
            params: definition.params().to_vec(),
            nodes,
        })
    }

    /// Build an arbitrary statement list in the scope of `definition`.
    pub fn build_statements(
        &self,
        definition: &WorkflowDefinition,
        statements: &[Statement],
    ) -> Result<Vec<TreeNode>, WorkflowError> {
        let scope = definition_scope(definition)?;
        let mut stack = vec![definition.name().to_string()];
        self.build_chain(definition, statements, &scope, &mut stack)
    }

    fn build_definition(
        &self,
        definition: &WorkflowDefinition,
        stack: &mut Vec<String>,
    ) -> Result<Vec<TreeNode>, WorkflowError> {
        if definition.body().is_empty() {
            return Err(WorkflowError::malformed(
                definition.name(),
                "workflow body is empty",
            ));
        }
        let scope = definition_scope(definition)?;
        self.build_chain(definition, definition.body(), &scope, stack)
    }

    fn build_chain(
        &self,
        definition: &WorkflowDefinition,
        statements: &[Statement],
        scope: &Scope,
        stack: &mut Vec<String>,
    ) -> Result<Vec<TreeNode>, WorkflowError> {
        statements
            .iter()
            .map(|statement| self.build_statement(definition, statement, scope, stack))
            .collect()
    }

    fn build_statement(
        &self,
        definition: &WorkflowDefinition,
        statement: &Statement,
        scope: &Scope,
        stack: &mut Vec<String>,
    ) -> Result<TreeNode, WorkflowError> {
        match &statement.target {
            StatementTarget::Call { name, args } => {
                for arg in args {
                    if let ArgRef::Param(param) = arg
                        && !scope.contains(param)
                    {
                        return Err(WorkflowError::malformed(
                            definition.name(),
                            format!("parameter '{}' passed to '{}' is not in scope", param, name),
                        ));
                    }
                }

                let callable = self.registry.resolve(name).ok_or_else(|| {
                    WorkflowError::UnknownTaskReference {
                        workflow: definition.name().to_string(),
                        name: name.clone(),
                    }
                })?;

                if callable.arity() != args.len() {
                    return Err(WorkflowError::malformed(
                        definition.name(),
                        format!(
                            "'{}' expects {} arguments, got {}",
                            name,
                            callable.arity(),
                            args.len()
                        ),
                    ));
                }

                let children = self.build_chain(definition, &statement.body, scope, stack)?;

                match callable {
                    Callable::Task(task_type) => Ok(TreeNode::Task {
                        task_type: task_type.name.clone(),
                        args: args.clone(),
                        children,
                    }),
                    Callable::Workflow(nested) => {
                        if stack.iter().any(|n| n == nested.name()) {
                            return Err(WorkflowError::malformed(
                                definition.name(),
                                format!(
                                    "recursive reference to workflow '{}' ({} -> {})",
                                    nested.name(),
                                    stack.join(" -> "),
                                    nested.name()
                                ),
                            ));
                        }
                        stack.push(nested.name().to_string());
                        let body = self.build_definition(nested, stack);
                        stack.pop();

                        Ok(TreeNode::Workflow {
                            name: nested.name().to_string(),
                            args: args.clone(),
                            params: nested.params().to_vec(),
                            body: body?,
                            children,
                        })
                    }
                }
            }
            StatementTarget::Batch { bindings } => {
                if bindings.is_empty() {
                    return Err(WorkflowError::malformed(
                        definition.name(),
                        "batch has no bindings",
                    ));
                }
                if statement.body.is_empty() {
                    return Err(WorkflowError::malformed(
                        definition.name(),
                        "batch has an empty body",
                    ));
                }

                let mut inner = scope.clone();
                let mut singulars = HashSet::new();
                for binding in bindings {
                    if !scope.contains(&binding.plural) {
                        return Err(WorkflowError::malformed(
                            definition.name(),
                            format!("batch parameter '{}' is not in scope", binding.plural),
                        ));
                    }
                    if !singulars.insert(binding.singular.as_str()) {
                        return Err(WorkflowError::malformed(
                            definition.name(),
                            format!("batch binds '{}' more than once", binding.singular),
                        ));
                    }
                    inner.insert(binding.singular.clone());
                }

                let children = self.build_chain(definition, &statement.body, &inner, stack)?;
                Ok(TreeNode::Batch {
                    bindings: bindings.clone(),
                    children,
                })
            }
        }
    }
}

fn definition_scope(definition: &WorkflowDefinition) -> Result<Scope, WorkflowError> {
    let mut scope = Scope::new();
    for param in definition.params() {
        if !scope.insert(param.clone()) {
            return Err(WorkflowError::malformed(
                definition.name(),
                format!("parameter '{}' declared more than once", param),
            ));
        }
    }
    Ok(scope)
}
