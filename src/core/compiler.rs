//! Compiler: flattens a workflow tree into linked task records.
//!
//! Ids are assigned in preorder: a node takes the next id, then its children
//! are numbered in full before its next sibling. Each statement list becomes a
//! chain linked through `next_id`; batch elements are independent chains.

use serde_json::Value;
use std::collections::HashMap;

use super::definition::ArgRef;
use super::error::WorkflowError;
use super::record::{BATCH_ELEMENT_TASK_TYPE, BATCH_TASK_TYPE, TaskKind, TaskRecord};
use super::tree::{TreeNode, WorkflowTree};
use super::types::{RecordId, SuperjobId};

/// Parameter values visible while compiling one subtree.
type Env = HashMap<String, Value>;

/// Compile a tree with concrete argument values into task records.
///
/// Records are returned in id order, all `initialized`.
pub fn compile(
    tree: &WorkflowTree,
    superjob_id: &SuperjobId,
    bound_args: &HashMap<String, Value>,
) -> Result<Vec<TaskRecord>, WorkflowError> {
    let mut compiler = Compiler {
        superjob_id,
        workflow: &tree.workflow,
        records: Vec::new(),
    };
    let chain: Vec<_> = tree.nodes.iter().map(|node| (node, bound_args)).collect();
    compiler.compile_chain(&chain, None)?;
    Ok(compiler.records)
}

struct Compiler<'a> {
    superjob_id: &'a SuperjobId,
    workflow: &'a str,
    records: Vec<TaskRecord>,
}

impl Compiler<'_> {
    /// Push a fresh record and return its id.
    fn push(&mut self, kind: TaskKind, task_type: &str, parent_id: Option<RecordId>) -> RecordId {
        let id = RecordId::new(self.records.len() as u32 + 1);
        let mut record = TaskRecord::new(
            self.superjob_id.clone(),
            id,
            kind,
            task_type,
            self.workflow,
        );
        record.parent_id = parent_id;
        self.records.push(record);
        id
    }

    fn record_mut(&mut self, id: RecordId) -> &mut TaskRecord {
        &mut self.records[id.get() as usize - 1]
    }

    /// Compile a sequential chain, each node paired with the scope it sees.
    fn compile_chain(
        &mut self,
        chain: &[(&TreeNode, &Env)],
        parent_id: Option<RecordId>,
    ) -> Result<Vec<RecordId>, WorkflowError> {
        let mut ids = Vec::with_capacity(chain.len());
        for (node, env) in chain {
            ids.push(self.compile_node(node, env, parent_id)?);
        }
        for pair in ids.windows(2) {
            self.record_mut(pair[0]).next_id = Some(pair[1]);
        }
        Ok(ids)
    }

    fn compile_node(
        &mut self,
        node: &TreeNode,
        env: &Env,
        parent_id: Option<RecordId>,
    ) -> Result<RecordId, WorkflowError> {
        match node {
            TreeNode::Task {
                task_type,
                args,
                children,
            } => {
                let arg_values = resolve_args(args, env)?;
                let id = self.push(TaskKind::Task, task_type, parent_id);
                {
                    let record = self.record_mut(id);
                    record.arg_keys = args.clone();
                    record.arg_values = arg_values;
                }

                let chain: Vec<_> = children.iter().map(|child| (child, env)).collect();
                let children_ids = self.compile_chain(&chain, Some(id))?;
                self.record_mut(id).children_ids = children_ids;
                Ok(id)
            }
            TreeNode::Workflow {
                name,
                args,
                params,
                body,
                children,
            } => {
                let arg_values = resolve_args(args, env)?;
                let inner: Env = params
                    .iter()
                    .cloned()
                    .zip(arg_values.iter().cloned())
                    .collect();

                let id = self.push(TaskKind::Workflow, name, parent_id);
                {
                    let record = self.record_mut(id);
                    record.arg_keys = args.clone();
                    record.arg_values = arg_values;
                }

                let chain: Vec<_> = body
                    .iter()
                    .map(|node| (node, &inner))
                    .chain(children.iter().map(|child| (child, env)))
                    .collect();
                let children_ids = self.compile_chain(&chain, Some(id))?;
                self.record_mut(id).children_ids = children_ids;
                Ok(id)
            }
            TreeNode::Batch { bindings, children } => {
                let mut arrays = Vec::with_capacity(bindings.len());
                for binding in bindings {
                    let value = env.get(&binding.plural).ok_or_else(|| {
                        WorkflowError::MissingArgument {
                            param: binding.plural.clone(),
                        }
                    })?;
                    let array = value.as_array().ok_or_else(|| WorkflowError::NotAnArray {
                        param: binding.plural.clone(),
                    })?;
                    arrays.push(array);
                }

                let len = arrays.first().map_or(0, |a| a.len());
                if arrays.iter().any(|a| a.len() != len) {
                    return Err(WorkflowError::ArityMismatch {
                        bindings: bindings.iter().map(|b| b.plural.clone()).collect(),
                        lengths: arrays.iter().map(|a| a.len()).collect(),
                    });
                }

                let id = self.push(TaskKind::Batch, BATCH_TASK_TYPE, parent_id);
                {
                    let record = self.record_mut(id);
                    record.arg_keys = bindings
                        .iter()
                        .map(|b| ArgRef::Param(b.plural.clone()))
                        .collect();
                    record.arg_values = arrays.iter().map(|a| Value::Array(a.to_vec())).collect();
                }

                let mut element_ids = Vec::with_capacity(len);
                for index in 0..len {
                    let element_id =
                        self.push(TaskKind::BatchElement, BATCH_ELEMENT_TASK_TYPE, Some(id));
                    let mut element_env = env.clone();
                    let mut element_values = Vec::with_capacity(bindings.len());
                    for (binding, array) in bindings.iter().zip(&arrays) {
                        element_env.insert(binding.singular.clone(), array[index].clone());
                        element_values.push(array[index].clone());
                    }
                    {
                        let record = self.record_mut(element_id);
                        record.arg_keys = bindings
                            .iter()
                            .map(|b| ArgRef::Param(b.singular.clone()))
                            .collect();
                        record.arg_values = element_values;
                    }

                    let chain: Vec<_> = children
                        .iter()
                        .map(|child| (child, &element_env))
                        .collect();
                    let children_ids = self.compile_chain(&chain, Some(element_id))?;
                    self.record_mut(element_id).children_ids = children_ids;
                    element_ids.push(element_id);
                }

                self.record_mut(id).children_ids = element_ids;
                Ok(id)
            }
        }
    }
}

fn resolve_args(args: &[ArgRef], env: &Env) -> Result<Vec<Value>, WorkflowError> {
    args.iter()
        .map(|arg| match arg {
            ArgRef::Param(param) => {
                env.get(param)
                    .cloned()
                    .ok_or_else(|| WorkflowError::MissingArgument {
                        param: param.clone(),
                    })
            }
            ArgRef::Literal(value) => Ok(value.clone()),
        })
        .collect()
}
