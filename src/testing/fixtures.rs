//! Ready-made registries used across the test suite.
//!
//! - `complex`: `A(first) { B(second); C(second) { D(first) }; E(first) }`
//! - `batch_users`: `batch(user_ids => user_id) { A(user_id); B(user_id) }`
//! - `pairs`: `batch(user_ids => user_id, comment_ids => comment_id) { Pair(user_id, comment_id) }`
//! - `parent`: `A(first); child(second) { B(first) }` with `child(first) = C(first)`

use serde_json::Value;
use std::collections::HashMap;

use crate::core::compiler::compile;
use crate::core::definition::{ArgRef, Statement, TaskType, WorkflowDefinition, WorkflowRegistry};
use crate::core::record::TaskRecord;
use crate::core::tree::TreeBuilder;
use crate::core::types::SuperjobId;

fn call(name: &str, params: &[&str]) -> Statement {
    Statement::call(name, params.iter().map(|p| ArgRef::param(*p)))
}

fn register_tasks(registry: &mut WorkflowRegistry, tasks: &[(&str, &[&str])]) {
    for (name, params) in tasks {
        registry
            .register_task_type(TaskType::new(*name, params.iter().copied()))
            .expect("fixture task types are unique");
    }
}

/// Registry holding the five-task `complex` workflow.
pub fn complex_registry() -> WorkflowRegistry {
    let mut registry = WorkflowRegistry::new();
    register_tasks(
        &mut registry,
        &[
            ("A", &["id"]),
            ("B", &["id"]),
            ("C", &["id"]),
            ("D", &["id"]),
            ("E", &["id"]),
        ],
    );
    registry
        .register_workflow(
            WorkflowDefinition::new("complex", ["first", "second"]).statement(
                call("A", &["first"]).then([
                    call("B", &["second"]),
                    call("C", &["second"]).then([call("D", &["first"])]),
                    call("E", &["first"]),
                ]),
            ),
        )
        .expect("fixture workflows are unique");
    registry
}

/// Registry holding the `batch_users` and `pairs` workflows.
pub fn batch_registry() -> WorkflowRegistry {
    let mut registry = WorkflowRegistry::new();
    register_tasks(
        &mut registry,
        &[
            ("A", &["user_id"]),
            ("B", &["user_id"]),
            ("Pair", &["user_id", "comment_id"]),
        ],
    );
    registry
        .register_workflow(
            WorkflowDefinition::new("batch_users", ["user_ids"]).statement(
                Statement::batch([("user_ids", "user_id")])
                    .then([call("A", &["user_id"]), call("B", &["user_id"])]),
            ),
        )
        .expect("fixture workflows are unique");
    registry
        .register_workflow(
            WorkflowDefinition::new("pairs", ["user_ids", "comment_ids"]).statement(
                Statement::batch([("user_ids", "user_id"), ("comment_ids", "comment_id")])
                    .then([call("Pair", &["user_id", "comment_id"])]),
            ),
        )
        .expect("fixture workflows are unique");
    registry
}

/// Registry holding `parent`, which inlines `child`.
pub fn nested_registry() -> WorkflowRegistry {
    let mut registry = WorkflowRegistry::new();
    register_tasks(
        &mut registry,
        &[("A", &["x"]), ("B", &["x"]), ("C", &["x"])],
    );
    registry
        .register_workflow(
            WorkflowDefinition::new("child", ["first"]).statement(call("C", &["first"])),
        )
        .expect("fixture workflows are unique");
    registry
        .register_workflow(
            WorkflowDefinition::new("parent", ["first", "second"])
                .statement(call("A", &["first"]))
                .statement(call("child", &["second"]).then([call("B", &["first"])])),
        )
        .expect("fixture workflows are unique");
    registry
}

/// Build and compile a workflow, with `args` given as a JSON object.
pub fn compiled(
    registry: &WorkflowRegistry,
    workflow: &str,
    args: Value,
    superjob_id: &str,
) -> Vec<TaskRecord> {
    let definition = registry.workflow(workflow).expect("fixture workflow exists");
    let tree = TreeBuilder::new(registry)
        .build(definition)
        .expect("fixture workflow builds");
    let bound: HashMap<String, Value> =
        serde_json::from_value(args).expect("fixture args are an object");
    compile(&tree, &SuperjobId::new(superjob_id), &bound).expect("fixture workflow compiles")
}
