//! Workflow directory loading tests.

use crate::common::write_file;
use serde_json::json;
use std::sync::Arc;
use superflow::testing::RecordingRuntime;
use superflow::{
    ConfigError, Engine, InMemoryStorage, SubmitOptions, TaskKind, TaskStatus, WorkflowError,
    load_workflows_from_directory,
};
use tempfile::TempDir;

const TASKS: &str = r#"
tasks:
  - name: fetch_user
    params: [user_id]
    command: echo
  - name: notify
    params: [user_id, channel]
"#;

const WORKFLOWS: &str = r#"
workflows:
  - name: welcome
    params: [user_id]
    body:
      - run: notify
        args: [{ param: user_id }, "email"]

  - name: onboard
    params: [user_ids]
    body:
      - batch: { user_ids: user_id }
        then:
          - run: fetch_user
            args: [{ param: user_id }]
            then:
              - run: welcome
                args: [{ param: user_id }]
"#;

/// Test: definitions split across files merge into one registry.
#[tokio::test]
async fn test_directory_merges_files() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "01-tasks.yaml", TASKS);
    write_file(dir.path(), "02-workflows.yml", WORKFLOWS);
    write_file(dir.path(), "README.md", "not a workflow file");

    let loaded = load_workflows_from_directory(dir.path()).unwrap();

    let names: Vec<_> = loaded.registry.workflows().iter().map(|w| w.name().to_string()).collect();
    assert_eq!(names, vec!["onboard", "welcome"]);
    assert_eq!(loaded.registry.task_types().len(), 2);
    assert_eq!(loaded.commands.len(), 1);
    assert_eq!(loaded.tasks_without_command(), vec!["notify"]);
}

/// Test: a loaded workflow compiles and runs through the engine.
#[tokio::test]
async fn test_loaded_workflow_submits() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "tasks.yaml", TASKS);
    write_file(dir.path(), "workflows.yaml", WORKFLOWS);
    let loaded = load_workflows_from_directory(dir.path()).unwrap();

    let runtime = Arc::new(RecordingRuntime::new());
    let engine = Engine::new(loaded.registry, InMemoryStorage::new(), runtime.clone());

    let id = engine
        .submit("onboard", vec![json!([10])], SubmitOptions::default())
        .await
        .unwrap();

    // batch, element, fetch_user, welcome, notify
    let records = engine.records(&id).await.unwrap();
    let kinds: Vec<_> = records.iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![
            TaskKind::Batch,
            TaskKind::BatchElement,
            TaskKind::Task,
            TaskKind::Workflow,
            TaskKind::Task,
        ]
    );
    assert_eq!(records[4].arg_values, vec![json!(10), json!("email")]);

    let dispatches = runtime.take().await;
    assert_eq!(dispatches.len(), 1);
    assert_eq!(dispatches[0].task_type, "fetch_user");
    engine.on_complete(&dispatches[0].key).await.unwrap();

    let dispatches = runtime.take().await;
    assert_eq!(dispatches[0].task_type, "notify");
    engine.on_complete(&dispatches[0].key).await.unwrap();

    assert!(
        engine
            .records(&id)
            .await
            .unwrap()
            .iter()
            .all(|r| r.status == TaskStatus::Complete)
    );
}

/// Test: the same name in two files is rejected.
#[test]
fn test_duplicate_across_files() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "a.yaml", TASKS);
    write_file(dir.path(), "b.yaml", TASKS);

    let result = load_workflows_from_directory(dir.path());
    assert!(matches!(
        result,
        Err(ConfigError::Workflow(WorkflowError::DuplicateDefinition(name))) if name == "fetch_user"
    ));
}

/// Test: an unresolvable reference fails validation of the whole directory.
#[test]
fn test_unknown_reference_fails_validation() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "workflows.yaml", WORKFLOWS);

    let result = load_workflows_from_directory(dir.path());
    assert!(matches!(
        result,
        Err(ConfigError::Workflow(WorkflowError::UnknownTaskReference { .. }))
    ));
}

/// Test: workflows that call each other are rejected.
#[test]
fn test_mutual_recursion_rejected() {
    let dir = TempDir::new().unwrap();
    write_file(
        dir.path(),
        "loop.yaml",
        r#"
workflows:
  - name: ping
    params: [x]
    body:
      - run: pong
        args: [{ param: x }]
  - name: pong
    params: [x]
    body:
      - run: ping
        args: [{ param: x }]
"#,
    );

    let result = load_workflows_from_directory(dir.path());
    assert!(matches!(
        result,
        Err(ConfigError::Workflow(WorkflowError::MalformedWorkflow { .. }))
    ));
}

/// Test: parse errors name the offending file.
#[test]
fn test_parse_error_names_file() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "broken.yaml", "workflows: [");

    let err = load_workflows_from_directory(dir.path()).unwrap_err();
    assert!(err.to_string().contains("broken.yaml"));
}

/// Test: a path that is not a directory is rejected.
#[test]
fn test_not_a_directory() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "tasks.yaml", TASKS);

    let result = load_workflows_from_directory(dir.path().join("tasks.yaml"));
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

/// Test: an empty directory yields an empty registry.
#[test]
fn test_empty_directory() {
    let dir = TempDir::new().unwrap();
    let loaded = load_workflows_from_directory(dir.path()).unwrap();
    assert!(loaded.registry.workflows().is_empty());
    assert!(loaded.commands.is_empty());
}
