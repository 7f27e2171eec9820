//! Local runtime tests: configured commands run as real processes.

use crate::common::{wait_for_superjob_status, write_file};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use superflow::{
    Engine, InMemoryStorage, SubmitOptions, SuperjobStatus, TaskStatus,
    load_workflows_from_directory,
};
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(10);

fn pipeline_yaml(log_dir: &std::path::Path) -> String {
    format!(
        r#"
tasks:
  - name: one
    params: [x]
    command: sh
    args: ["-c", 'echo "one $0" >> log.txt']
    working_dir: "{dir}"
  - name: two
    params: [x]
    command: sh
    args: ["-c", 'echo "two $0 $SUPERFLOW_WORKFLOW" >> log.txt']
    working_dir: "{dir}"
  - name: three
    params: [x]
    command: sh
    args: ["-c", 'echo "three $0" >> log.txt']
    working_dir: "{dir}"
  - name: broken
    params: [x]
    command: sh
    args: ["-c", 'echo "cannot reach $0" >&2; exit 3']
  - name: manual
    params: [x]

workflows:
  - name: pipeline
    params: [x]
    body:
      - run: one
        args: [{{ param: x }}]
        then:
          - run: two
            args: [{{ param: x }}]
      - run: three
        args: [{{ param: x }}]

  - name: fan_out
    params: [xs]
    body:
      - batch: {{ xs: x }}
        then:
          - run: one
            args: [{{ param: x }}]

  - name: failing
    params: [x]
    body:
      - run: broken
        args: [{{ param: x }}]
      - run: three
        args: [{{ param: x }}]

  - name: unhandled
    params: [x]
    body:
      - run: manual
        args: [{{ param: x }}]
"#,
        dir = log_dir.display()
    )
}

fn setup(max_concurrent_tasks: usize) -> (Arc<Engine<InMemoryStorage>>, TempDir) {
    let dir = TempDir::new().unwrap();
    let config_dir = dir.path().join("workflows");
    std::fs::create_dir(&config_dir).unwrap();
    write_file(&config_dir, "pipeline.yaml", &pipeline_yaml(dir.path()));

    let loaded = load_workflows_from_directory(&config_dir).unwrap();
    let runtime = Arc::new(loaded.local_runtime(max_concurrent_tasks));
    let engine = Arc::new(Engine::new(
        loaded.registry,
        InMemoryStorage::new(),
        runtime.clone(),
    ));
    assert!(runtime.attach(&engine));

    (engine, dir)
}

fn log_lines(dir: &TempDir) -> Vec<String> {
    std::fs::read_to_string(dir.path().join("log.txt"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Test: commands run in dependency order and the superjob completes.
#[tokio::test]
async fn test_commands_run_in_order() {
    let (engine, dir) = setup(4);

    let id = engine
        .submit("pipeline", vec![json!(7)], SubmitOptions::default())
        .await
        .unwrap();

    let superjob = wait_for_superjob_status(&engine, &id, SuperjobStatus::Complete, TIMEOUT).await;
    assert!(superjob.error.is_none());
    assert_eq!(log_lines(&dir), vec!["one 7", "two 7 pipeline", "three 7"]);
}

/// Test: every batch element runs its command.
#[tokio::test]
async fn test_batch_runs_each_element() {
    let (engine, dir) = setup(2);

    let id = engine
        .submit("fan_out", vec![json!(["a", "b", "c", "d"])], SubmitOptions::default())
        .await
        .unwrap();

    wait_for_superjob_status(&engine, &id, SuperjobStatus::Complete, TIMEOUT).await;

    let mut lines = log_lines(&dir);
    lines.sort();
    assert_eq!(lines, vec!["one a", "one b", "one c", "one d"]);
}

/// Test: a nonzero exit fails the superjob and stops its chain.
#[tokio::test]
async fn test_failed_command_fails_superjob() {
    let (engine, dir) = setup(4);

    let id = engine
        .submit("failing", vec![json!(1)], SubmitOptions::default())
        .await
        .unwrap();

    let superjob = wait_for_superjob_status(&engine, &id, SuperjobStatus::Failed, TIMEOUT).await;
    let error = superjob.error.unwrap();
    assert!(error.contains("exited with code 3"), "unexpected error: {}", error);
    assert!(error.contains("cannot reach 1"));
    assert!(error.contains("thrown in broken"));

    let records = engine.records(&id).await.unwrap();
    assert_eq!(records[0].status, TaskStatus::Failed);
    assert_eq!(records[1].status, TaskStatus::Initialized);
    assert!(log_lines(&dir).is_empty());
}

/// Test: a task type without a command is refused and fails the superjob.
#[tokio::test]
async fn test_task_without_command_is_refused() {
    let (engine, _dir) = setup(4);

    let id = engine
        .submit("unhandled", vec![json!(1)], SubmitOptions::default())
        .await
        .unwrap();

    let superjob = wait_for_superjob_status(&engine, &id, SuperjobStatus::Failed, TIMEOUT).await;
    assert!(superjob.error.unwrap().contains("manual"));
}
