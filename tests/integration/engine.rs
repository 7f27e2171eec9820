//! Engine integration tests.
//!
//! These tests drive the propagation engine by hand through the recording
//! runtime and check record statuses after each callback.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use superflow::testing::{RecordingHandler, RecordingRuntime, TestHarness, fixtures};
use superflow::{
    Engine, EngineError, Event, InMemoryStorage, RecordId, Storage, StorageError, StoredSuperjob,
    SubmitOptions, SuperjobId, SuperjobStatus, TaskKey, TaskRecord, TaskStatus, WorkflowError,
};
use tokio::sync::Barrier;

use crate::common::ids_with_status;

use TaskStatus::*;

/// Test: the five-task workflow runs strictly parent before children and
/// sibling by sibling.
#[tokio::test]
async fn test_complex_workflow_runs_to_completion() {
    let harness = TestHarness::new(fixtures::complex_registry()).await;
    let id = harness
        .engine
        .submit("complex", vec![json!(100), json!(101)], SubmitOptions::default())
        .await
        .unwrap();

    assert_eq!(
        harness.statuses(&id).await,
        vec![Queued, Initialized, Initialized, Initialized, Initialized]
    );

    harness.complete(&id, 1).await.unwrap();
    assert_eq!(
        harness.statuses(&id).await,
        vec![Complete, Queued, Initialized, Initialized, Initialized]
    );

    harness.complete(&id, 2).await.unwrap();
    assert_eq!(
        harness.statuses(&id).await,
        vec![Complete, Complete, Queued, Initialized, Initialized]
    );

    harness.complete(&id, 3).await.unwrap();
    assert_eq!(
        harness.statuses(&id).await,
        vec![Complete, Complete, Complete, Queued, Initialized]
    );

    harness.complete(&id, 4).await.unwrap();
    assert_eq!(
        harness.statuses(&id).await,
        vec![Complete, Complete, Complete, Complete, Queued]
    );
    assert_eq!(
        harness.engine.superjob(&id).await.unwrap().status,
        SuperjobStatus::Running
    );

    harness.complete(&id, 5).await.unwrap();
    assert!(harness.statuses(&id).await.iter().all(|s| *s == Complete));
    assert_eq!(
        harness.engine.superjob(&id).await.unwrap().status,
        SuperjobStatus::Complete
    );
    assert_eq!(harness.events.count_superjob_completed().await, 1);

    let args: Vec<_> = harness
        .runtime
        .dispatches()
        .await
        .into_iter()
        .map(|d| (d.task_type, d.args))
        .collect();
    assert_eq!(
        args,
        vec![
            ("A".to_string(), vec![json!(100)]),
            ("B".to_string(), vec![json!(101)]),
            ("C".to_string(), vec![json!(101)]),
            ("D".to_string(), vec![json!(100)]),
            ("E".to_string(), vec![json!(100)]),
        ]
    );
}

/// Test: batch elements run in parallel, each element's chain in order.
#[tokio::test]
async fn test_batch_elements_run_in_parallel() {
    let harness = TestHarness::new(fixtures::batch_registry()).await;
    let id = harness
        .engine
        .submit("batch_users", vec![json!([7, 8])], SubmitOptions::default())
        .await
        .unwrap();

    let engine = &harness.engine;
    assert_eq!(ids_with_status(engine, &id, Running).await, vec![1, 2, 5]);
    assert_eq!(ids_with_status(engine, &id, Queued).await, vec![3, 6]);
    assert_eq!(ids_with_status(engine, &id, Initialized).await, vec![4, 7]);

    harness.complete(&id, 3).await.unwrap();
    harness.complete(&id, 4).await.unwrap();

    assert_eq!(ids_with_status(engine, &id, Complete).await, vec![2, 3, 4]);
    assert_eq!(ids_with_status(engine, &id, Queued).await, vec![6]);
    assert_eq!(ids_with_status(engine, &id, Initialized).await, vec![7]);
    assert_eq!(ids_with_status(engine, &id, Running).await, vec![1, 5]);

    harness.complete(&id, 6).await.unwrap();
    harness.complete(&id, 7).await.unwrap();
    assert!(harness.statuses(&id).await.iter().all(|s| *s == Complete));
    assert_eq!(harness.events.count_superjob_completed().await, 1);

    let records = engine.records(&id).await.unwrap();
    assert_eq!(records[2].arg_values, vec![json!(7)]);
    assert_eq!(records[5].arg_values, vec![json!(8)]);
}

/// Test: two-binding batches pair elements by index.
#[tokio::test]
async fn test_two_binding_batch_pairs_by_index() {
    let harness = TestHarness::new(fixtures::batch_registry()).await;
    harness
        .engine
        .submit(
            "pairs",
            vec![json!([1, 2]), json!([10, 20])],
            SubmitOptions::default(),
        )
        .await
        .unwrap();

    let args: Vec<_> = harness
        .runtime
        .dispatches()
        .await
        .into_iter()
        .map(|d| d.args)
        .collect();
    assert_eq!(
        args,
        vec![vec![json!(1), json!(10)], vec![json!(2), json!(20)]]
    );
}

/// Test: mismatched batch arrays are rejected before anything is stored.
#[tokio::test]
async fn test_batch_arity_mismatch_stores_nothing() {
    let harness = TestHarness::new(fixtures::batch_registry()).await;
    let result = harness
        .engine
        .submit(
            "pairs",
            vec![json!([1, 2]), json!([10, 20, 30])],
            SubmitOptions::default(),
        )
        .await;

    assert!(matches!(
        result,
        Err(EngineError::Workflow(WorkflowError::ArityMismatch { .. }))
    ));
    assert!(harness.engine.superjobs().await.unwrap().is_empty());
    assert!(harness.runtime.dispatches().await.is_empty());
}

/// Test: a nested workflow is a composite record whose follow-up statements
/// run after its inlined body.
#[tokio::test]
async fn test_nested_workflow_is_composite() {
    let harness = TestHarness::new(fixtures::nested_registry()).await;
    let id = harness
        .engine
        .submit("parent", vec![json!(1), json!(2)], SubmitOptions::default())
        .await
        .unwrap();

    let records = harness.engine.records(&id).await.unwrap();
    assert_eq!(records.len(), 4);
    assert_eq!(records[1].task_type, "child");
    assert_eq!(records[1].children_ids, vec![RecordId::new(3), RecordId::new(4)]);

    harness.complete(&id, 1).await.unwrap();
    assert_eq!(
        harness.statuses(&id).await,
        vec![Complete, Running, Queued, Initialized]
    );

    harness.complete(&id, 3).await.unwrap();
    assert_eq!(
        harness.statuses(&id).await,
        vec![Complete, Running, Complete, Queued]
    );

    harness.complete(&id, 4).await.unwrap();
    assert!(harness.statuses(&id).await.iter().all(|s| *s == Complete));

    let args: Vec<_> = harness
        .runtime
        .dispatches()
        .await
        .into_iter()
        .map(|d| (d.task_type, d.args))
        .collect();
    assert_eq!(
        args,
        vec![
            ("A".to_string(), vec![json!(1)]),
            ("C".to_string(), vec![json!(2)]),
            ("B".to_string(), vec![json!(1)]),
        ]
    );
}

/// Test: a failed task stops its chain and the superjob never completes.
#[tokio::test]
async fn test_failure_stops_propagation() {
    let harness = TestHarness::new(fixtures::complex_registry()).await;
    let id = harness
        .engine
        .submit("complex", vec![json!(1), json!(2)], SubmitOptions::default())
        .await
        .unwrap();

    harness.fail(&id, 1, "boom").await.unwrap();

    assert_eq!(
        harness.statuses(&id).await,
        vec![Failed, Initialized, Initialized, Initialized, Initialized]
    );
    let superjob = harness.engine.superjob(&id).await.unwrap();
    assert_eq!(superjob.status, SuperjobStatus::Failed);
    assert!(superjob.error.unwrap().starts_with("boom (thrown in A"));
    assert_eq!(harness.events.count_superjob_completed().await, 0);
    assert_eq!(harness.events.count_superjob_failed().await, 1);
    assert_eq!(harness.runtime.dispatches().await.len(), 1);

    let result = harness.complete(&id, 1).await;
    assert!(matches!(
        result,
        Err(EngineError::InvalidTransition { status: Failed, .. })
    ));
}

/// Test: a second failure in the same superjob keeps the first error.
#[tokio::test]
async fn test_first_failure_is_kept() {
    let harness = TestHarness::new(fixtures::batch_registry()).await;
    let id = harness
        .engine
        .submit("batch_users", vec![json!([1, 2])], SubmitOptions::default())
        .await
        .unwrap();

    harness.fail(&id, 3, "first").await.unwrap();
    harness.fail(&id, 6, "second").await.unwrap();

    let superjob = harness.engine.superjob(&id).await.unwrap();
    assert!(superjob.error.unwrap().starts_with("first"));
    assert_eq!(harness.events.count_superjob_failed().await, 1);
}

/// Test: a duplicated completion callback changes nothing.
#[tokio::test]
async fn test_duplicate_completion_is_idempotent() {
    let harness = TestHarness::new(fixtures::complex_registry()).await;
    let id = harness
        .engine
        .submit("complex", vec![json!(1), json!(2)], SubmitOptions::default())
        .await
        .unwrap();

    harness.complete(&id, 1).await.unwrap();
    let after_first = harness.statuses(&id).await;
    let dispatched = harness.runtime.dispatches().await.len();

    harness.complete(&id, 1).await.unwrap();
    assert_eq!(harness.statuses(&id).await, after_first);
    assert_eq!(harness.runtime.dispatches().await.len(), dispatched);
}

/// Test: callbacks for keys with no record fail loudly.
#[tokio::test]
async fn test_unknown_key_errors() {
    let harness = TestHarness::new(fixtures::complex_registry()).await;
    let id = harness
        .engine
        .submit("complex", vec![json!(1), json!(2)], SubmitOptions::default())
        .await
        .unwrap();

    let result = harness.complete(&id, 99).await;
    assert!(matches!(result, Err(EngineError::UnknownTask(_))));

    let stranger: TaskKey = "0123456789abcdef01234567-1".parse().unwrap();
    let result = harness.engine.on_failure(&stranger, "nope").await;
    assert!(matches!(result, Err(EngineError::UnknownTask(_))));

    assert_eq!(harness.statuses(&id).await[0], Queued);
}

/// Test: records are deleted once a superjob asking for it completes.
#[tokio::test]
async fn test_delete_records_on_completion() {
    let harness = TestHarness::new(fixtures::batch_registry()).await;
    let id = harness
        .engine
        .submit(
            "pairs",
            vec![json!([1]), json!([2])],
            SubmitOptions::new().with_delete_records_on_completion(true),
        )
        .await
        .unwrap();
    assert_eq!(harness.engine.records(&id).await.unwrap().len(), 3);

    harness.complete(&id, 3).await.unwrap();

    assert!(harness.engine.records(&id).await.unwrap().is_empty());
    let superjob = harness.engine.superjob(&id).await.unwrap();
    assert_eq!(superjob.status, SuperjobStatus::Complete);
    assert!(superjob.finished_at.is_some());
}

/// Test: records are kept by default.
#[tokio::test]
async fn test_records_kept_without_delete_option() {
    let harness = TestHarness::new(fixtures::batch_registry()).await;
    let id = harness
        .engine
        .submit("pairs", vec![json!([1]), json!([2])], SubmitOptions::default())
        .await
        .unwrap();

    harness.complete(&id, 3).await.unwrap();
    assert_eq!(harness.engine.records(&id).await.unwrap().len(), 3);
}

/// Test: an empty batch completes at submission without dispatching.
#[tokio::test]
async fn test_empty_batch_completes_at_submission() {
    let harness = TestHarness::new(fixtures::batch_registry()).await;
    let id = harness
        .engine
        .submit("batch_users", vec![json!([])], SubmitOptions::default())
        .await
        .unwrap();

    assert_eq!(
        harness.engine.superjob(&id).await.unwrap().status,
        SuperjobStatus::Complete
    );
    assert!(harness.runtime.dispatches().await.is_empty());
    assert_eq!(harness.events.count_superjob_completed().await, 1);
}

/// Test: many batch chains finishing at once bubble to the batch exactly once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_completion_bubbles_once() {
    let harness = TestHarness::new(fixtures::batch_registry()).await;
    let users: Vec<_> = (0..16).map(|i| json!(i)).collect();
    let id = harness
        .engine
        .submit("batch_users", vec![json!(users)], SubmitOptions::default())
        .await
        .unwrap();

    // Each element holds A then B: record ids 3 + 3k and 4 + 3k
    for offset in [3u32, 4u32] {
        let mut handles = Vec::new();
        for k in 0..16u32 {
            let engine = harness.engine.clone();
            let key = TaskKey::new(id.clone(), RecordId::new(offset + 3 * k));
            handles.push(tokio::spawn(async move { engine.on_complete(&key).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    }

    assert!(harness.statuses(&id).await.iter().all(|s| *s == Complete));
    assert_eq!(harness.events.count_superjob_completed().await, 1);
}

/// Test: two engines sharing one store bubble each composite exactly once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_engines_sharing_storage_bubble_once() {
    let registry = Arc::new(fixtures::batch_registry());
    let storage = Arc::new(InMemoryStorage::new());
    let events = Arc::new(RecordingHandler::new());

    let mut engines = Vec::new();
    for _ in 0..2 {
        let engine = Engine::with_storage(
            registry.clone(),
            storage.clone(),
            Arc::new(RecordingRuntime::new()),
        );
        engine.event_bus().register(events.clone()).await;
        engines.push(Arc::new(engine));
    }

    let users: Vec<_> = (0..12).map(|i| json!(i)).collect();
    let id = engines[0]
        .submit("batch_users", vec![json!(users)], SubmitOptions::default())
        .await
        .unwrap();

    for offset in [3u32, 4u32] {
        let mut handles = Vec::new();
        for k in 0..12u32 {
            let engine = engines[(k % 2) as usize].clone();
            let key = TaskKey::new(id.clone(), RecordId::new(offset + 3 * k));
            handles.push(tokio::spawn(async move { engine.on_complete(&key).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    }

    let records = engines[1].records(&id).await.unwrap();
    assert!(records.iter().all(|r| r.status == Complete));
    assert!(records.iter().all(|r| r.is_leaf() || r.descendants_complete));
    assert_eq!(events.count_superjob_completed().await, 1);
    assert_eq!(
        engines[0].superjob(&id).await.unwrap().status,
        SuperjobStatus::Complete
    );
}

/// In-memory store whose superjob failure waits until two callers arrive.
struct GatedStorage {
    inner: InMemoryStorage,
    gate: Barrier,
}

#[async_trait]
impl Storage for GatedStorage {
    async fn save_superjob(&self, superjob: StoredSuperjob) -> Result<(), StorageError> {
        self.inner.save_superjob(superjob).await
    }

    async fn get_superjob(&self, id: &SuperjobId) -> Result<StoredSuperjob, StorageError> {
        self.inner.get_superjob(id).await
    }

    async fn list_superjobs(&self) -> Result<Vec<StoredSuperjob>, StorageError> {
        self.inner.list_superjobs().await
    }

    async fn update_superjob(&self, superjob: StoredSuperjob) -> Result<(), StorageError> {
        self.inner.update_superjob(superjob).await
    }

    async fn complete_superjob(&self, id: &SuperjobId) -> Result<bool, StorageError> {
        self.inner.complete_superjob(id).await
    }

    async fn fail_superjob(&self, id: &SuperjobId, error: &str) -> Result<bool, StorageError> {
        self.gate.wait().await;
        self.inner.fail_superjob(id, error).await
    }

    async fn insert_records(&self, records: Vec<TaskRecord>) -> Result<(), StorageError> {
        self.inner.insert_records(records).await
    }

    async fn get_record(
        &self,
        superjob_id: &SuperjobId,
        id: RecordId,
    ) -> Result<TaskRecord, StorageError> {
        self.inner.get_record(superjob_id, id).await
    }

    async fn list_records(
        &self,
        superjob_id: &SuperjobId,
    ) -> Result<Vec<TaskRecord>, StorageError> {
        self.inner.list_records(superjob_id).await
    }

    async fn list_children(
        &self,
        superjob_id: &SuperjobId,
        parent_id: RecordId,
    ) -> Result<Vec<TaskRecord>, StorageError> {
        self.inner.list_children(superjob_id, parent_id).await
    }

    async fn transition_status(
        &self,
        superjob_id: &SuperjobId,
        id: RecordId,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<bool, StorageError> {
        self.inner.transition_status(superjob_id, id, from, to).await
    }

    async fn claim_descendants_complete(
        &self,
        superjob_id: &SuperjobId,
        id: RecordId,
    ) -> Result<bool, StorageError> {
        self.inner.claim_descendants_complete(superjob_id, id).await
    }

    async fn delete_records(&self, superjob_id: &SuperjobId) -> Result<usize, StorageError> {
        self.inner.delete_records(superjob_id).await
    }
}

/// Test: two engines failing different tasks of one superjob at the same
/// moment report the superjob failure once and agree on the stored error.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_engines_sharing_storage_fail_superjob_once() {
    let registry = Arc::new(fixtures::batch_registry());
    let storage = Arc::new(GatedStorage {
        inner: InMemoryStorage::new(),
        gate: Barrier::new(2),
    });
    let events = Arc::new(RecordingHandler::new());

    let mut engines = Vec::new();
    for _ in 0..2 {
        let engine = Engine::with_storage(
            registry.clone(),
            storage.clone(),
            Arc::new(RecordingRuntime::new()),
        );
        engine.event_bus().register(events.clone()).await;
        engines.push(Arc::new(engine));
    }

    // batch(1) { element(2) { A(3) B(4) } element(5) { A(6) B(7) } }
    let id = engines[0]
        .submit("batch_users", vec![json!([1, 2])], SubmitOptions::default())
        .await
        .unwrap();

    let failures = [(3, "first"), (6, "second")];
    let mut handles = Vec::new();
    for (engine, (record, error)) in engines.iter().cloned().zip(failures) {
        let key = TaskKey::new(id.clone(), RecordId::new(record));
        handles.push(tokio::spawn(async move { engine.on_failure(&key, error).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(events.count_superjob_failed().await, 1);
    let reported = events
        .events()
        .await
        .into_iter()
        .find_map(|event| match event {
            Event::SuperjobFailed { error, .. } => Some(error),
            _ => None,
        })
        .unwrap();

    let superjob = engines[1].superjob(&id).await.unwrap();
    assert_eq!(superjob.status, SuperjobStatus::Failed);
    let stored = superjob.error.unwrap();
    assert!(stored.starts_with("first") || stored.starts_with("second"));
    assert_eq!(stored, reported);

    assert_eq!(ids_with_status(&engines[0], &id, Failed).await, vec![3, 6]);
}

/// Test: options trailing the positional arguments are stored with the superjob.
#[tokio::test]
async fn test_trailing_options_and_meta() {
    let harness = TestHarness::new(fixtures::complex_registry()).await;
    let id = harness
        .engine
        .submit_with_trailing_options(
            "complex",
            vec![
                json!(1),
                json!(2),
                json!({"name": "nightly", "meta": {"origin": "cron"}}),
            ],
        )
        .await
        .unwrap();

    let superjob = harness.engine.superjob(&id).await.unwrap();
    assert_eq!(superjob.label.as_deref(), Some("nightly"));
    assert_eq!(superjob.args, vec![json!(1), json!(2)]);

    let dispatch = &harness.runtime.dispatches().await[0];
    assert_eq!(dispatch.meta, Some(json!({"origin": "cron"})));
    assert_eq!(dispatch.workflow, "complex");
}

/// Test: superjob ids are unique and never sequential.
#[tokio::test]
async fn test_superjob_ids_are_unique() {
    let harness = TestHarness::new(fixtures::complex_registry()).await;
    let mut seen = HashSet::new();
    for _ in 0..20 {
        let id = harness
            .engine
            .submit("complex", vec![json!(1), json!(2)], SubmitOptions::default())
            .await
            .unwrap();
        assert_eq!(id.as_str().len(), 24);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert!(seen.insert(id));
    }
}
