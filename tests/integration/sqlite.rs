//! SQLite-backed engine tests.

#![cfg(feature = "sqlite")]

use crate::common::{ids_with_status, statuses, wait_for_superjob_status};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use superflow::execution::FnHandler;
use superflow::testing::{RecordingHandler, RecordingRuntime, fixtures};
use superflow::{
    Dispatch, Engine, LocalRuntime, RecordId, SqliteStorage, Storage, SubmitOptions,
    SuperjobStatus, TaskError, TaskKey, TaskStatus,
};
use tempfile::TempDir;
use TaskStatus::*;

async fn open(dir: &TempDir) -> SqliteStorage {
    SqliteStorage::new(dir.path().join("superflow.db")).await.unwrap()
}

/// Test: the batch scenario runs identically over SQLite.
#[tokio::test]
async fn test_batch_over_sqlite() {
    let dir = TempDir::new().unwrap();
    let runtime = Arc::new(RecordingRuntime::new());
    let engine = Engine::new(fixtures::batch_registry(), open(&dir).await, runtime.clone());

    let id = engine
        .submit("batch_users", vec![json!([7, 8])], SubmitOptions::default())
        .await
        .unwrap();

    assert_eq!(ids_with_status(&engine, &id, Running).await, vec![1, 2, 5]);
    assert_eq!(ids_with_status(&engine, &id, Queued).await, vec![3, 6]);
    assert_eq!(ids_with_status(&engine, &id, Initialized).await, vec![4, 7]);

    for record in [3u32, 6, 4, 7] {
        engine
            .on_complete(&TaskKey::new(id.clone(), RecordId::new(record)))
            .await
            .unwrap();
    }

    assert!(statuses(&engine, &id).await.iter().all(|s| *s == Complete));
    assert_eq!(
        engine.superjob(&id).await.unwrap().status,
        SuperjobStatus::Complete
    );

    let dispatched: Vec<_> = runtime
        .dispatches()
        .await
        .into_iter()
        .map(|d| (d.task_type, d.args))
        .collect();
    assert_eq!(
        dispatched,
        vec![
            ("A".to_string(), vec![json!(7)]),
            ("A".to_string(), vec![json!(8)]),
            ("B".to_string(), vec![json!(7)]),
            ("B".to_string(), vec![json!(8)]),
        ]
    );
}

/// Test: a superjob survives reopening the database and finishes afterwards.
#[tokio::test]
async fn test_progress_persists_across_reopen() {
    let dir = TempDir::new().unwrap();

    let (id, pending) = {
        let runtime = Arc::new(RecordingRuntime::new());
        let storage = open(&dir).await;
        let engine = Engine::new(fixtures::complex_registry(), storage, runtime.clone());
        let id = engine
            .submit("complex", vec![json!(1), json!(2)], SubmitOptions::new().with_label("nightly"))
            .await
            .unwrap();
        engine
            .on_complete(&TaskKey::new(id.clone(), RecordId::new(1)))
            .await
            .unwrap();
        engine.storage().close().await;
        (id, runtime.take().await)
    };
    assert_eq!(pending.len(), 2);

    let runtime = Arc::new(RecordingRuntime::new());
    let engine = Engine::new(fixtures::complex_registry(), open(&dir).await, runtime.clone());

    let superjob = engine.superjob(&id).await.unwrap();
    assert_eq!(superjob.label.as_deref(), Some("nightly"));
    assert_eq!(superjob.status, SuperjobStatus::Running);
    assert_eq!(
        statuses(&engine, &id).await,
        vec![Complete, Queued, Initialized, Initialized, Initialized]
    );

    for record in [2u32, 3, 4, 5] {
        engine
            .on_complete(&TaskKey::new(id.clone(), RecordId::new(record)))
            .await
            .unwrap();
    }

    assert_eq!(
        engine.superjob(&id).await.unwrap().status,
        SuperjobStatus::Complete
    );
    let ids: Vec<_> = runtime
        .dispatches()
        .await
        .into_iter()
        .map(|d| d.key.record_id.get())
        .collect();
    assert_eq!(ids, vec![3, 4, 5]);
}

/// Test: deleting on completion removes the rows but keeps the superjob.
#[tokio::test]
async fn test_delete_records_on_completion() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::new(
        fixtures::batch_registry(),
        open(&dir).await,
        Arc::new(RecordingRuntime::new()),
    )
    .with_delete_records_on_completion(true);

    let id = engine
        .submit("batch_users", vec![json!([1])], SubmitOptions::default())
        .await
        .unwrap();
    for record in [3u32, 4] {
        engine
            .on_complete(&TaskKey::new(id.clone(), RecordId::new(record)))
            .await
            .unwrap();
    }

    assert!(engine.records(&id).await.unwrap().is_empty());
    assert_eq!(
        engine.superjob(&id).await.unwrap().status,
        SuperjobStatus::Complete
    );
    assert!(engine.storage().list_records(&id).await.unwrap().is_empty());
}

/// Test: engines sharing one database complete each composite once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_database_with_local_runtimes() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(fixtures::batch_registry());
    let storage = Arc::new(open(&dir).await);
    let events = Arc::new(RecordingHandler::new());

    let mut engines = Vec::new();
    for _ in 0..2 {
        let ok = |_: &Dispatch| -> Result<(), TaskError> { Ok(()) };
        let runtime = Arc::new(
            LocalRuntime::new(4)
                .with_handler("A", FnHandler::new(ok))
                .with_handler("B", FnHandler::new(ok)),
        );
        let engine = Arc::new(Engine::with_storage(
            registry.clone(),
            storage.clone(),
            runtime.clone(),
        ));
        assert!(runtime.attach(&engine));
        engine.event_bus().register(events.clone()).await;
        engines.push(engine);
    }

    let mut ids = Vec::new();
    for (i, engine) in engines.iter().enumerate() {
        let users: Vec<_> = (0..6).map(|u| json!(u + 10 * i)).collect();
        ids.push(
            engine
                .submit("batch_users", vec![json!(users)], SubmitOptions::default())
                .await
                .unwrap(),
        );
    }

    for (engine, id) in engines.iter().zip(&ids) {
        wait_for_superjob_status(engine, id, SuperjobStatus::Complete, Duration::from_secs(10)).await;
    }
    assert_eq!(events.count_superjob_completed().await, 2);
    assert_eq!(storage.list_superjobs().await.unwrap().len(), 2);
}
