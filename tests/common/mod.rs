//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;
use superflow::{Engine, Storage, StoredSuperjob, SuperjobId, SuperjobStatus, TaskStatus};

/// Wait for a superjob to reach an expected status, polling storage.
///
/// Polls every 10ms and times out after the specified duration.
///
/// # Panics
///
/// Panics if the timeout is reached before the superjob reaches the expected status.
pub async fn wait_for_superjob_status<S: Storage + 'static>(
    engine: &Engine<S>,
    id: &SuperjobId,
    expected: SuperjobStatus,
    timeout: Duration,
) -> StoredSuperjob {
    let start = tokio::time::Instant::now();
    loop {
        let superjob = engine.superjob(id).await.unwrap();
        if superjob.status == expected {
            return superjob;
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for superjob {} to reach {:?}, current status: {:?}",
                id, expected, superjob.status
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Status of each record, in id order.
pub async fn statuses<S: Storage + 'static>(engine: &Engine<S>, id: &SuperjobId) -> Vec<TaskStatus> {
    engine
        .records(id)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.status)
        .collect()
}

/// Record ids (1-based) currently in the given status.
pub async fn ids_with_status<S: Storage + 'static>(
    engine: &Engine<S>,
    id: &SuperjobId,
    status: TaskStatus,
) -> Vec<u32> {
    engine
        .records(id)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.status == status)
        .map(|r| r.id.get())
        .collect()
}

/// Write a file into a workflow directory.
pub fn write_file(dir: &Path, name: &str, contents: &str) {
    std::fs::write(dir.join(name), contents).unwrap();
}
