//! Testing utilities for users of the superflow library.
//!
//! This module provides helpers for driving the engine by hand:
//!
//! - [`RecordingRuntime`]: A job runtime that records dispatches instead of running them
//! - [`RecordingHandler`]: An event handler that keeps every event
//! - [`TestHarness`]: An in-memory engine wired to both
//! - [`fixtures`]: Registries for the common workflow shapes

pub mod fixtures;

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::core::definition::WorkflowRegistry;
use crate::core::record::TaskStatus;
use crate::core::types::{SuperjobId, TaskKey};
use crate::engine::{Dispatch, Engine, EngineError, JobRuntime, RuntimeError};
use crate::events::{Event, EventHandler};
use crate::storage::InMemoryStorage;

/// A job runtime that records dispatches.
///
/// Nothing runs; tests report outcomes through the engine's callbacks.
///
/// # Example
///
/// ```
/// use superflow::testing::RecordingRuntime;
///
/// let runtime = RecordingRuntime::new().rejecting("flaky");
/// # let _ = runtime;
/// ```
#[derive(Default)]
pub struct RecordingRuntime {
    dispatches: Mutex<Vec<Dispatch>>,
    rejected: HashSet<String>,
}

impl RecordingRuntime {
    /// Create a runtime that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse dispatches of this task type.
    pub fn rejecting(mut self, task_type: impl Into<String>) -> Self {
        self.rejected.insert(task_type.into());
        self
    }

    /// All accepted dispatches, in order.
    pub async fn dispatches(&self) -> Vec<Dispatch> {
        self.dispatches.lock().await.clone()
    }

    /// Keys of all accepted dispatches, rendered as strings.
    pub async fn keys(&self) -> Vec<String> {
        self.dispatches
            .lock()
            .await
            .iter()
            .map(|d| d.key.to_string())
            .collect()
    }

    /// Remove and return the accepted dispatches.
    pub async fn take(&self) -> Vec<Dispatch> {
        std::mem::take(&mut *self.dispatches.lock().await)
    }
}

#[async_trait]
impl JobRuntime for RecordingRuntime {
    async fn dispatch(&self, dispatch: Dispatch) -> Result<(), RuntimeError> {
        if self.rejected.contains(&dispatch.task_type) {
            return Err(RuntimeError::Rejected(format!(
                "{} is not accepted",
                dispatch.task_type
            )));
        }
        self.dispatches.lock().await.push(dispatch);
        Ok(())
    }
}

/// Event handler that records received events.
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events received so far.
    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    /// Number of events matching a predicate.
    pub async fn count_where(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().await.iter().filter(|e| predicate(e)).count()
    }

    pub async fn count_superjob_completed(&self) -> usize {
        self.count_where(|e| matches!(e, Event::SuperjobCompleted { .. }))
            .await
    }

    pub async fn count_superjob_failed(&self) -> usize {
        self.count_where(|e| matches!(e, Event::SuperjobFailed { .. }))
            .await
    }

    /// Keys of `TaskDispatched` events, in order.
    pub async fn dispatched_keys(&self) -> Vec<TaskKey> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                Event::TaskDispatched { key, .. } => Some(key.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}

/// An in-memory engine with a recording runtime and a recording handler.
///
/// # Example
///
/// ```ignore
/// use superflow::testing::{TestHarness, fixtures};
///
/// let harness = TestHarness::new(fixtures::complex_registry()).await;
/// let id = harness.engine.submit("complex", args, Default::default()).await?;
/// harness.complete(&id, 1).await?;
/// ```
pub struct TestHarness {
    pub engine: Arc<Engine<InMemoryStorage>>,
    pub runtime: Arc<RecordingRuntime>,
    pub events: Arc<RecordingHandler>,
}

impl TestHarness {
    /// Create a harness over a registry.
    pub async fn new(registry: WorkflowRegistry) -> Self {
        Self::with_runtime(registry, RecordingRuntime::new()).await
    }

    /// Create a harness with a configured runtime.
    pub async fn with_runtime(registry: WorkflowRegistry, runtime: RecordingRuntime) -> Self {
        let runtime = Arc::new(runtime);
        let events = Arc::new(RecordingHandler::new());
        let engine = Engine::new(registry, InMemoryStorage::new(), runtime.clone());
        engine.event_bus().register(events.clone()).await;

        Self {
            engine: Arc::new(engine),
            runtime,
            events,
        }
    }

    /// Report record `record` of `superjob` as complete.
    pub async fn complete(
        &self,
        superjob: &SuperjobId,
        record: u32,
    ) -> Result<(), EngineError> {
        let key = TaskKey::new(superjob.clone(), record.into());
        self.engine.on_complete(&key).await
    }

    /// Report record `record` of `superjob` as failed.
    pub async fn fail(
        &self,
        superjob: &SuperjobId,
        record: u32,
        error: &str,
    ) -> Result<(), EngineError> {
        let key = TaskKey::new(superjob.clone(), record.into());
        self.engine.on_failure(&key, error).await
    }

    /// Status of each record, in id order.
    pub async fn statuses(
        &self,
        superjob: &SuperjobId,
    ) -> Vec<TaskStatus> {
        self.engine
            .records(superjob)
            .await
            .map(|records| records.into_iter().map(|r| r.status).collect())
            .unwrap_or_default()
    }
}
