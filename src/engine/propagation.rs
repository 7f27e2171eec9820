//! Engine implementation.
//!
//! Every reaction runs as a small work queue of activation and advance
//! steps over one superjob's records. Reactions for the same superjob are
//! serialized by a per-superjob lock; the store's compare-and-set operations
//! keep concurrent engines sharing a store from repeating a transition or a
//! bubble. Dispatches and events are collected while the lock is held and
//! delivered once it is released, so a runtime may call back into the
//! engine from inside `dispatch`.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use super::options::{SubmitOptions, split_trailing_options};
use super::runtime::{CompletionListener, Dispatch, JobRuntime};
use super::EngineError;
use crate::core::compiler::compile;
use crate::core::definition::WorkflowRegistry;
use crate::core::error::WorkflowError;
use crate::core::record::{TaskRecord, TaskStatus};
use crate::core::tree::TreeBuilder;
use crate::core::types::{RecordId, SuperjobId, TaskKey};
use crate::events::{Event, EventBus};
use crate::storage::{InMemoryStorage, Storage, StorageError, StoredSuperjob};

/// One unit of propagation work.
enum Step {
    /// Make a record eligible to run.
    Activate(RecordId),
    /// A record finished; continue its chain or bubble to its parent.
    Advance(TaskRecord),
}

/// Side effects collected during a reaction.
#[derive(Default)]
struct Outcome {
    dispatches: Vec<Dispatch>,
    events: Vec<Event>,
    superjob_complete: bool,
}

impl Outcome {
    fn merge(&mut self, other: Outcome) {
        self.dispatches.extend(other.dispatches);
        self.events.extend(other.events);
        self.superjob_complete |= other.superjob_complete;
    }
}

type LockTable = Mutex<HashMap<SuperjobId, Arc<tokio::sync::Mutex<()>>>>;

/// Holds one superjob's lock. Dropping it removes the table entry once no
/// other reaction holds or waits on it.
struct SuperjobGuard<'a> {
    locks: &'a LockTable,
    id: SuperjobId,
    lock: Arc<tokio::sync::Mutex<()>>,
    held: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for SuperjobGuard<'_> {
    fn drop(&mut self) {
        self.held.take();
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Clones are only taken under the table lock: two references means
        // the table's and ours.
        let idle = locks
            .get(&self.id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &self.lock) && Arc::strong_count(entry) == 2);
        if idle {
            locks.remove(&self.id);
        }
    }
}

/// Submits superjobs and propagates completion through their records.
pub struct Engine<S: Storage> {
    registry: Arc<WorkflowRegistry>,
    storage: Arc<S>,
    runtime: Arc<dyn JobRuntime>,
    event_bus: Arc<EventBus>,
    /// Used when a submission does not say.
    delete_records_on_completion: bool,
    locks: LockTable,
}

impl<S: Storage + 'static> Engine<S> {
    /// Create an engine owning its registry and storage.
    pub fn new(registry: WorkflowRegistry, storage: S, runtime: Arc<dyn JobRuntime>) -> Self {
        Self::with_storage(Arc::new(registry), Arc::new(storage), runtime)
    }

    /// Create an engine over shared registry and storage.
    pub fn with_storage(
        registry: Arc<WorkflowRegistry>,
        storage: Arc<S>,
        runtime: Arc<dyn JobRuntime>,
    ) -> Self {
        Self {
            registry,
            storage,
            runtime,
            event_bus: Arc::new(EventBus::new()),
            delete_records_on_completion: false,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Set the event bus.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Arc::new(event_bus);
        self
    }

    /// Set the default for deleting records on completion.
    pub fn with_delete_records_on_completion(mut self, delete: bool) -> Self {
        self.delete_records_on_completion = delete;
        self
    }

    /// Get the event bus.
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Get the workflow registry.
    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    /// Get the storage backend.
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Get a superjob by ID.
    pub async fn superjob(&self, id: &SuperjobId) -> Result<StoredSuperjob, EngineError> {
        match self.storage.get_superjob(id).await {
            Ok(superjob) => Ok(superjob),
            Err(StorageError::NotFound(_)) => Err(EngineError::SuperjobNotFound(id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    /// List all superjobs, oldest first.
    pub async fn superjobs(&self) -> Result<Vec<StoredSuperjob>, EngineError> {
        Ok(self.storage.list_superjobs().await?)
    }

    /// List the task records of a superjob.
    pub async fn records(&self, id: &SuperjobId) -> Result<Vec<TaskRecord>, EngineError> {
        self.superjob(id).await?;
        Ok(self.storage.list_records(id).await?)
    }

    /// Submit a workflow with positional arguments.
    ///
    /// The tree is built and compiled, the head is activated against a
    /// staging store, and the resulting snapshot is persisted in one insert
    /// before anything is dispatched. Nothing is persisted on error.
    pub async fn submit(
        &self,
        workflow: &str,
        args: Vec<Value>,
        options: SubmitOptions,
    ) -> Result<SuperjobId, EngineError> {
        let definition = self
            .registry
            .workflow(workflow)
            .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow.to_string()))?;

        if args.len() != definition.params().len() {
            return Err(WorkflowError::WrongArgumentCount {
                workflow: workflow.to_string(),
                expected: definition.params().len(),
                given: args.len(),
            }
            .into());
        }

        let tree = TreeBuilder::new(&self.registry).build(definition)?;
        let superjob_id = SuperjobId::generate();
        let bound: HashMap<String, Value> = definition
            .params()
            .iter()
            .cloned()
            .zip(args.iter().cloned())
            .collect();

        let mut records = compile(&tree, &superjob_id, &bound)?;
        if let Some(meta) = &options.meta {
            for record in &mut records {
                record.meta = Some(meta.clone());
            }
        }
        let record_count = records.len();

        let staging = InMemoryStorage::with_records(records);
        let mut outcome = Outcome::default();
        propagate(
            &staging,
            &superjob_id,
            VecDeque::from([Step::Activate(RecordId::FIRST)]),
            &mut outcome,
        )
        .await?;
        let records = staging.list_records(&superjob_id).await?;

        let superjob = StoredSuperjob::new(superjob_id.clone(), workflow, args)
            .with_label(options.label)
            .with_delete_records_on_completion(
                options
                    .delete_records_on_completion
                    .unwrap_or(self.delete_records_on_completion),
            );
        let label = superjob.label.clone();

        self.storage.insert_records(records).await?;
        self.storage.save_superjob(superjob).await?;

        tracing::info!(
            superjob_id = %superjob_id,
            workflow = %workflow,
            records = record_count,
            "Superjob submitted"
        );
        outcome.events.insert(
            0,
            Event::superjob_submitted(superjob_id.clone(), workflow, label, record_count),
        );

        if outcome.superjob_complete {
            let _guard = self.lock_superjob(&superjob_id).await;
            self.finish_superjob(&superjob_id, &mut outcome).await?;
        }

        self.deliver(outcome).await;
        Ok(superjob_id)
    }

    /// Submit a workflow whose last argument may be an options object.
    pub async fn submit_with_trailing_options(
        &self,
        workflow: &str,
        args: Vec<Value>,
    ) -> Result<SuperjobId, EngineError> {
        let arity = self
            .registry
            .workflow(workflow)
            .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow.to_string()))?
            .params()
            .len();
        let (args, options) = split_trailing_options(arity, args)?;
        self.submit(workflow, args, options).await
    }

    /// Handle a successful task.
    ///
    /// A repeated callback for an already complete task is ignored.
    pub async fn on_complete(&self, key: &TaskKey) -> Result<(), EngineError> {
        let outcome = {
            let _guard = self.lock_superjob(&key.superjob_id).await;
            self.complete_locked(key).await?
        };
        self.deliver(outcome).await;
        Ok(())
    }

    /// Handle a failed task.
    ///
    /// The failed record's chain stops there. Independent batch chains keep
    /// running. A repeated callback for an already failed task is ignored.
    pub async fn on_failure(&self, key: &TaskKey, error: &str) -> Result<(), EngineError> {
        let outcome = {
            let _guard = self.lock_superjob(&key.superjob_id).await;
            self.fail_locked(key, error).await?
        };
        self.deliver(outcome).await;
        Ok(())
    }

    /// Serialize reactions for one superjob within this engine.
    async fn lock_superjob(&self, id: &SuperjobId) -> SuperjobGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(id.clone()).or_default().clone()
        };
        let mut guard = SuperjobGuard {
            locks: &self.locks,
            id: id.clone(),
            lock: lock.clone(),
            held: None,
        };
        guard.held = Some(lock.lock_owned().await);
        guard
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    async fn load_record(&self, key: &TaskKey) -> Result<TaskRecord, EngineError> {
        match self.storage.get_record(&key.superjob_id, key.record_id).await {
            Ok(record) => Ok(record),
            Err(StorageError::NotFound(_)) => {
                tracing::error!(task = %key, "Callback for a task with no record");
                Err(EngineError::UnknownTask(key.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn complete_locked(&self, key: &TaskKey) -> Result<Outcome, EngineError> {
        let record = self.load_record(key).await?;
        match record.status {
            TaskStatus::Queued => {}
            TaskStatus::Complete => {
                tracing::warn!(task = %key, "Duplicate completion ignored");
                return Ok(Outcome::default());
            }
            status => {
                return Err(EngineError::InvalidTransition {
                    key: key.clone(),
                    status,
                    action: "complete",
                });
            }
        }

        let superjob_id = &key.superjob_id;
        if !self
            .storage
            .transition_status(superjob_id, record.id, TaskStatus::Queued, TaskStatus::Complete)
            .await?
        {
            tracing::warn!(task = %key, "Task was completed concurrently, ignoring");
            return Ok(Outcome::default());
        }
        tracing::debug!(task = %key, task_type = %record.task_type, "Task complete");

        let mut outcome = Outcome::default();
        outcome.events.push(Event::task_completed(
            key.clone(),
            &record.task_type,
            &record.workflow,
        ));

        let step = match record.first_child() {
            Some(child) => Step::Activate(child),
            None => {
                let mut record = record;
                record.status = TaskStatus::Complete;
                Step::Advance(record)
            }
        };
        propagate(&*self.storage, superjob_id, VecDeque::from([step]), &mut outcome).await?;

        if outcome.superjob_complete {
            self.finish_superjob(superjob_id, &mut outcome).await?;
        }
        Ok(outcome)
    }

    async fn fail_locked(&self, key: &TaskKey, error: &str) -> Result<Outcome, EngineError> {
        let record = self.load_record(key).await?;
        match record.status {
            TaskStatus::Queued => {}
            TaskStatus::Failed => {
                tracing::warn!(task = %key, "Duplicate failure ignored");
                return Ok(Outcome::default());
            }
            status => {
                return Err(EngineError::InvalidTransition {
                    key: key.clone(),
                    status,
                    action: "fail",
                });
            }
        }

        let superjob_id = &key.superjob_id;
        if !self
            .storage
            .transition_status(superjob_id, record.id, TaskStatus::Queued, TaskStatus::Failed)
            .await?
        {
            tracing::warn!(task = %key, "Task was settled concurrently, ignoring failure");
            return Ok(Outcome::default());
        }
        tracing::warn!(task = %key, task_type = %record.task_type, error = %error, "Task failed");

        let mut outcome = Outcome::default();
        outcome.events.push(Event::task_failed(
            key.clone(),
            &record.task_type,
            &record.workflow,
            error,
        ));

        let message = format!("{} (thrown in {}, task: {})", error, record.task_type, key);
        if self.storage.fail_superjob(superjob_id, &message).await? {
            tracing::error!(superjob_id = %superjob_id, workflow = %record.workflow, error = %message, "Superjob failed");
            outcome.events.push(Event::superjob_failed(
                superjob_id.clone(),
                &record.workflow,
                message,
            ));
        } else {
            tracing::debug!(superjob_id = %superjob_id, "Superjob already settled, keeping its first failure");
        }
        Ok(outcome)
    }

    async fn finish_superjob(
        &self,
        superjob_id: &SuperjobId,
        outcome: &mut Outcome,
    ) -> Result<(), EngineError> {
        if !self.storage.complete_superjob(superjob_id).await? {
            tracing::debug!(superjob_id = %superjob_id, "Superjob already settled");
            return Ok(());
        }
        let superjob = self.storage.get_superjob(superjob_id).await?;
        tracing::info!(superjob_id = %superjob_id, workflow = %superjob.workflow, "Superjob complete");
        outcome.events.push(Event::superjob_completed(
            superjob_id.clone(),
            &superjob.workflow,
            superjob.duration(),
        ));

        if superjob.delete_records_on_completion {
            let deleted = self.storage.delete_records(superjob_id).await?;
            tracing::debug!(superjob_id = %superjob_id, deleted, "Deleted task records");
        }
        Ok(())
    }

    /// Emit collected events and hand collected dispatches to the runtime.
    ///
    /// A refused dispatch fails its record, which may produce more events.
    async fn deliver(&self, mut outcome: Outcome) {
        loop {
            for event in outcome.events.drain(..) {
                self.event_bus.emit(event).await;
            }

            let mut refused = Vec::new();
            for dispatch in std::mem::take(&mut outcome.dispatches) {
                let key = dispatch.key.clone();
                self.event_bus
                    .emit(Event::task_dispatched(
                        key.clone(),
                        &dispatch.task_type,
                        &dispatch.workflow,
                    ))
                    .await;
                tracing::debug!(task = %key, task_type = %dispatch.task_type, "Dispatching task");
                if let Err(e) = self.runtime.dispatch(dispatch).await {
                    tracing::warn!(task = %key, error = %e, "Runtime refused dispatch");
                    refused.push((key, e.to_string()));
                }
            }

            if refused.is_empty() {
                break;
            }
            for (key, error) in refused {
                let result = {
                    let _guard = self.lock_superjob(&key.superjob_id).await;
                    self.fail_locked(&key, &error).await
                };
                match result {
                    Ok(more) => outcome.merge(more),
                    Err(e) => {
                        tracing::error!(task = %key, error = %e, "Failed to record refused dispatch")
                    }
                }
            }
        }
    }
}

#[async_trait]
impl<S: Storage + 'static> CompletionListener for Engine<S> {
    async fn on_complete(&self, key: &TaskKey) -> Result<(), EngineError> {
        Engine::on_complete(self, key).await
    }

    async fn on_failure(&self, key: &TaskKey, error: &str) -> Result<(), EngineError> {
        Engine::on_failure(self, key, error).await
    }
}

/// Run activation and advance steps until the queue drains.
///
/// Steps are processed in order, so leaves are dispatched in ascending id
/// order within one reaction.
async fn propagate<St: Storage + ?Sized>(
    store: &St,
    superjob_id: &SuperjobId,
    mut steps: VecDeque<Step>,
    outcome: &mut Outcome,
) -> Result<(), EngineError> {
    while let Some(step) = steps.pop_front() {
        match step {
            Step::Activate(id) => {
                let record = store.get_record(superjob_id, id).await?;

                if record.is_leaf() {
                    if store
                        .transition_status(superjob_id, id, TaskStatus::Initialized, TaskStatus::Queued)
                        .await?
                    {
                        tracing::debug!(superjob_id = %superjob_id, record_id = %id, task_type = %record.task_type, "Task queued");
                        outcome.dispatches.push(Dispatch::from(&record));
                    } else {
                        tracing::warn!(superjob_id = %superjob_id, record_id = %id, status = %record.status, "Skipping activation of a task that is not initialized");
                    }
                    continue;
                }

                if !store
                    .transition_status(superjob_id, id, TaskStatus::Initialized, TaskStatus::Running)
                    .await?
                {
                    tracing::warn!(superjob_id = %superjob_id, record_id = %id, status = %record.status, "Skipping activation of a composite that is not initialized");
                    continue;
                }
                tracing::debug!(superjob_id = %superjob_id, record_id = %id, kind = %record.kind, "Composite running");

                if record.children_ids.is_empty() {
                    // Nothing to wait for: an empty batch
                    if store.claim_descendants_complete(superjob_id, id).await? {
                        store
                            .transition_status(superjob_id, id, TaskStatus::Running, TaskStatus::Complete)
                            .await?;
                        let mut record = record;
                        record.status = TaskStatus::Complete;
                        record.descendants_complete = true;
                        steps.push_back(Step::Advance(record));
                    }
                } else if record.is_batch() {
                    steps.extend(record.children_ids.iter().copied().map(Step::Activate));
                } else if let Some(first) = record.first_child() {
                    steps.push_back(Step::Activate(first));
                }
            }
            Step::Advance(record) => {
                if let Some(next) = record.next_id {
                    steps.push_back(Step::Activate(next));
                    continue;
                }

                let Some(parent_id) = record.parent_id else {
                    outcome.superjob_complete = true;
                    continue;
                };

                let parent = store.get_record(superjob_id, parent_id).await?;
                if parent.is_batch() {
                    let elements = store.list_children(superjob_id, parent_id).await?;
                    let pending = elements
                        .iter()
                        .filter(|e| e.status != TaskStatus::Complete)
                        .count();
                    if pending > 0 {
                        tracing::debug!(superjob_id = %superjob_id, record_id = %parent_id, pending, "Batch waiting for element chains");
                        continue;
                    }
                }

                if !store.claim_descendants_complete(superjob_id, parent_id).await? {
                    tracing::debug!(superjob_id = %superjob_id, record_id = %parent_id, "Completion already bubbled");
                    continue;
                }
                // Composites are running here; a task owning dependent work
                // is already complete.
                store
                    .transition_status(superjob_id, parent_id, TaskStatus::Running, TaskStatus::Complete)
                    .await?;
                tracing::debug!(superjob_id = %superjob_id, record_id = %parent_id, "Completion bubbled");

                let mut parent = parent;
                parent.status = TaskStatus::Complete;
                parent.descendants_complete = true;
                steps.push_back(Step::Advance(parent));
            }
        }
    }
    Ok(())
}
