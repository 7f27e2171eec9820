//! In-process job runtime.

use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::Semaphore;

use super::handler::{TaskError, TaskHandler};
use crate::engine::{CompletionListener, Dispatch, JobRuntime, RuntimeError};

/// Runs dispatched tasks on spawned tokio tasks.
///
/// Each task type maps to one [`TaskHandler`]. At most
/// `max_concurrent_tasks` handlers run at once; further dispatches are
/// accepted immediately and wait for a permit. Outcomes are reported to the
/// attached [`CompletionListener`], which is held weakly so the engine that
/// owns this runtime can be dropped.
///
/// # Example
///
/// ```ignore
/// let runtime = Arc::new(LocalRuntime::new(4).with_handler("echo", CommandHandler::builder("echo").build()));
/// let engine = Arc::new(Engine::new(registry, InMemoryStorage::new(), runtime.clone()));
/// runtime.attach(&engine);
/// ```
pub struct LocalRuntime {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    max_concurrent_tasks: usize,
    semaphore: Arc<Semaphore>,
    listener: OnceLock<Weak<dyn CompletionListener>>,
}

impl LocalRuntime {
    /// Create a runtime with the given concurrency limit.
    pub fn new(max_concurrent_tasks: usize) -> Self {
        let max_concurrent_tasks = max_concurrent_tasks.max(1);
        Self {
            handlers: HashMap::new(),
            max_concurrent_tasks,
            semaphore: Arc::new(Semaphore::new(max_concurrent_tasks)),
            listener: OnceLock::new(),
        }
    }

    /// Register the handler for a task type, replacing any previous one.
    pub fn register(&mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(task_type.into(), handler);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_handler(
        mut self,
        task_type: impl Into<String>,
        handler: impl TaskHandler + 'static,
    ) -> Self {
        self.register(task_type, Arc::new(handler));
        self
    }

    /// Whether a handler is registered for the task type.
    pub fn has_handler(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// Registered task types, sorted.
    pub fn task_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Get the maximum concurrency limit.
    pub fn max_concurrent_tasks(&self) -> usize {
        self.max_concurrent_tasks
    }

    /// Get the number of available permits.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Attach the listener task outcomes are reported to.
    ///
    /// Returns `false` if a listener was already attached.
    pub fn attach<L>(&self, listener: &Arc<L>) -> bool
    where
        L: CompletionListener + 'static,
    {
        let weak: Weak<dyn CompletionListener> = Arc::downgrade(listener) as Weak<dyn CompletionListener>;
        let attached = self.listener.set(weak).is_ok();
        if !attached {
            tracing::warn!("Completion listener already attached, ignoring");
        }
        attached
    }
}

impl Default for LocalRuntime {
    fn default() -> Self {
        Self::new(4)
    }
}

#[async_trait]
impl JobRuntime for LocalRuntime {
    async fn dispatch(&self, dispatch: Dispatch) -> Result<(), RuntimeError> {
        let handler = self
            .handlers
            .get(&dispatch.task_type)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownTaskType(dispatch.task_type.clone()))?;
        let listener = self
            .listener
            .get()
            .cloned()
            .ok_or_else(|| RuntimeError::Unavailable("no completion listener attached".into()))?;
        let semaphore = self.semaphore.clone();

        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };

            tracing::debug!(key = %dispatch.key, task_type = %dispatch.task_type, "Running task");
            let dispatch = Arc::new(dispatch);
            let running = {
                let dispatch = dispatch.clone();
                tokio::spawn(async move { handler.run(&dispatch).await })
            };
            let result = match running.await {
                Ok(result) => result,
                Err(err) if err.is_panic() => Err(TaskError::Panicked(panic_message(err.into_panic()))),
                Err(err) => Err(TaskError::ExecutionFailed(err.to_string())),
            };

            let Some(listener) = listener.upgrade() else {
                tracing::warn!(key = %dispatch.key, "Listener dropped before task finished");
                return;
            };

            let reported = match result {
                Ok(()) => listener.on_complete(&dispatch.key).await,
                Err(err) => {
                    tracing::warn!(key = %dispatch.key, error = %err, "Task failed");
                    listener.on_failure(&dispatch.key, &err.to_string()).await
                }
            };
            if let Err(err) = reported {
                tracing::error!(key = %dispatch.key, error = %err, "Failed to report task outcome");
            }
        });

        Ok(())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
