//! Lifecycle events and event handling.
//!
//! This module provides event emission for superjob and task lifecycle
//! events. Handlers are the monitoring hook: an engine with no handlers
//! registered behaves exactly the same.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::types::{SuperjobId, TaskKey};

/// Lifecycle events emitted by the propagation engine.
#[derive(Debug, Clone)]
pub enum Event {
    /// A superjob was compiled, persisted and activated.
    SuperjobSubmitted {
        superjob_id: SuperjobId,
        workflow: String,
        label: Option<String>,
        /// Number of task records created.
        records: usize,
        timestamp: Instant,
    },

    /// A leaf task was handed to the job runtime.
    TaskDispatched {
        key: TaskKey,
        task_type: String,
        workflow: String,
        timestamp: Instant,
    },

    /// The job runtime reported a task as successful.
    TaskCompleted {
        key: TaskKey,
        task_type: String,
        workflow: String,
        timestamp: Instant,
    },

    /// The job runtime reported a task as failed.
    TaskFailed {
        key: TaskKey,
        task_type: String,
        workflow: String,
        error: String,
        timestamp: Instant,
    },

    /// The root chain of a superjob finished.
    SuperjobCompleted {
        superjob_id: SuperjobId,
        workflow: String,
        /// Time since submission, when known.
        duration: Option<Duration>,
        timestamp: Instant,
    },

    /// A task failure stalled a superjob.
    SuperjobFailed {
        superjob_id: SuperjobId,
        workflow: String,
        /// Failure message including the task type and key.
        error: String,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::SuperjobSubmitted { timestamp, .. } => *timestamp,
            Event::TaskDispatched { timestamp, .. } => *timestamp,
            Event::TaskCompleted { timestamp, .. } => *timestamp,
            Event::TaskFailed { timestamp, .. } => *timestamp,
            Event::SuperjobCompleted { timestamp, .. } => *timestamp,
            Event::SuperjobFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Superjob the event belongs to.
    pub fn superjob_id(&self) -> &SuperjobId {
        match self {
            Event::SuperjobSubmitted { superjob_id, .. }
            | Event::SuperjobCompleted { superjob_id, .. }
            | Event::SuperjobFailed { superjob_id, .. } => superjob_id,
            Event::TaskDispatched { key, .. }
            | Event::TaskCompleted { key, .. }
            | Event::TaskFailed { key, .. } => &key.superjob_id,
        }
    }

    /// Returns true for the two events that end a superjob.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::SuperjobCompleted { .. } | Event::SuperjobFailed { .. }
        )
    }

    /// Create a SuperjobSubmitted event.
    pub fn superjob_submitted(
        superjob_id: SuperjobId,
        workflow: impl Into<String>,
        label: Option<String>,
        records: usize,
    ) -> Self {
        Event::SuperjobSubmitted {
            superjob_id,
            workflow: workflow.into(),
            label,
            records,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskDispatched event.
    pub fn task_dispatched(
        key: TaskKey,
        task_type: impl Into<String>,
        workflow: impl Into<String>,
    ) -> Self {
        Event::TaskDispatched {
            key,
            task_type: task_type.into(),
            workflow: workflow.into(),
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskCompleted event.
    pub fn task_completed(
        key: TaskKey,
        task_type: impl Into<String>,
        workflow: impl Into<String>,
    ) -> Self {
        Event::TaskCompleted {
            key,
            task_type: task_type.into(),
            workflow: workflow.into(),
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskFailed event.
    pub fn task_failed(
        key: TaskKey,
        task_type: impl Into<String>,
        workflow: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Event::TaskFailed {
            key,
            task_type: task_type.into(),
            workflow: workflow.into(),
            error: error.into(),
            timestamp: Instant::now(),
        }
    }

    /// Create a SuperjobCompleted event.
    pub fn superjob_completed(
        superjob_id: SuperjobId,
        workflow: impl Into<String>,
        duration: Option<Duration>,
    ) -> Self {
        Event::SuperjobCompleted {
            superjob_id,
            workflow: workflow.into(),
            duration,
            timestamp: Instant::now(),
        }
    }

    /// Create a SuperjobFailed event.
    pub fn superjob_failed(
        superjob_id: SuperjobId,
        workflow: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Event::SuperjobFailed {
            superjob_id,
            workflow: workflow.into(),
            error: error.into(),
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
