//! Persisted task records.
//!
//! A task record is one node of a compiled workflow tree and the unit the
//! propagation engine operates on. Records are linked three ways: `parent_id`
//! points at the composite whose children they are, `children_ids` lists the
//! dependent work a record owns, and `next_id` continues a sequential chain.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::definition::ArgRef;
use super::types::{RecordId, SuperjobId, TaskKey};

/// Task type recorded for batch records.
pub const BATCH_TASK_TYPE: &str = "batch";

/// Task type recorded for batch element records.
pub const BATCH_ELEMENT_TASK_TYPE: &str = "batch_element";

/// Lifecycle state of a task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Blocked, not yet eligible to run.
    Initialized,
    /// Leaf handed to the job runtime, awaiting its callback.
    Queued,
    /// Composite whose subtree is executing.
    Running,
    /// Terminal success.
    Complete,
    /// Terminal failure (leaves only).
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Initialized => "initialized",
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Complete => "complete",
            TaskStatus::Failed => "failed",
        }
    }

    /// Returns true for `complete` and `failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initialized" => Ok(TaskStatus::Initialized),
            "queued" => Ok(TaskStatus::Queued),
            "running" => Ok(TaskStatus::Running),
            "complete" => Ok(TaskStatus::Complete),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// Structural kind of a task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// A concrete task type. It is dispatched to the runtime and may own
    /// dependent children that run once it completes.
    Task,
    /// An inlined nested workflow.
    Workflow,
    /// A data-parallel fan-out.
    Batch,
    /// One index of a batch.
    BatchElement,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Task => "task",
            TaskKind::Workflow => "workflow",
            TaskKind::Batch => "batch",
            TaskKind::BatchElement => "batch_element",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(TaskKind::Task),
            "workflow" => Ok(TaskKind::Workflow),
            "batch" => Ok(TaskKind::Batch),
            "batch_element" => Ok(TaskKind::BatchElement),
            other => Err(format!("unknown task kind: {}", other)),
        }
    }
}

/// A persisted node of a compiled workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub superjob_id: SuperjobId,
    pub id: RecordId,
    /// Composite this record belongs to; `None` on the root chain.
    pub parent_id: Option<RecordId>,
    /// All children in order. For a sequential group only the first is a
    /// chain head, the rest are reached through `next_id`.
    pub children_ids: Vec<RecordId>,
    /// Next record in this record's chain.
    pub next_id: Option<RecordId>,
    pub kind: TaskKind,
    /// Task type name, workflow name, or one of the batch markers.
    pub task_type: String,
    /// Name of the submitted workflow.
    pub workflow: String,
    pub arg_keys: Vec<ArgRef>,
    pub arg_values: Vec<Value>,
    pub status: TaskStatus,
    /// Set once when completion has bubbled through this record.
    pub descendants_complete: bool,
    /// Caller-supplied metadata carried from submission.
    pub meta: Option<Value>,
}

impl TaskRecord {
    /// Create an `initialized` record with no links.
    pub fn new(
        superjob_id: SuperjobId,
        id: RecordId,
        kind: TaskKind,
        task_type: impl Into<String>,
        workflow: impl Into<String>,
    ) -> Self {
        Self {
            superjob_id,
            id,
            parent_id: None,
            children_ids: Vec::new(),
            next_id: None,
            kind,
            task_type: task_type.into(),
            workflow: workflow.into(),
            arg_keys: Vec::new(),
            arg_values: Vec::new(),
            status: TaskStatus::Initialized,
            descendants_complete: false,
            meta: None,
        }
    }

    /// Key the job runtime reports back with.
    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.superjob_id.clone(), self.id)
    }

    /// Leaves are dispatched to the runtime; everything else is composite.
    pub fn is_leaf(&self) -> bool {
        self.kind == TaskKind::Task
    }

    pub fn is_batch(&self) -> bool {
        self.kind == TaskKind::Batch
    }

    pub fn first_child(&self) -> Option<RecordId> {
        self.children_ids.first().copied()
    }
}
