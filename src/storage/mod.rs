//! Storage abstraction for superjobs and their task records.
//!
//! This module provides a trait-based storage abstraction with
//! pluggable backends (in-memory, SQLite).
//!
//! The propagation engine only mutates records through the two atomic
//! operations [`Storage::transition_status`] and
//! [`Storage::claim_descendants_complete`], and settles superjobs through
//! [`Storage::complete_superjob`] and [`Storage::fail_superjob`], so several
//! engine instances can share one store.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemoryStorage;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};
use thiserror::Error;

use crate::core::record::{TaskRecord, TaskStatus};
use crate::core::types::{RecordId, SuperjobId};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested item was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A duplicate key was detected.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Generic storage error.
    #[error("storage error: {0}")]
    Other(String),
}

/// Status of a superjob as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuperjobStatus {
    /// Records are still being worked through.
    Running,
    /// The root chain finished.
    Complete,
    /// A task failed; its branch is stalled.
    Failed,
}

impl SuperjobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuperjobStatus::Running => "running",
            SuperjobStatus::Complete => "complete",
            SuperjobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SuperjobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SuperjobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(SuperjobStatus::Running),
            "complete" => Ok(SuperjobStatus::Complete),
            "failed" => Ok(SuperjobStatus::Failed),
            other => Err(format!("unknown superjob status: {}", other)),
        }
    }
}

/// Stored superjob: one submitted workflow instance and its options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSuperjob {
    /// Unique superjob identifier.
    pub id: SuperjobId,
    /// Name of the submitted workflow.
    pub workflow: String,
    /// Human-readable label given at submission.
    pub label: Option<String>,
    /// Positional arguments as submitted.
    pub args: Vec<Value>,
    /// Current status.
    pub status: SuperjobStatus,
    /// Delete the task records once the superjob completes.
    pub delete_records_on_completion: bool,
    /// When the superjob was submitted.
    pub submitted_at: SystemTime,
    /// When the superjob completed or failed.
    pub finished_at: Option<SystemTime>,
    /// Failure message (if failed).
    pub error: Option<String>,
}

impl StoredSuperjob {
    /// Create a running superjob.
    pub fn new(id: SuperjobId, workflow: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id,
            workflow: workflow.into(),
            label: None,
            args,
            status: SuperjobStatus::Running,
            delete_records_on_completion: false,
            submitted_at: SystemTime::now(),
            finished_at: None,
            error: None,
        }
    }

    /// Set the label.
    pub fn with_label(mut self, label: Option<String>) -> Self {
        self.label = label;
        self
    }

    /// Set whether records are deleted on completion.
    pub fn with_delete_records_on_completion(mut self, delete: bool) -> Self {
        self.delete_records_on_completion = delete;
        self
    }

    /// Mark the superjob as complete.
    pub fn mark_complete(&mut self) {
        self.status = SuperjobStatus::Complete;
        self.finished_at = Some(SystemTime::now());
    }

    /// Mark the superjob as failed. Only the first failure is kept.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        if self.status == SuperjobStatus::Failed {
            return;
        }
        self.status = SuperjobStatus::Failed;
        self.finished_at = Some(SystemTime::now());
        self.error = Some(error.into());
    }

    /// Time between submission and the terminal state.
    pub fn duration(&self) -> Option<Duration> {
        self.finished_at
            .and_then(|end| end.duration_since(self.submitted_at).ok())
    }
}

/// Storage trait for persisting superjobs and task records.
#[async_trait]
pub trait Storage: Send + Sync {
    // Superjob operations

    /// Save a new superjob.
    async fn save_superjob(&self, superjob: StoredSuperjob) -> Result<(), StorageError>;

    /// Get a superjob by ID.
    async fn get_superjob(&self, id: &SuperjobId) -> Result<StoredSuperjob, StorageError>;

    /// List all superjobs, oldest first.
    async fn list_superjobs(&self) -> Result<Vec<StoredSuperjob>, StorageError>;

    /// Replace an existing superjob.
    async fn update_superjob(&self, superjob: StoredSuperjob) -> Result<(), StorageError>;

    /// Atomically move a running superjob to `complete`.
    ///
    /// Returns `false` when the superjob already reached a terminal state.
    async fn complete_superjob(&self, id: &SuperjobId) -> Result<bool, StorageError>;

    /// Atomically move a running superjob to `failed` with `error`.
    ///
    /// Returns `false`, keeping the stored error, when the superjob already
    /// reached a terminal state.
    async fn fail_superjob(&self, id: &SuperjobId, error: &str) -> Result<bool, StorageError>;

    // Task record operations

    /// Insert the records of one compiled superjob. All or nothing.
    async fn insert_records(&self, records: Vec<TaskRecord>) -> Result<(), StorageError>;

    /// Get a record by superjob and id.
    async fn get_record(
        &self,
        superjob_id: &SuperjobId,
        id: RecordId,
    ) -> Result<TaskRecord, StorageError>;

    /// List all records of a superjob, ordered by id.
    async fn list_records(&self, superjob_id: &SuperjobId)
    -> Result<Vec<TaskRecord>, StorageError>;

    /// List the records whose parent is `parent_id`, ordered by id.
    async fn list_children(
        &self,
        superjob_id: &SuperjobId,
        parent_id: RecordId,
    ) -> Result<Vec<TaskRecord>, StorageError>;

    /// Atomically move a record from `from` to `to`.
    ///
    /// Returns `false` without changing anything when the record is not in
    /// `from`, and `NotFound` when there is no such record.
    async fn transition_status(
        &self,
        superjob_id: &SuperjobId,
        id: RecordId,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<bool, StorageError>;

    /// Atomically set `descendants_complete`. Returns `true` only for the
    /// caller that flipped it from `false`.
    async fn claim_descendants_complete(
        &self,
        superjob_id: &SuperjobId,
        id: RecordId,
    ) -> Result<bool, StorageError>;

    /// Delete every record of a superjob, returning how many were removed.
    async fn delete_records(&self, superjob_id: &SuperjobId) -> Result<usize, StorageError>;
}
