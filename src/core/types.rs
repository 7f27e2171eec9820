//! Core identifier types.
//!
//! These types provide type-safe identifiers for superjobs, the task records
//! inside them, and the keys the job runtime reports back with.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Length of a generated superjob identifier, in hex characters.
const SUPERJOB_ID_LEN: usize = 24;

/// Unique identifier for a superjob (one submitted workflow instance).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SuperjobId(String);

/// Identifier of a task record, unique within its superjob.
///
/// Record ids are assigned in preorder starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(u32);

/// Globally unique key of a task record: its superjob plus its record id.
///
/// Rendered as `<superjob_id>-<record_id>`; this is the identifier handed to
/// the job runtime and expected back in completion callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    pub superjob_id: SuperjobId,
    pub record_id: RecordId,
}

/// Error returned when a task key string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid task key: {0}")]
pub struct InvalidTaskKey(pub String);

impl SuperjobId {
    /// Generate a new random SuperjobId.
    ///
    /// The id is 24 lowercase hex characters taken from a v4 UUID.
    pub fn generate() -> Self {
        let mut hex = Uuid::new_v4().simple().to_string();
        hex.truncate(SUPERJOB_ID_LEN);
        Self(hex)
    }

    /// Create a SuperjobId from an existing string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the underlying string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SuperjobId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SuperjobId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl RecordId {
    /// The id of the first record of every superjob.
    pub const FIRST: RecordId = RecordId(1);

    /// Create a RecordId from a raw number.
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw number.
    pub fn get(&self) -> u32 {
        self.0
    }

    /// The id that follows this one in preorder numbering.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl From<u32> for RecordId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl TaskKey {
    /// Create a task key.
    pub fn new(superjob_id: SuperjobId, record_id: RecordId) -> Self {
        Self {
            superjob_id,
            record_id,
        }
    }
}

impl FromStr for TaskKey {
    type Err = InvalidTaskKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (superjob, record) = s
            .rsplit_once('-')
            .ok_or_else(|| InvalidTaskKey(s.to_string()))?;
        if superjob.is_empty() {
            return Err(InvalidTaskKey(s.to_string()));
        }
        let record: u32 = record.parse().map_err(|_| InvalidTaskKey(s.to_string()))?;
        Ok(Self::new(SuperjobId::new(superjob), RecordId::new(record)))
    }
}

impl fmt::Display for SuperjobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.superjob_id, self.record_id)
    }
}
