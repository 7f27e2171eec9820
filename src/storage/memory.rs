//! In-memory storage implementation.
//!
//! Provides a thread-safe in-memory backend for testing and development.
//! The engine also uses it as the staging area for a superjob's first
//! activation before the records reach the real store.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use super::{Storage, StorageError, StoredSuperjob, SuperjobStatus};
use crate::core::record::{TaskRecord, TaskStatus};
use crate::core::types::{RecordId, SuperjobId};

/// In-memory storage backend.
///
/// Thread-safe storage using RwLock for concurrent access.
/// Data is not persisted across restarts.
pub struct InMemoryStorage {
    superjobs: RwLock<HashMap<SuperjobId, StoredSuperjob>>,
    records: RwLock<HashMap<SuperjobId, BTreeMap<RecordId, TaskRecord>>>,
}

impl InMemoryStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self {
            superjobs: RwLock::new(HashMap::new()),
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Create a storage pre-filled with records.
    pub fn with_records(records: Vec<TaskRecord>) -> Self {
        let mut by_superjob: HashMap<SuperjobId, BTreeMap<RecordId, TaskRecord>> = HashMap::new();
        for record in records {
            by_superjob
                .entry(record.superjob_id.clone())
                .or_default()
                .insert(record.id, record);
        }
        Self {
            superjobs: RwLock::new(HashMap::new()),
            records: RwLock::new(by_superjob),
        }
    }

    fn settle_running(
        &self,
        id: &SuperjobId,
        settle: impl FnOnce(&mut StoredSuperjob),
    ) -> Result<bool, StorageError> {
        let mut superjobs = self
            .superjobs
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let superjob = superjobs
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("superjob: {}", id)))?;
        if superjob.status != SuperjobStatus::Running {
            return Ok(false);
        }
        settle(superjob);
        Ok(true)
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn record_not_found(superjob_id: &SuperjobId, id: RecordId) -> StorageError {
    StorageError::NotFound(format!("task record: {}-{}", superjob_id, id))
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn save_superjob(&self, superjob: StoredSuperjob) -> Result<(), StorageError> {
        let mut superjobs = self
            .superjobs
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        if superjobs.contains_key(&superjob.id) {
            return Err(StorageError::DuplicateKey(format!(
                "superjob: {}",
                superjob.id
            )));
        }
        superjobs.insert(superjob.id.clone(), superjob);
        Ok(())
    }

    async fn get_superjob(&self, id: &SuperjobId) -> Result<StoredSuperjob, StorageError> {
        let superjobs = self
            .superjobs
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        superjobs
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("superjob: {}", id)))
    }

    async fn list_superjobs(&self) -> Result<Vec<StoredSuperjob>, StorageError> {
        let superjobs = self
            .superjobs
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = superjobs.values().cloned().collect();
        result.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        Ok(result)
    }

    async fn update_superjob(&self, superjob: StoredSuperjob) -> Result<(), StorageError> {
        let mut superjobs = self
            .superjobs
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        if !superjobs.contains_key(&superjob.id) {
            return Err(StorageError::NotFound(format!("superjob: {}", superjob.id)));
        }
        superjobs.insert(superjob.id.clone(), superjob);
        Ok(())
    }

    async fn complete_superjob(&self, id: &SuperjobId) -> Result<bool, StorageError> {
        self.settle_running(id, |superjob| superjob.mark_complete())
    }

    async fn fail_superjob(&self, id: &SuperjobId, error: &str) -> Result<bool, StorageError> {
        self.settle_running(id, |superjob| superjob.mark_failed(error))
    }

    async fn insert_records(&self, records: Vec<TaskRecord>) -> Result<(), StorageError> {
        let mut all = self
            .records
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;

        // Check everything first so a duplicate leaves the store untouched
        for record in &records {
            if all
                .get(&record.superjob_id)
                .is_some_and(|existing| existing.contains_key(&record.id))
            {
                return Err(StorageError::DuplicateKey(format!(
                    "task record: {}",
                    record.key()
                )));
            }
        }

        for record in records {
            all.entry(record.superjob_id.clone())
                .or_default()
                .insert(record.id, record);
        }
        Ok(())
    }

    async fn get_record(
        &self,
        superjob_id: &SuperjobId,
        id: RecordId,
    ) -> Result<TaskRecord, StorageError> {
        let all = self
            .records
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        all.get(superjob_id)
            .and_then(|records| records.get(&id))
            .cloned()
            .ok_or_else(|| record_not_found(superjob_id, id))
    }

    async fn list_records(
        &self,
        superjob_id: &SuperjobId,
    ) -> Result<Vec<TaskRecord>, StorageError> {
        let all = self
            .records
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(all
            .get(superjob_id)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_children(
        &self,
        superjob_id: &SuperjobId,
        parent_id: RecordId,
    ) -> Result<Vec<TaskRecord>, StorageError> {
        let all = self
            .records
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(all
            .get(superjob_id)
            .map(|records| {
                records
                    .values()
                    .filter(|r| r.parent_id == Some(parent_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn transition_status(
        &self,
        superjob_id: &SuperjobId,
        id: RecordId,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<bool, StorageError> {
        let mut all = self
            .records
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let record = all
            .get_mut(superjob_id)
            .and_then(|records| records.get_mut(&id))
            .ok_or_else(|| record_not_found(superjob_id, id))?;

        if record.status != from {
            return Ok(false);
        }
        record.status = to;
        Ok(true)
    }

    async fn claim_descendants_complete(
        &self,
        superjob_id: &SuperjobId,
        id: RecordId,
    ) -> Result<bool, StorageError> {
        let mut all = self
            .records
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let record = all
            .get_mut(superjob_id)
            .and_then(|records| records.get_mut(&id))
            .ok_or_else(|| record_not_found(superjob_id, id))?;

        if record.descendants_complete {
            return Ok(false);
        }
        record.descendants_complete = true;
        Ok(true)
    }

    async fn delete_records(&self, superjob_id: &SuperjobId) -> Result<usize, StorageError> {
        let mut all = self
            .records
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(all.remove(superjob_id).map(|r| r.len()).unwrap_or(0))
    }
}
