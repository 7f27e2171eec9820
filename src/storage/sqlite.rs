//! SQLite storage implementation.
//!
//! Provides persistent storage using SQLite database. Record links and
//! argument lists are stored as JSON text columns.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::{Storage, StorageError, StoredSuperjob, SuperjobStatus};
use crate::core::record::{TaskKind, TaskRecord, TaskStatus};
use crate::core::types::{RecordId, SuperjobId};

/// SQLite storage backend.
///
/// Provides persistent storage with automatic schema migration.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage with the given database path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| StorageError::Other(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Move a running superjob to a terminal status in one statement.
    async fn settle_running(
        &self,
        id: &SuperjobId,
        status: SuperjobStatus,
        error: Option<&str>,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE superjobs SET status = ?, finished_at = ?, error = ? WHERE id = ? AND status = ?",
        )
        .bind(status.as_str())
        .bind(system_time_to_string(SystemTime::now()))
        .bind(error)
        .bind(id.as_str())
        .bind(SuperjobStatus::Running.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        // Distinguish an already settled superjob from a missing one
        self.get_superjob(id).await?;
        Ok(false)
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn record_exists(
        &self,
        superjob_id: &SuperjobId,
        id: RecordId,
    ) -> Result<bool, StorageError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM task_records WHERE superjob_id = ? AND id = ?")
                .bind(superjob_id.as_str())
                .bind(id.get() as i64)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(row.is_some())
    }
}

// Helper functions for time conversion
fn system_time_to_string(time: SystemTime) -> String {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

fn string_to_system_time(s: &str) -> SystemTime {
    s.parse::<u128>()
        .ok()
        .map(|millis| UNIX_EPOCH + Duration::from_millis(millis as u64))
        .unwrap_or(UNIX_EPOCH)
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::SerializationError(e.to_string()))
}

fn from_json<T: DeserializeOwned>(s: &str) -> Result<T, StorageError> {
    serde_json::from_str(s).map_err(|e| StorageError::SerializationError(e.to_string()))
}

fn record_not_found(superjob_id: &SuperjobId, id: RecordId) -> StorageError {
    StorageError::NotFound(format!("task record: {}-{}", superjob_id, id))
}

type SuperjobRow = (
    String,
    String,
    Option<String>,
    String,
    String,
    bool,
    String,
    Option<String>,
    Option<String>,
);

const SUPERJOB_COLUMNS: &str = "id, workflow, label, args, status, delete_records_on_completion, submitted_at, finished_at, error";

fn row_to_superjob(row: SuperjobRow) -> Result<StoredSuperjob, StorageError> {
    Ok(StoredSuperjob {
        id: SuperjobId::new(row.0),
        workflow: row.1,
        label: row.2,
        args: from_json(&row.3)?,
        status: SuperjobStatus::from_str(&row.4).map_err(StorageError::SerializationError)?,
        delete_records_on_completion: row.5,
        submitted_at: string_to_system_time(&row.6),
        finished_at: row.7.as_deref().map(string_to_system_time),
        error: row.8,
    })
}

type RecordRow = (
    String,
    i64,
    Option<i64>,
    String,
    Option<i64>,
    String,
    String,
    String,
    String,
    String,
    String,
    bool,
    Option<String>,
);

const RECORD_COLUMNS: &str = "superjob_id, id, parent_id, children_ids, next_id, kind, task_type, workflow, arg_keys, arg_values, status, descendants_complete, meta";

fn row_to_record(row: RecordRow) -> Result<TaskRecord, StorageError> {
    Ok(TaskRecord {
        superjob_id: SuperjobId::new(row.0),
        id: RecordId::new(row.1 as u32),
        parent_id: row.2.map(|id| RecordId::new(id as u32)),
        children_ids: from_json(&row.3)?,
        next_id: row.4.map(|id| RecordId::new(id as u32)),
        kind: TaskKind::from_str(&row.5).map_err(StorageError::SerializationError)?,
        task_type: row.6,
        workflow: row.7,
        arg_keys: from_json(&row.8)?,
        arg_values: from_json(&row.9)?,
        status: TaskStatus::from_str(&row.10).map_err(StorageError::SerializationError)?,
        descendants_complete: row.11,
        meta: row.12.as_deref().map(from_json).transpose()?,
    })
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_superjob(&self, superjob: StoredSuperjob) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO superjobs (id, workflow, label, args, status, delete_records_on_completion, submitted_at, finished_at, error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(superjob.id.as_str())
        .bind(&superjob.workflow)
        .bind(&superjob.label)
        .bind(to_json(&superjob.args)?)
        .bind(superjob.status.as_str())
        .bind(superjob.delete_records_on_completion)
        .bind(system_time_to_string(superjob.submitted_at))
        .bind(superjob.finished_at.map(system_time_to_string))
        .bind(&superjob.error)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(
                StorageError::DuplicateKey(format!("superjob: {}", superjob.id)),
            ),
            Err(e) => Err(StorageError::Other(e.to_string())),
        }
    }

    async fn get_superjob(&self, id: &SuperjobId) -> Result<StoredSuperjob, StorageError> {
        let row: SuperjobRow = sqlx::query_as(&format!(
            "SELECT {} FROM superjobs WHERE id = ?",
            SUPERJOB_COLUMNS
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?
        .ok_or_else(|| StorageError::NotFound(format!("superjob: {}", id)))?;

        row_to_superjob(row)
    }

    async fn list_superjobs(&self) -> Result<Vec<StoredSuperjob>, StorageError> {
        let rows: Vec<SuperjobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM superjobs ORDER BY submitted_at",
            SUPERJOB_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        rows.into_iter().map(row_to_superjob).collect()
    }

    async fn update_superjob(&self, superjob: StoredSuperjob) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE superjobs
            SET workflow = ?, label = ?, args = ?, status = ?, delete_records_on_completion = ?,
                submitted_at = ?, finished_at = ?, error = ?
            WHERE id = ?
            "#,
        )
        .bind(&superjob.workflow)
        .bind(&superjob.label)
        .bind(to_json(&superjob.args)?)
        .bind(superjob.status.as_str())
        .bind(superjob.delete_records_on_completion)
        .bind(system_time_to_string(superjob.submitted_at))
        .bind(superjob.finished_at.map(system_time_to_string))
        .bind(&superjob.error)
        .bind(superjob.id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("superjob: {}", superjob.id)));
        }
        Ok(())
    }

    async fn complete_superjob(&self, id: &SuperjobId) -> Result<bool, StorageError> {
        self.settle_running(id, SuperjobStatus::Complete, None).await
    }

    async fn fail_superjob(&self, id: &SuperjobId, error: &str) -> Result<bool, StorageError> {
        self.settle_running(id, SuperjobStatus::Failed, Some(error)).await
    }

    async fn insert_records(&self, records: Vec<TaskRecord>) -> Result<(), StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        for record in &records {
            let result = sqlx::query(
                r#"
                INSERT INTO task_records (superjob_id, id, parent_id, children_ids, next_id, kind, task_type, workflow, arg_keys, arg_values, status, descendants_complete, meta)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(record.superjob_id.as_str())
            .bind(record.id.get() as i64)
            .bind(record.parent_id.map(|id| id.get() as i64))
            .bind(to_json(&record.children_ids)?)
            .bind(record.next_id.map(|id| id.get() as i64))
            .bind(record.kind.as_str())
            .bind(&record.task_type)
            .bind(&record.workflow)
            .bind(to_json(&record.arg_keys)?)
            .bind(to_json(&record.arg_values)?)
            .bind(record.status.as_str())
            .bind(record.descendants_complete)
            .bind(record.meta.as_ref().map(to_json).transpose()?)
            .execute(&mut *tx)
            .await;

            match result {
                Ok(_) => {}
                Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                    return Err(StorageError::DuplicateKey(format!(
                        "task record: {}",
                        record.key()
                    )));
                }
                Err(e) => return Err(StorageError::Other(e.to_string())),
            }
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(())
    }

    async fn get_record(
        &self,
        superjob_id: &SuperjobId,
        id: RecordId,
    ) -> Result<TaskRecord, StorageError> {
        let row: RecordRow = sqlx::query_as(&format!(
            "SELECT {} FROM task_records WHERE superjob_id = ? AND id = ?",
            RECORD_COLUMNS
        ))
        .bind(superjob_id.as_str())
        .bind(id.get() as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?
        .ok_or_else(|| record_not_found(superjob_id, id))?;

        row_to_record(row)
    }

    async fn list_records(
        &self,
        superjob_id: &SuperjobId,
    ) -> Result<Vec<TaskRecord>, StorageError> {
        let rows: Vec<RecordRow> = sqlx::query_as(&format!(
            "SELECT {} FROM task_records WHERE superjob_id = ? ORDER BY id",
            RECORD_COLUMNS
        ))
        .bind(superjob_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        rows.into_iter().map(row_to_record).collect()
    }

    async fn list_children(
        &self,
        superjob_id: &SuperjobId,
        parent_id: RecordId,
    ) -> Result<Vec<TaskRecord>, StorageError> {
        let rows: Vec<RecordRow> = sqlx::query_as(&format!(
            "SELECT {} FROM task_records WHERE superjob_id = ? AND parent_id = ? ORDER BY id",
            RECORD_COLUMNS
        ))
        .bind(superjob_id.as_str())
        .bind(parent_id.get() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        rows.into_iter().map(row_to_record).collect()
    }

    async fn transition_status(
        &self,
        superjob_id: &SuperjobId,
        id: RecordId,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE task_records SET status = ? WHERE superjob_id = ? AND id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(superjob_id.as_str())
        .bind(id.get() as i64)
        .bind(from.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        if self.record_exists(superjob_id, id).await? {
            Ok(false)
        } else {
            Err(record_not_found(superjob_id, id))
        }
    }

    async fn claim_descendants_complete(
        &self,
        superjob_id: &SuperjobId,
        id: RecordId,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE task_records SET descendants_complete = 1 WHERE superjob_id = ? AND id = ? AND descendants_complete = 0",
        )
        .bind(superjob_id.as_str())
        .bind(id.get() as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        if self.record_exists(superjob_id, id).await? {
            Ok(false)
        } else {
            Err(record_not_found(superjob_id, id))
        }
    }

    async fn delete_records(&self, superjob_id: &SuperjobId) -> Result<usize, StorageError> {
        let result = sqlx::query("DELETE FROM task_records WHERE superjob_id = ?")
            .bind(superjob_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        Ok(result.rows_affected() as usize)
    }
}
