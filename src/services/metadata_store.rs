//! src/services/metadata_store.rs
//!
//! The metadata collection behind the file service. `MetadataStore` is the
//! seam the service depends on; `SqliteMetadataStore` is the implementation
//! the binary wires in.

use crate::{
    models::file_record::{FileRecord, NewFileRecord},
    services::error::{FileError, FileResult},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Schema applied at startup and in tests.
pub const SCHEMA_SQL: &str = include_str!("../../migrations/0001_init.sql");

const RECORD_COLUMNS: &str = "id, original_name, stored_name, size_bytes, path, checksum, \
                              uploaded_at, deleted, deleted_at";

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a record; the store generates its id.
    async fn insert(&self, record: NewFileRecord) -> FileResult<FileRecord>;

    /// Every record, soft-deleted ones included.
    async fn find_all(&self) -> FileResult<Vec<FileRecord>>;

    async fn find_by_id(&self, id: Uuid) -> FileResult<FileRecord>;

    /// Set `deleted = true` and `deleted_at` only if the record is still
    /// active, in a single conditional write. Returns the matched count.
    async fn mark_deleted(&self, id: Uuid, deleted_at: DateTime<Utc>) -> FileResult<u64>;

    async fn ping(&self) -> FileResult<()>;
}

#[derive(Clone)]
pub struct SqliteMetadataStore {
    db: Arc<SqlitePool>,
}

impl SqliteMetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn insert(&self, record: NewFileRecord) -> FileResult<FileRecord> {
        let sql = format!(
            "INSERT INTO files (
                id, original_name, stored_name, size_bytes, path, checksum,
                uploaded_at, deleted, deleted_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 0, NULL)
            RETURNING {RECORD_COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(Uuid::new_v4())
            .bind(&record.original_name)
            .bind(&record.stored_name)
            .bind(record.size_bytes)
            .bind(&record.path)
            .bind(&record.checksum)
            .bind(record.uploaded_at)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                    FileError::StoredNameTaken(record.stored_name.clone())
                }
                err => FileError::Sqlx(err),
            })?;

        debug!("inserted metadata {} for {}", inserted.id, inserted.stored_name);
        Ok(inserted)
    }

    async fn find_all(&self) -> FileResult<Vec<FileRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM files ORDER BY uploaded_at ASC, rowid ASC");
        let rows = sqlx::query_as::<_, FileRecord>(&sql)
            .fetch_all(&*self.db)
            .await?;
        Ok(rows)
    }

    async fn find_by_id(&self, id: Uuid) -> FileResult<FileRecord> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM files WHERE id = ?");
        sqlx::query_as::<_, FileRecord>(&sql)
            .bind(id)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => FileError::NotFound(format!("file `{}`", id)),
                other => FileError::Sqlx(other),
            })
    }

    async fn mark_deleted(&self, id: Uuid, deleted_at: DateTime<Utc>) -> FileResult<u64> {
        let result =
            sqlx::query("UPDATE files SET deleted = 1, deleted_at = ? WHERE id = ? AND deleted = 0")
                .bind(deleted_at)
                .bind(id)
                .execute(&*self.db)
                .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> FileResult<()> {
        let value = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        if value != 1 {
            return Err(FileError::Sqlx(sqlx::Error::Protocol(format!(
                "unexpected ping result: {}",
                value
            ))));
        }
        Ok(())
    }
}

/// Apply the embedded schema statement by statement. Every statement is
/// idempotent, so this runs on every startup.
pub async fn run_migrations(db: &SqlitePool) -> FileResult<()> {
    let statements = SCHEMA_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    debug!("running {} migration statements", statements.len());
    for stmt in statements {
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}
