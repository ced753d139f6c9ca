//! Represents the metadata record kept for every uploaded file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Timestamp layout used as the prefix of stored and trash names.
pub const NAME_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Metadata for a single uploaded file.
///
/// The record describes where the bytes live; it never holds the content
/// itself. Once `deleted` is set it stays set.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct FileRecord {
    /// Identifier generated by the metadata store at insert time.
    pub id: Uuid,

    /// Display name supplied by the client.
    pub original_name: String,

    /// Blob store key: `<yyyyMMddHHmmss>_<original_name>`.
    pub stored_name: String,

    /// Number of bytes actually persisted.
    pub size_bytes: i64,

    /// Blob location at upload time.
    pub path: String,

    /// Hex MD5 of the persisted bytes.
    pub checksum: String,

    pub uploaded_at: DateTime<Utc>,

    /// Soft-delete flag.
    pub deleted: bool,

    /// Set together with `deleted`.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    pub fn is_active(&self) -> bool {
        !self.deleted
    }
}

/// Fields of a record before the metadata store assigns its id.
#[derive(Clone, Debug)]
pub struct NewFileRecord {
    pub original_name: String,
    pub stored_name: String,
    pub size_bytes: i64,
    pub path: String,
    pub checksum: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Build the timestamp-prefixed name used for both stored blobs and
/// trash entries.
pub fn timestamped_name(at: DateTime<Utc>, original_name: &str) -> String {
    format!("{}_{}", at.format(NAME_TIMESTAMP_FORMAT), original_name)
}
