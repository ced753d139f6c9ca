//! Error taxonomy shared by the blob store, the metadata store and the file
//! service.

use std::io;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("file `{0}` is already deleted")]
    AlreadyDeleted(Uuid),
    #[error("upload source is empty or already exhausted")]
    EmptyOrExhaustedSource,
    #[error("file name `{0}` is invalid")]
    InvalidName(String),
    #[error("stored name `{0}` is already taken")]
    StoredNameTaken(String),
    #[error("{0} timed out")]
    Timeout(&'static str),
    /// Metadata says deleted but the blob was not moved to the trash.
    #[error("file `{id}` flagged deleted but blob move failed: {source}")]
    Partial {
        id: Uuid,
        #[source]
        source: Box<FileError>,
    },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type FileResult<T> = Result<T, FileError>;
