//! src/services/file_service.rs
//!
//! FileService — upload, list, fetch and soft-delete on top of a
//! `BlobStore` (bytes) and a `MetadataStore` (records). Both stores are
//! injected at construction; the service holds no locks and never retries.
//!
//! Ordering rules:
//! - upload writes the blob before inserting metadata, so a record never
//!   points at a missing blob (an orphan blob is a tolerated leak);
//! - soft delete flags the record before moving the blob, so an interrupted
//!   delete leaves a detectable "deleted but still in upload_dir" state.

use crate::{
    models::file_record::{FileRecord, NewFileRecord, timestamped_name},
    services::{
        blob_store::{BlobStore, validate_file_name},
        error::{FileError, FileResult},
        metadata_store::MetadataStore,
    },
};
use chrono::Utc;
use std::{
    future::Future,
    io::{self, ErrorKind, SeekFrom},
    sync::Arc,
    time::Duration,
};
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncSeek, AsyncSeekExt},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct FileService {
    metadata: Arc<dyn MetadataStore>,
    blobs: BlobStore,
    /// Deadline applied to metadata calls, blob reads and trash moves.
    timeout: Duration,
}

impl FileService {
    pub fn new(metadata: Arc<dyn MetadataStore>, blobs: BlobStore, timeout: Duration) -> Self {
        Self {
            metadata,
            blobs,
            timeout,
        }
    }

    /// Ping the metadata store under the service deadline.
    pub async fn ping_metadata(&self) -> FileResult<()> {
        self.bounded("metadata ping", self.metadata.ping()).await
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> FileResult<T>
    where
        F: Future<Output = FileResult<T>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| FileError::Timeout(operation))?
    }

    /// Store the content of `source` as a new file named `original_name`.
    ///
    /// The source is measured in full, then rewound and copied by the blob
    /// store; the recorded size is the count actually written. Blob writes
    /// are not bounded by the timeout and run to completion once started.
    pub async fn upload<R>(&self, original_name: &str, mut source: R) -> FileResult<FileRecord>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        validate_file_name(original_name)?;

        source.seek(SeekFrom::Start(0)).await?;
        let measured = tokio::io::copy(&mut source, &mut tokio::io::sink()).await?;
        if measured == 0 {
            return Err(FileError::EmptyOrExhaustedSource);
        }

        let uploaded_at = Utc::now();
        let stored_name = timestamped_name(uploaded_at, original_name);
        let blob = self.blobs.write(&stored_name, &mut source).await?;

        if blob.bytes_written != measured {
            self.discard_blob(&stored_name).await;
            return Err(FileError::Io(io::Error::new(
                ErrorKind::InvalidData,
                format!(
                    "source changed during upload: measured {} bytes, wrote {}",
                    measured, blob.bytes_written
                ),
            )));
        }

        let new_record = NewFileRecord {
            original_name: original_name.to_string(),
            stored_name: stored_name.clone(),
            size_bytes: blob.bytes_written as i64,
            path: blob.path.display().to_string(),
            checksum: blob.checksum,
            uploaded_at,
        };

        match self
            .bounded("metadata insert", self.metadata.insert(new_record))
            .await
        {
            Ok(record) => {
                info!(
                    "uploaded {} as {} ({} bytes, id {})",
                    record.original_name, record.stored_name, record.size_bytes, record.id
                );
                Ok(record)
            }
            // The insert may still land after a timeout; keep the blob.
            Err(err @ FileError::Timeout(_)) => {
                warn!("metadata insert for {} timed out; blob kept", stored_name);
                Err(err)
            }
            Err(err) => {
                warn!("metadata insert for {} failed: {}", stored_name, err);
                self.discard_blob(&stored_name).await;
                Err(err)
            }
        }
    }

    async fn discard_blob(&self, stored_name: &str) {
        if let Err(err) = self.blobs.remove(stored_name).await {
            warn!("failed to remove orphan blob {}: {}", stored_name, err);
        }
    }

    /// Every record, soft-deleted ones included, in store order.
    pub async fn list(&self) -> FileResult<Vec<FileRecord>> {
        self.bounded("metadata list", self.metadata.find_all()).await
    }

    /// Records that have not been soft-deleted.
    pub async fn list_active(&self) -> FileResult<Vec<FileRecord>> {
        let records = self.list().await?;
        Ok(records.into_iter().filter(FileRecord::is_active).collect())
    }

    /// Metadata for `id`, deleted or not.
    pub async fn describe(&self, id: Uuid) -> FileResult<FileRecord> {
        self.bounded("metadata lookup", self.metadata.find_by_id(id))
            .await
    }

    /// Resolve `id` and open its blob for streaming.
    ///
    /// Soft-deleted files are reported as not found even though their bytes
    /// still exist in the trash directory.
    pub async fn fetch(&self, id: Uuid) -> FileResult<(FileRecord, File)> {
        let record = self.describe(id).await?;
        if record.deleted {
            return Err(FileError::NotFound(format!("file `{}`", id)));
        }

        let file = self
            .bounded("blob read", self.blobs.read(&record.stored_name))
            .await?;
        debug!("fetching {} from {}", id, record.stored_name);
        Ok((record, file))
    }

    /// Flag `id` as deleted, then move its blob into the trash directory.
    ///
    /// A failed move after a successful flag update is reported as
    /// `Partial` and is not rolled back.
    pub async fn soft_delete(&self, id: Uuid) -> FileResult<FileRecord> {
        let record = self.describe(id).await?;
        if record.deleted {
            return Err(FileError::AlreadyDeleted(id));
        }

        let deleted_at = Utc::now();
        let matched = self
            .bounded("metadata update", self.metadata.mark_deleted(id, deleted_at))
            .await?;
        if matched == 0 {
            return Err(FileError::AlreadyDeleted(id));
        }

        let trash_name = timestamped_name(deleted_at, &record.original_name);
        self.trash_or_partial(
            id,
            &record.stored_name,
            self.blobs.move_to_trash(&record.stored_name, &trash_name),
        )
        .await?;

        info!("soft-deleted {} ({} -> {})", id, record.stored_name, trash_name);
        Ok(FileRecord {
            deleted: true,
            deleted_at: Some(deleted_at),
            ..record
        })
    }

    /// Run the trash move of an already-flagged record. Any failure,
    /// timeout included, becomes `Partial`. On timeout the link and unlink
    /// run on the blocking pool and may still complete after the deadline,
    /// so the blob can end up in the trash despite the error.
    async fn trash_or_partial<F>(&self, id: Uuid, stored_name: &str, fut: F) -> FileResult<()>
    where
        F: Future<Output = FileResult<std::path::PathBuf>>,
    {
        match self.bounded("blob move", fut).await {
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(
                    "file {} flagged deleted but {} was not moved to trash: {}",
                    id, stored_name, err
                );
                Err(FileError::Partial {
                    id,
                    source: Box::new(err),
                })
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        models::file_record::NAME_TIMESTAMP_FORMAT,
        services::metadata_store::{SqliteMetadataStore, tests::memory_pool},
    };
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::io::Cursor;
    use tempfile::TempDir;
    use tokio::{fs, io::AsyncReadExt};

    pub(crate) async fn setup_service() -> (TempDir, FileService) {
        let temp_dir = TempDir::new().unwrap();
        let blobs = BlobStore::new(temp_dir.path().join("upload"), temp_dir.path().join("trash"));
        blobs.ensure_dirs().await.unwrap();
        let metadata = Arc::new(SqliteMetadataStore::new(memory_pool().await));
        let service = FileService::new(metadata, blobs, Duration::from_secs(5));
        (temp_dir, service)
    }

    async fn read_all(mut file: File) -> Vec<u8> {
        let mut out = Vec::new();
        file.read_to_end(&mut out).await.unwrap();
        out
    }

    async fn dir_names(dir: &std::path::Path) -> Vec<String> {
        let mut entries = fs::read_dir(dir).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names
    }

    fn is_timestamped(name: &str, original: &str) -> bool {
        let Some((prefix, rest)) = name.split_once('_') else {
            return false;
        };
        prefix.len() == 14 && prefix.chars().all(|c| c.is_ascii_digit()) && rest == original
    }

    #[tokio::test]
    async fn test_upload_report_scenario() {
        let (_temp_dir, service) = setup_service().await;
        let content = b"twelve bytes".to_vec();
        assert_eq!(content.len(), 12);

        let record = service
            .upload("report.pdf", Cursor::new(content.clone()))
            .await
            .unwrap();

        assert_eq!(record.size_bytes, 12);
        assert!(is_timestamped(&record.stored_name, "report.pdf"));
        assert_eq!(
            record.stored_name,
            format!("{}_report.pdf", record.uploaded_at.format(NAME_TIMESTAMP_FORMAT))
        );
        assert_eq!(record.checksum, format!("{:x}", md5::compute(&content)));

        let listed = service.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, record.id);
        assert!(!listed[0].deleted);

        service.soft_delete(record.id).await.unwrap();

        let listed = service.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].deleted);
        assert!(listed[0].deleted_at.is_some());

        let result = service.fetch(record.id).await;
        assert!(matches!(result, Err(FileError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_upload_then_fetch_returns_same_bytes() {
        let (_temp_dir, service) = setup_service().await;
        let content: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();

        let record = service
            .upload("data.bin", Cursor::new(content.clone()))
            .await
            .unwrap();
        let (fetched, file) = service.fetch(record.id).await.unwrap();

        assert_eq!(fetched.id, record.id);
        assert_eq!(record.size_bytes as usize, content.len());
        assert_eq!(read_all(file).await, content);

        let on_disk = fs::metadata(service.blobs().upload_path(&record.stored_name))
            .await
            .unwrap();
        assert_eq!(on_disk.len(), record.size_bytes as u64);
    }

    #[tokio::test]
    async fn test_upload_accepts_source_positioned_at_end() {
        let (_temp_dir, service) = setup_service().await;
        let mut source = Cursor::new(b"already read".to_vec());
        source.seek(SeekFrom::End(0)).await.unwrap();

        let record = service.upload("seen.txt", source).await.unwrap();

        assert_eq!(record.size_bytes, 12);
        let (_, file) = service.fetch(record.id).await.unwrap();
        assert_eq!(read_all(file).await, b"already read");
    }

    #[tokio::test]
    async fn test_upload_empty_source_creates_nothing() {
        let (_temp_dir, service) = setup_service().await;

        let result = service.upload("empty.txt", Cursor::new(Vec::<u8>::new())).await;

        assert!(matches!(result, Err(FileError::EmptyOrExhaustedSource)));
        assert!(service.list().await.unwrap().is_empty());
        assert!(dir_names(service.blobs().upload_dir()).await.is_empty());
    }

    #[tokio::test]
    async fn test_upload_rejects_unsafe_name() {
        let (_temp_dir, service) = setup_service().await;

        let result = service
            .upload("../escape.txt", Cursor::new(b"x".to_vec()))
            .await;

        assert!(matches!(result, Err(FileError::InvalidName(_))));
        assert!(service.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_active_excludes_deleted() {
        let (_temp_dir, service) = setup_service().await;
        let kept = service
            .upload("keep.txt", Cursor::new(b"keep".to_vec()))
            .await
            .unwrap();
        let dropped = service
            .upload("drop.txt", Cursor::new(b"drop".to_vec()))
            .await
            .unwrap();
        service.soft_delete(dropped.id).await.unwrap();

        let active = service.list_active().await.unwrap();
        let all = service.list().await.unwrap();

        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, kept.id);
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_describe_returns_deleted_record() {
        let (_temp_dir, service) = setup_service().await;
        let record = service
            .upload("d.txt", Cursor::new(b"d".to_vec()))
            .await
            .unwrap();
        service.soft_delete(record.id).await.unwrap();

        let described = service.describe(record.id).await.unwrap();

        assert!(described.deleted);
        assert!(matches!(
            service.describe(Uuid::new_v4()).await,
            Err(FileError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_soft_delete_moves_blob_to_trash() {
        let (_temp_dir, service) = setup_service().await;
        let record = service
            .upload("notes.txt", Cursor::new(b"some notes".to_vec()))
            .await
            .unwrap();

        let deleted = service.soft_delete(record.id).await.unwrap();

        assert!(deleted.deleted);
        let deleted_at: DateTime<Utc> = deleted.deleted_at.unwrap();
        assert!(!service.blobs().exists(&record.stored_name).await);

        let trash_name = timestamped_name(deleted_at, "notes.txt");
        let trashed = fs::read(service.blobs().trash_path(&trash_name)).await.unwrap();
        assert_eq!(trashed, b"some notes");

        let stored = service.describe(record.id).await.unwrap();
        assert!(stored.deleted);
        assert_eq!(
            stored.deleted_at.map(|t| t.timestamp_micros()),
            Some(deleted_at.timestamp_micros())
        );
    }

    #[tokio::test]
    async fn test_soft_delete_twice_fails_already_deleted() {
        let (_temp_dir, service) = setup_service().await;
        let record = service
            .upload("twice.txt", Cursor::new(b"twice".to_vec()))
            .await
            .unwrap();
        service.soft_delete(record.id).await.unwrap();
        let before = service.describe(record.id).await.unwrap();
        let trash_before = dir_names(service.blobs().trash_dir()).await;

        let result = service.soft_delete(record.id).await;

        assert!(matches!(result, Err(FileError::AlreadyDeleted(id)) if id == record.id));
        assert_eq!(service.describe(record.id).await.unwrap(), before);
        assert_eq!(dir_names(service.blobs().trash_dir()).await, trash_before);
    }

    #[tokio::test]
    async fn test_concurrent_soft_delete_moves_once() {
        let (_temp_dir, service) = setup_service().await;
        let record = service
            .upload("race.txt", Cursor::new(b"race".to_vec()))
            .await
            .unwrap();

        let (a, b) = tokio::join!(service.soft_delete(record.id), service.soft_delete(record.id));

        let results = [a, b];
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let already = results
            .iter()
            .filter(|r| matches!(r, Err(FileError::AlreadyDeleted(_))))
            .count();
        assert_eq!(ok, 1);
        assert_eq!(already, 1);
        assert_eq!(dir_names(service.blobs().trash_dir()).await.len(), 1);
    }

    #[tokio::test]
    async fn test_soft_delete_unknown_id() {
        let (_temp_dir, service) = setup_service().await;

        let result = service.soft_delete(Uuid::new_v4()).await;

        assert!(matches!(result, Err(FileError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_soft_delete_missing_blob_is_partial() {
        let (_temp_dir, service) = setup_service().await;
        let record = service
            .upload("lost.txt", Cursor::new(b"lost".to_vec()))
            .await
            .unwrap();
        fs::remove_file(service.blobs().upload_path(&record.stored_name))
            .await
            .unwrap();

        let result = service.soft_delete(record.id).await;

        match result {
            Err(FileError::Partial { id, source }) => {
                assert_eq!(id, record.id);
                assert!(matches!(*source, FileError::NotFound(_)));
            }
            other => panic!("expected partial failure, got {:?}", other),
        }
        // No rollback: the record stays flagged.
        assert!(service.describe(record.id).await.unwrap().deleted);
    }

    #[tokio::test]
    async fn test_fetch_unknown_id_has_no_side_effects() {
        let (_temp_dir, service) = setup_service().await;
        service
            .upload("x.txt", Cursor::new(b"x".to_vec()))
            .await
            .unwrap();
        let upload_before = dir_names(service.blobs().upload_dir()).await;

        let result = service.fetch(Uuid::new_v4()).await;

        assert!(matches!(result, Err(FileError::NotFound(_))));
        assert_eq!(dir_names(service.blobs().upload_dir()).await, upload_before);
        assert!(dir_names(service.blobs().trash_dir()).await.is_empty());
    }

    /// Failures and delays injected by `FlakyStore`.
    #[derive(Default)]
    pub(crate) struct Faults {
        pub(crate) fail_insert: bool,
        pub(crate) insert_delay: Option<Duration>,
        pub(crate) list_delay: Option<Duration>,
        pub(crate) ping_delay: Option<Duration>,
    }

    /// Wraps the SQLite store with injectable failures.
    struct FlakyStore {
        inner: SqliteMetadataStore,
        faults: Faults,
    }

    async fn pause(delay: Option<Duration>) {
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    #[async_trait]
    impl MetadataStore for FlakyStore {
        async fn insert(&self, record: NewFileRecord) -> FileResult<FileRecord> {
            if self.faults.fail_insert {
                return Err(FileError::Io(io::Error::other("insert refused")));
            }
            pause(self.faults.insert_delay).await;
            self.inner.insert(record).await
        }

        async fn find_all(&self) -> FileResult<Vec<FileRecord>> {
            pause(self.faults.list_delay).await;
            self.inner.find_all().await
        }

        async fn find_by_id(&self, id: Uuid) -> FileResult<FileRecord> {
            self.inner.find_by_id(id).await
        }

        async fn mark_deleted(
            &self,
            id: Uuid,
            deleted_at: chrono::DateTime<Utc>,
        ) -> FileResult<u64> {
            self.inner.mark_deleted(id, deleted_at).await
        }

        async fn ping(&self) -> FileResult<()> {
            pause(self.faults.ping_delay).await;
            self.inner.ping().await
        }
    }

    pub(crate) async fn flaky_service(faults: Faults, timeout: Duration) -> (TempDir, FileService) {
        let temp_dir = TempDir::new().unwrap();
        let blobs = BlobStore::new(temp_dir.path().join("upload"), temp_dir.path().join("trash"));
        blobs.ensure_dirs().await.unwrap();
        let store = FlakyStore {
            inner: SqliteMetadataStore::new(memory_pool().await),
            faults,
        };
        (temp_dir, FileService::new(Arc::new(store), blobs, timeout))
    }

    #[tokio::test]
    async fn test_failed_insert_leaves_no_blob() {
        let faults = Faults {
            fail_insert: true,
            ..Faults::default()
        };
        let (_temp_dir, service) = flaky_service(faults, Duration::from_secs(5)).await;

        let result = service
            .upload("orphan.txt", Cursor::new(b"orphan".to_vec()))
            .await;

        assert!(matches!(result, Err(FileError::Io(_))));
        assert!(dir_names(service.blobs().upload_dir()).await.is_empty());
    }

    #[tokio::test]
    async fn test_slow_metadata_store_times_out() {
        let faults = Faults {
            list_delay: Some(Duration::from_millis(500)),
            ..Faults::default()
        };
        let (_temp_dir, service) = flaky_service(faults, Duration::from_millis(50)).await;

        let result = service.list().await;

        assert!(matches!(result, Err(FileError::Timeout("metadata list"))));
    }

    #[tokio::test]
    async fn test_insert_timeout_keeps_blob() {
        let faults = Faults {
            insert_delay: Some(Duration::from_millis(500)),
            ..Faults::default()
        };
        let (_temp_dir, service) = flaky_service(faults, Duration::from_millis(50)).await;

        let result = service
            .upload("late.txt", Cursor::new(b"late".to_vec()))
            .await;

        assert!(matches!(result, Err(FileError::Timeout("metadata insert"))));
        let names = dir_names(service.blobs().upload_dir()).await;
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with("_late.txt"));
    }

    #[tokio::test]
    async fn test_trash_move_timeout_is_partial() {
        let (_temp_dir, service) = setup_service().await;
        let service = FileService {
            timeout: Duration::from_millis(50),
            ..service
        };
        let id = Uuid::new_v4();
        let stalled = async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok::<_, FileError>(std::path::PathBuf::new())
        };

        let result = service.trash_or_partial(id, "stalled.txt", stalled).await;

        match result {
            Err(FileError::Partial { id: partial_id, source }) => {
                assert_eq!(partial_id, id);
                assert!(matches!(*source, FileError::Timeout("blob move")));
            }
            other => panic!("expected Partial, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ping_metadata_times_out() {
        let faults = Faults {
            ping_delay: Some(Duration::from_millis(500)),
            ..Faults::default()
        };
        let (_temp_dir, service) = flaky_service(faults, Duration::from_millis(50)).await;

        let result = service.ping_metadata().await;

        assert!(matches!(result, Err(FileError::Timeout("metadata ping"))));
    }
}
