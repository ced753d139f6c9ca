//! src/services/blob_store.rs
//!
//! BlobStore — file payloads on local disk. Active blobs live directly under
//! `upload_dir/{stored_name}`; soft-deleted blobs are moved into
//! `trash_dir/{trash_name}`. The store keeps no state beyond the two paths,
//! so clones can be shared freely across concurrent requests.

use crate::services::error::{FileError, FileResult};
use md5::Context;
use std::{
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWriteExt, BufReader},
};
use tracing::{debug, warn};
use uuid::Uuid;

const MAX_NAME_LEN: usize = 255;
const COPY_BUF_LEN: usize = 64 * 1024;

/// Result of a completed blob write.
#[derive(Debug, Clone)]
pub struct WrittenBlob {
    pub path: PathBuf,
    pub bytes_written: u64,
    pub checksum: String,
}

#[derive(Clone, Debug)]
pub struct BlobStore {
    upload_dir: PathBuf,
    trash_dir: PathBuf,
}

impl BlobStore {
    pub fn new(upload_dir: impl Into<PathBuf>, trash_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            trash_dir: trash_dir.into(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn trash_dir(&self) -> &Path {
        &self.trash_dir
    }

    /// Create both storage directories if they are missing.
    pub async fn ensure_dirs(&self) -> FileResult<()> {
        fs::create_dir_all(&self.upload_dir).await?;
        fs::create_dir_all(&self.trash_dir).await?;
        Ok(())
    }

    pub fn upload_path(&self, stored_name: &str) -> PathBuf {
        self.upload_dir.join(stored_name)
    }

    pub fn trash_path(&self, trash_name: &str) -> PathBuf {
        self.trash_dir.join(trash_name)
    }

    #[cfg(test)]
    pub async fn exists(&self, stored_name: &str) -> bool {
        fs::try_exists(self.upload_path(stored_name))
            .await
            .unwrap_or(false)
    }

    /// Persist every byte of `source` under `upload_dir/{stored_name}`.
    ///
    /// The source is rewound to offset 0 first, so a handle that was already
    /// read (for sizing or sniffing) still copies in full. A source with no
    /// bytes left at copy time is rejected before any file is created.
    ///
    /// Bytes go to a temporary file that is fsynced and then hard-linked into
    /// place, which fails instead of replacing an existing blob.
    pub async fn write<R>(&self, stored_name: &str, source: &mut R) -> FileResult<WrittenBlob>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        validate_file_name(stored_name)?;

        source.seek(SeekFrom::Start(0)).await?;
        let mut reader = BufReader::with_capacity(COPY_BUF_LEN, source);
        if reader.fill_buf().await?.is_empty() {
            return Err(FileError::EmptyOrExhaustedSource);
        }

        fs::create_dir_all(&self.upload_dir).await?;
        let file_path = self.upload_path(stored_name);
        let tmp_path = self.upload_dir.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let copied = async {
            let mut digest = Context::new();
            let mut total: u64 = 0;
            let mut buf = vec![0u8; COPY_BUF_LEN];
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                digest.consume(&buf[..n]);
                file.write_all(&buf[..n]).await?;
                total += n as u64;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok::<_, io::Error>((total, format!("{:x}", digest.compute())))
        }
        .await;
        drop(file);

        let (bytes_written, checksum) = match copied {
            Ok(done) => done,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(FileError::Io(err));
            }
        };

        let linked = fs::hard_link(&tmp_path, &file_path).await;
        if let Err(err) = fs::remove_file(&tmp_path).await {
            warn!("failed to remove temp file {}: {}", tmp_path.display(), err);
        }
        match linked {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(FileError::StoredNameTaken(stored_name.to_string()));
            }
            Err(err) => return Err(FileError::Io(err)),
        }

        debug!(
            "wrote {} bytes to {}",
            bytes_written,
            file_path.display()
        );
        Ok(WrittenBlob {
            path: file_path,
            bytes_written,
            checksum,
        })
    }

    /// Open an active blob for sequential reading.
    pub async fn read(&self, stored_name: &str) -> FileResult<File> {
        validate_file_name(stored_name)?;
        File::open(self.upload_path(stored_name))
            .await
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound => FileError::NotFound(format!("blob `{}`", stored_name)),
                _ => FileError::Io(err),
            })
    }

    /// Move `upload_dir/{stored_name}` to `trash_dir/{trash_name}`.
    ///
    /// The blob is hard-linked into the trash and then unlinked from the
    /// upload directory. Linking fails on an existing target, so concurrent
    /// moves onto one trash name cannot replace each other's blob.
    pub async fn move_to_trash(&self, stored_name: &str, trash_name: &str) -> FileResult<PathBuf> {
        validate_file_name(stored_name)?;
        validate_file_name(trash_name)?;

        let source = self.upload_path(stored_name);
        let target = self.trash_path(trash_name);
        fs::create_dir_all(&self.trash_dir).await?;

        fs::hard_link(&source, &target)
            .await
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound => FileError::NotFound(format!("blob `{}`", stored_name)),
                ErrorKind::AlreadyExists => FileError::Io(io::Error::new(
                    ErrorKind::AlreadyExists,
                    format!("trash entry {} already exists", target.display()),
                )),
                _ => FileError::Io(err),
            })?;

        if let Err(err) = fs::remove_file(&source).await {
            // Undo the link so the blob is only in one place.
            if let Err(undo) = fs::remove_file(&target).await {
                warn!("failed to unlink trash entry {}: {}", target.display(), undo);
            }
            return Err(FileError::Io(err));
        }

        debug!("moved {} to {}", source.display(), target.display());
        Ok(target)
    }

    /// Remove an active blob. Missing blobs are not an error.
    pub async fn remove(&self, stored_name: &str) -> FileResult<()> {
        validate_file_name(stored_name)?;
        match fs::remove_file(self.upload_path(stored_name)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(FileError::Io(err)),
        }
    }

    /// Write, read back and delete a scratch file in both directories.
    pub async fn probe(&self) -> FileResult<()> {
        for dir in [&self.upload_dir, &self.trash_dir] {
            let tmp_path = dir.join(format!(".readyz-{}", Uuid::new_v4()));
            fs::write(&tmp_path, b"readyz").await?;
            let read_back = fs::read(&tmp_path).await;
            let _ = fs::remove_file(&tmp_path).await;
            if read_back? != b"readyz" {
                return Err(FileError::Io(io::Error::new(
                    ErrorKind::InvalidData,
                    format!("content mismatch in {}", dir.display()),
                )));
            }
        }
        Ok(())
    }
}

/// Reject names that are not a single plain path component.
pub fn validate_file_name(name: &str) -> FileResult<()> {
    let invalid = name.is_empty()
        || name.len() > MAX_NAME_LEN
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.chars().any(|c| c.is_control());
    if invalid {
        return Err(FileError::InvalidName(name.to_string()));
    }
    Ok(())
}
