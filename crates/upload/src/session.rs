use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tracing::debug;

use crate::hash::sha256_file;
use crate::meta::FileMeta;
use crate::{UploadError, mime};

/// One in-flight chunked upload, backed by a temporary file.
///
/// The offset is monotonically non-decreasing and, for a resumed
/// session, always derived from the temp file's actual size — there
/// is no separate counter that could drift after a crash. A session
/// ends in exactly one of two terminal states: finalized (temp file
/// renamed to the bare identifier, sidecar written) or terminated
/// (temp file and sidecar removed).
#[derive(Debug)]
pub struct UploadSession {
    id: String,
    temp_path: PathBuf,
    file: Option<File>,
    file_name: String,
    device: String,
    declared_length: Option<i64>,
    max_size: i64,
    offset: i64,
    created_at: DateTime<Utc>,
}

impl UploadSession {
    /// Creates the temporary file and a session at offset 0.
    pub(crate) async fn start(
        id: String,
        temp_path: PathBuf,
        declared_length: Option<i64>,
        file_name: String,
        device: String,
        max_size: i64,
    ) -> Result<Self, UploadError> {
        let file = File::create(&temp_path).await?;
        Ok(Self {
            id,
            temp_path,
            file: Some(file),
            file_name,
            device,
            declared_length,
            max_size,
            offset: 0,
            created_at: Utc::now(),
        })
    }

    /// Reopens an existing temporary file and derives the current
    /// offset from its size. The declared length is unknown after a
    /// restart; a client that deferred it must declare it again.
    pub(crate) async fn resume(
        id: String,
        temp_path: PathBuf,
        max_size: i64,
    ) -> Result<Self, UploadError> {
        let file = match OpenOptions::new().read(true).write(true).open(&temp_path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(UploadError::NotFound);
            }
            Err(e) => return Err(e.into()),
        };
        let offset = file.metadata().await?.len() as i64;

        Ok(Self {
            file_name: id.clone(),
            id,
            temp_path,
            file: Some(file),
            device: "unknown".into(),
            declared_length: None,
            max_size,
            offset,
            created_at: Utc::now(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn declared_length(&self) -> Option<i64> {
        self.declared_length
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// True once the declared length is known and fully written.
    pub fn is_complete(&self) -> bool {
        self.declared_length == Some(self.offset)
    }

    /// Sets a previously deferred length. Only legal while unknown.
    pub(crate) fn declare_length(&mut self, length: i64) -> Result<(), UploadError> {
        if self.declared_length.is_some() {
            return Err(UploadError::LengthAlreadyDeclared);
        }
        self.declared_length = Some(length);
        Ok(())
    }

    /// Streams `src` into the temp file starting at `offset`.
    ///
    /// Returns the number of bytes written. The session offset is
    /// advanced as bytes land on disk, so a partial write still moves
    /// it forward and the caller can retry from the new offset. The
    /// offset never passes the declared length, and while the length
    /// is still deferred the store-wide maximum bounds it the same
    /// way: overshooting input is rejected before the excess byte is
    /// written.
    pub(crate) async fn write_chunk<R>(
        &mut self,
        offset: i64,
        src: &mut R,
    ) -> Result<i64, UploadError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        if let Some(len) = self.declared_length {
            if offset > len {
                return Err(UploadError::LengthExceeded(len));
            }
        } else if offset > self.max_size {
            return Err(UploadError::TooLarge(offset, self.max_size));
        }

        let file = self.file_mut().await?;
        // Seek unconditionally: a freshly resumed session's cursor
        // sits at zero regardless of the derived offset.
        file.seek(SeekFrom::Start(offset as u64)).await?;
        self.offset = offset;

        let mut written: i64 = 0;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let cap = self.declared_length.unwrap_or(self.max_size);
            let remaining = (cap - self.offset).max(0) as usize;
            let max = if remaining == 0 {
                // Cap reached; any further input byte is an overflow.
                let extra = src.read(&mut buf[..1]).await?;
                if extra == 0 {
                    break;
                }
                return match self.declared_length {
                    Some(len) => Err(UploadError::LengthExceeded(len)),
                    None => Err(UploadError::TooLarge(self.offset + 1, self.max_size)),
                };
            } else {
                remaining.min(buf.len())
            };

            let n = src.read(&mut buf[..max]).await?;
            if n == 0 {
                break;
            }
            let file = self.file.as_mut().expect("file open for write");
            file.write_all(&buf[..n]).await?;
            self.offset += n as i64;
            written += n as i64;
        }
        if let Some(file) = self.file.as_mut() {
            file.flush().await?;
        }

        debug!(upload_id = %self.id, offset = self.offset, chunk_size = written, "chunk written");
        Ok(written)
    }

    /// Closes the temp file, hashes its full contents, atomically
    /// renames it to `final_path` and writes the sidecar record.
    ///
    /// The rename is the single publish step: partial content is
    /// never observable under the final name. On any failure the temp
    /// file (or, after the rename, the final file without a sidecar)
    /// is left in place for diagnosis.
    pub(crate) async fn finalize(
        &mut self,
        final_path: &Path,
        meta_path: &Path,
    ) -> Result<FileMeta, UploadError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }

        // Hash by re-reading from offset 0 so the digest is not
        // coupled to chunk boundaries.
        let sha256 = sha256_file(&self.temp_path).await?;
        tokio::fs::rename(&self.temp_path, final_path).await?;

        let meta = FileMeta {
            id: self.id.clone(),
            name: self.file_name.clone(),
            size: self.offset,
            mime_type: mime::from_name(&self.file_name).to_string(),
            sha256,
            upload_id: self.id.clone(),
            created: self.created_at,
            device: self.device.clone(),
        };
        tokio::fs::write(meta_path, serde_json::to_vec(&meta)?).await?;

        Ok(meta)
    }

    /// Closes the temp file and removes it along with any sidecar.
    /// Already-absent files are not an error, so calling this twice
    /// is safe.
    pub(crate) async fn terminate(&mut self, meta_path: &Path) -> Result<(), UploadError> {
        self.file.take();
        remove_if_exists(&self.temp_path).await?;
        remove_if_exists(meta_path).await?;
        Ok(())
    }

    async fn file_mut(&mut self) -> Result<&mut File, UploadError> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&self.temp_path)
                .await?;
            self.file = Some(file);
        }
        Ok(self.file.as_mut().expect("just opened"))
    }
}

/// Removes a file, treating "already absent" as success.
pub(crate) async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TEST_MAX: i64 = 10 * 1024 * 1024;

    async fn start_session(dir: &TempDir, declared: Option<i64>) -> UploadSession {
        UploadSession::start(
            "sess-1".into(),
            dir.path().join("sess-1.part"),
            declared,
            "notes.txt".into(),
            "laptop".into(),
            TEST_MAX,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn contiguous_chunks_advance_offset() {
        let dir = TempDir::new().unwrap();
        let mut session = start_session(&dir, Some(10)).await;

        let n = session.write_chunk(0, &mut &b"01234"[..]).await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(session.offset(), 5);

        let n = session.write_chunk(5, &mut &b"56789"[..]).await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(session.offset(), 10);
        assert!(session.is_complete());

        let content = std::fs::read(dir.path().join("sess-1.part")).unwrap();
        assert_eq!(&content, b"0123456789");
    }

    #[tokio::test]
    async fn rewrite_at_earlier_offset_seeks() {
        let dir = TempDir::new().unwrap();
        let mut session = start_session(&dir, None).await;

        session.write_chunk(0, &mut &b"AAAA"[..]).await.unwrap();
        session.write_chunk(2, &mut &b"BB"[..]).await.unwrap();
        assert_eq!(session.offset(), 4);

        let content = std::fs::read(dir.path().join("sess-1.part")).unwrap();
        assert_eq!(&content, b"AABB");
    }

    #[tokio::test]
    async fn write_past_declared_length_rejected() {
        let dir = TempDir::new().unwrap();
        let mut session = start_session(&dir, Some(4)).await;

        let err = session.write_chunk(0, &mut &b"toolong"[..]).await.unwrap_err();
        assert!(matches!(err, UploadError::LengthExceeded(4)));
        // Offset never passes the declared length.
        assert_eq!(session.offset(), 4);
    }

    #[tokio::test]
    async fn deferred_length_bounded_by_max_size() {
        let dir = TempDir::new().unwrap();
        let mut session = UploadSession::start(
            "sess-1".into(),
            dir.path().join("sess-1.part"),
            None,
            "blob.bin".into(),
            "laptop".into(),
            100,
        )
        .await
        .unwrap();

        let payload = vec![0u8; 1000];
        let err = session.write_chunk(0, &mut &payload[..]).await.unwrap_err();
        assert!(matches!(err, UploadError::TooLarge(101, 100)));

        // Nothing past the cap lands on disk.
        assert_eq!(session.offset(), 100);
        let len = std::fs::metadata(dir.path().join("sess-1.part")).unwrap().len();
        assert_eq!(len, 100);
    }

    #[tokio::test]
    async fn resume_derives_offset_from_file_size() {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("sess-1.part");
        {
            let mut session = start_session(&dir, Some(100)).await;
            session.write_chunk(0, &mut &b"hello"[..]).await.unwrap();
        }
        // Simulated restart: all in-memory state is gone.
        let mut resumed = UploadSession::resume("sess-1".into(), temp.clone(), TEST_MAX)
            .await
            .unwrap();
        assert_eq!(resumed.offset(), 5);
        assert_eq!(resumed.declared_length(), None);

        resumed.write_chunk(5, &mut &b" world"[..]).await.unwrap();
        let content = std::fs::read(&temp).unwrap();
        assert_eq!(&content, b"hello world");
    }

    #[tokio::test]
    async fn resume_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = UploadSession::resume("ghost".into(), dir.path().join("ghost.part"), TEST_MAX)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::NotFound));
    }

    #[tokio::test]
    async fn declare_length_only_once() {
        let dir = TempDir::new().unwrap();
        let mut session = start_session(&dir, None).await;

        session.declare_length(42).unwrap();
        assert_eq!(session.declared_length(), Some(42));
        assert!(matches!(
            session.declare_length(43),
            Err(UploadError::LengthAlreadyDeclared)
        ));
    }

    #[tokio::test]
    async fn finalize_renames_and_writes_sidecar() {
        let dir = TempDir::new().unwrap();
        let final_path = dir.path().join("sess-1");
        let meta_path = dir.path().join("sess-1.meta");

        let mut session = start_session(&dir, Some(5)).await;
        session.write_chunk(0, &mut &b"hello"[..]).await.unwrap();

        assert!(!final_path.exists(), "final name must not exist before finalize");
        let meta = session.finalize(&final_path, &meta_path).await.unwrap();

        assert!(final_path.exists());
        assert!(!dir.path().join("sess-1.part").exists());
        assert_eq!(meta.size, 5);
        assert_eq!(meta.mime_type, "text/plain");
        assert_eq!(meta.sha256, crate::sha256_bytes(b"hello"));

        let stored: FileMeta =
            serde_json::from_slice(&std::fs::read(&meta_path).unwrap()).unwrap();
        assert_eq!(stored, meta);
    }

    #[tokio::test]
    async fn terminate_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let meta_path = dir.path().join("sess-1.meta");
        std::fs::write(&meta_path, b"{}").unwrap();

        let mut session = start_session(&dir, None).await;
        session.write_chunk(0, &mut &b"junk"[..]).await.unwrap();

        session.terminate(&meta_path).await.unwrap();
        assert!(!dir.path().join("sess-1.part").exists());
        assert!(!meta_path.exists());

        // Second call finds nothing to remove and still succeeds.
        session.terminate(&meta_path).await.unwrap();
    }
}
