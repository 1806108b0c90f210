use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use lanshare_protocol::constants::{META_SUFFIX, TEMP_SUFFIX};

use crate::session::{UploadSession, remove_if_exists};
use crate::{FileMeta, UploadError};

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding temp files, finalized files and sidecars.
    pub base_dir: PathBuf,
    /// Suffix for in-flight temp files (default `.part`).
    pub temp_suffix: String,
    /// Suffix for sidecar metadata records (default `.meta`).
    pub meta_suffix: String,
    /// Maximum accepted upload size in bytes.
    pub max_size: i64,
}

impl StoreConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            temp_suffix: TEMP_SUFFIX.to_string(),
            meta_suffix: META_SUFFIX.to_string(),
            max_size: 10 * 1024 * 1024 * 1024,
        }
    }
}

/// Identifier-keyed directory of upload sessions.
///
/// All paths derive deterministically from the identifier plus the
/// configured suffixes, so the store persists no index of its own:
/// lookups fall back to reopening the temp file on disk, which is
/// what makes sessions survive a process restart.
///
/// Chunk writes to different sessions proceed in parallel; writes to
/// the same session are serialized by the per-session lock.
pub struct UploadStore {
    cfg: StoreConfig,
    sessions: Mutex<HashMap<String, Arc<Mutex<UploadSession>>>>,
}

impl UploadStore {
    /// Creates the store, ensuring the base directory exists.
    pub async fn new(cfg: StoreConfig) -> Result<Self, UploadError> {
        tokio::fs::create_dir_all(&cfg.base_dir).await?;
        Ok(Self {
            cfg,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn temp_path(&self, id: &str) -> PathBuf {
        self.cfg
            .base_dir
            .join(format!("{id}{}", self.cfg.temp_suffix))
    }

    pub fn final_path(&self, id: &str) -> PathBuf {
        self.cfg.base_dir.join(id)
    }

    pub fn meta_path(&self, id: &str) -> PathBuf {
        self.cfg
            .base_dir
            .join(format!("{id}{}", self.cfg.meta_suffix))
    }

    /// Starts a new session and returns its identifier.
    ///
    /// `declared_length` of `None` means the length is deferred.
    /// `metadata` carries opaque key/value pairs from the client; at
    /// minimum `filename`, optionally `device`.
    pub async fn create(
        &self,
        declared_length: Option<i64>,
        metadata: &HashMap<String, String>,
    ) -> Result<String, UploadError> {
        if let Some(len) = declared_length {
            if len > self.cfg.max_size {
                return Err(UploadError::TooLarge(len, self.cfg.max_size));
            }
        }

        let id = Uuid::new_v4().to_string();
        let file_name = metadata
            .get("filename")
            .cloned()
            .unwrap_or_else(|| id.clone());
        let device = metadata
            .get("device")
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());

        let session = UploadSession::start(
            id.clone(),
            self.temp_path(&id),
            declared_length,
            file_name.clone(),
            device,
            self.cfg.max_size,
        )
        .await?;

        info!(upload_id = %id, filename = %file_name, size = ?declared_length, "new upload created");

        self.sessions
            .lock()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(session)));
        Ok(id)
    }

    /// Current `(offset, declared_length)` for a session.
    pub async fn status(&self, id: &str) -> Result<(i64, Option<i64>), UploadError> {
        let session = self.session(id).await?;
        let session = session.lock().await;
        Ok((session.offset(), session.declared_length()))
    }

    /// Appends `src` at `offset`; returns the bytes written.
    pub async fn write_chunk<R>(
        &self,
        id: &str,
        offset: i64,
        src: &mut R,
    ) -> Result<i64, UploadError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let session = self.session(id).await?;
        let mut session = session.lock().await;
        session.write_chunk(offset, src).await
    }

    /// Protocol-facing write: verifies, under the session lock, that
    /// `offset` matches the session's current offset, then streams
    /// the chunk and returns the new offset. The check and the write
    /// are one atomic step, so two racing writers cannot both pass
    /// the offset test.
    pub async fn write_chunk_checked<R>(
        &self,
        id: &str,
        offset: i64,
        src: &mut R,
    ) -> Result<i64, UploadError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let session = self.session(id).await?;
        let mut session = session.lock().await;
        if session.offset() != offset {
            return Err(UploadError::OffsetMismatch {
                expected: session.offset(),
                got: offset,
            });
        }
        session.write_chunk(offset, src).await?;
        Ok(session.offset())
    }

    /// New offset after the most recent write.
    pub async fn offset(&self, id: &str) -> Result<i64, UploadError> {
        Ok(self.status(id).await?.0)
    }

    /// Declares a previously deferred length.
    pub async fn declare_length(&self, id: &str, length: i64) -> Result<(), UploadError> {
        if length > self.cfg.max_size {
            return Err(UploadError::TooLarge(length, self.cfg.max_size));
        }
        let session = self.session(id).await?;
        let mut session = session.lock().await;
        session.declare_length(length)
    }

    /// True once the session has received its full declared length.
    pub async fn is_complete(&self, id: &str) -> Result<bool, UploadError> {
        let session = self.session(id).await?;
        let session = session.lock().await;
        Ok(session.is_complete())
    }

    /// Finalizes a session: hash, atomic rename, sidecar write. The
    /// session is forgotten only after all three succeed.
    pub async fn finalize(&self, id: &str) -> Result<FileMeta, UploadError> {
        let session = self.session(id).await?;
        let meta = {
            let mut session = session.lock().await;
            session
                .finalize(&self.final_path(id), &self.meta_path(id))
                .await?
        };
        self.sessions.lock().await.remove(id);

        info!(
            upload_id = %id,
            filename = %meta.name,
            size = meta.size,
            sha256 = %meta.sha256,
            "upload completed"
        );
        Ok(meta)
    }

    /// Aborts a session and deletes its artifacts. Safe to call for
    /// identifiers that are unknown or already terminated.
    pub async fn terminate(&self, id: &str) -> Result<(), UploadError> {
        if !valid_id(id) {
            return Ok(());
        }

        let taken = self.sessions.lock().await.remove(id);
        match taken {
            Some(session) => {
                let mut session = session.lock().await;
                session.terminate(&self.meta_path(id)).await?;
            }
            None => {
                remove_if_exists(&self.temp_path(id)).await?;
                remove_if_exists(&self.meta_path(id)).await?;
            }
        }
        info!(upload_id = %id, "upload terminated");
        Ok(())
    }

    /// Concatenation is part of the upload protocol surface but this
    /// store rejects it outright rather than silently accepting.
    pub fn concatenate(&self, _partial_ids: &[String]) -> Result<String, UploadError> {
        Err(UploadError::ConcatUnsupported)
    }

    /// Capability queries, mirroring the protocol's feature
    /// negotiation. Concatenation is advertised as absent.
    pub fn supports_termination(&self) -> bool {
        true
    }

    pub fn supports_deferred_length(&self) -> bool {
        true
    }

    pub fn supports_concatenation(&self) -> bool {
        false
    }

    /// Loads the sidecar record of a finalized file.
    pub async fn load_meta(&self, id: &str) -> Result<FileMeta, UploadError> {
        if !valid_id(id) {
            return Err(UploadError::NotFound);
        }
        let data = match tokio::fs::read(self.meta_path(id)).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(UploadError::NotFound);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&data)?)
    }

    /// Lists sidecar records of all finalized files.
    pub async fn list_files(&self) -> Result<Vec<FileMeta>, UploadError> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.cfg.base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(id) = name.strip_suffix(self.cfg.meta_suffix.as_str()) else {
                continue;
            };
            match self.load_meta(id).await {
                Ok(meta) => files.push(meta),
                Err(e) => warn!(file_id = %id, "skipping unreadable sidecar: {e}"),
            }
        }
        Ok(files)
    }

    /// Deletes a finalized file and its sidecar. Already-absent files
    /// are not an error.
    pub async fn delete_file(&self, id: &str) -> Result<(), UploadError> {
        if !valid_id(id) {
            return Ok(());
        }
        remove_if_exists(&self.final_path(id)).await?;
        remove_if_exists(&self.meta_path(id)).await?;
        info!(file_id = %id, "file deleted");
        Ok(())
    }

    /// In-memory session if present, otherwise resumed from disk.
    async fn session(&self, id: &str) -> Result<Arc<Mutex<UploadSession>>, UploadError> {
        if !valid_id(id) {
            return Err(UploadError::NotFound);
        }

        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(id) {
            return Ok(Arc::clone(session));
        }

        let session =
            UploadSession::resume(id.to_string(), self.temp_path(id), self.cfg.max_size).await?;
        let session = Arc::new(Mutex::new(session));
        sessions.insert(id.to_string(), Arc::clone(&session));
        Ok(session)
    }

    pub fn base_dir(&self) -> &Path {
        &self.cfg.base_dir
    }
}

/// Identifiers are server-generated UUIDs; anything else (and in
/// particular anything containing path separators) never names a
/// session.
pub fn valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
}
