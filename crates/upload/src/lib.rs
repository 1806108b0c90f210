//! Resumable upload engine.
//!
//! An [`UploadStore`] maps server-generated identifiers to in-flight
//! [`UploadSession`]s backed by temporary files. Chunks are written at
//! exact offsets; on completion the temp file is hashed, atomically
//! renamed to its identifier, and a [`FileMeta`] sidecar is written
//! next to it. All paths derive from the identifier plus configured
//! suffixes — the directory listing is the index, nothing else is
//! persisted.

mod hash;
mod meta;
pub mod mime;
mod session;
mod store;

pub use hash::{sha256_bytes, sha256_file};
pub use meta::FileMeta;
pub use session::UploadSession;
pub use store::{StoreConfig, UploadStore, valid_id};

/// Errors produced by the upload engine.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// No session or finalized file matches the identifier.
    #[error("upload not found")]
    NotFound,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata error: {0}")]
    Meta(#[from] serde_json::Error),

    #[error("upload length already declared")]
    LengthAlreadyDeclared,

    /// The client's claimed offset does not match the session's.
    #[error("offset mismatch: session is at {expected}, client sent {got}")]
    OffsetMismatch { expected: i64, got: i64 },

    #[error("write would exceed the declared length of {0} bytes")]
    LengthExceeded(i64),

    #[error("upload of {0} bytes exceeds the maximum of {1}")]
    TooLarge(i64, i64),

    /// Concatenation is part of the protocol surface but this store
    /// rejects it rather than silently accepting.
    #[error("upload concatenation is not supported")]
    ConcatUnsupported,
}
