use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sidecar record written next to a finalized file.
///
/// One-to-one with the completed upload session, immutable once
/// written, and the only place the display name, MIME type and
/// content hash are recorded — the file itself is stored under its
/// bare identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    pub id: String,
    pub name: String,
    pub size: i64,
    pub mime_type: String,
    pub sha256: String,
    pub upload_id: String,
    pub created: DateTime<Utc>,
    pub device: String,
}
