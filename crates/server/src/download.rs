//! Byte-range download of finalized files, plus checksum reporting.

use axum::body::Body;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::api::{AppState, authenticate};
use crate::error::ServerError;

/// Serves a finalized file, honoring a single `Range: bytes=` span.
pub async fn serve_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    authenticate(&state, &headers, query.as_deref())?;

    let meta = state.store.load_meta(&id).await?;
    let path = state.store.final_path(&id);
    let mut file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(ServerError::NotFound),
        Err(e) => return Err(ServerError::Internal(format!("open failed: {e}"))),
    };
    let size = meta.size.max(0) as u64;

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(|raw| parse_range(raw, size));

    let (status, start, len) = match range {
        None => (StatusCode::OK, 0, size),
        Some(Some((start, end))) => (StatusCode::PARTIAL_CONTENT, start, end - start + 1),
        Some(None) => {
            // Unsatisfiable or malformed range.
            return Ok(Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{size}"))
                .body(Body::empty())
                .expect("static response"));
        }
    };

    if start > 0 {
        file.seek(SeekFrom::Start(start))
            .await
            .map_err(|e| ServerError::Internal(format!("seek failed: {e}")))?;
    }
    debug!(file_id = %id, start, len, "serving file");

    let reader = file.take(len);
    let body = Body::from_stream(ReaderStream::new(reader));

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, &meta.mime_type)
        .header(header::CONTENT_LENGTH, len.to_string())
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::ETAG, format!("\"{}\"", meta.sha256))
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", meta.name.replace('"', "")),
        );
    if status == StatusCode::PARTIAL_CONTENT {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {start}-{}/{size}", start + len - 1),
        );
    }
    builder
        .body(body)
        .map_err(|e| ServerError::Internal(e.to_string()))
}

#[derive(Serialize)]
struct ChecksumResponse {
    id: String,
    sha256: String,
    size: i64,
}

/// Reports the recorded content hash so receivers can verify a
/// completed download without re-reading the file themselves. Falls
/// back to recomputing when the sidecar is missing but the file
/// itself survives.
pub async fn file_sha256(
    State(state): State<AppState>,
    Path(id): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ServerError> {
    authenticate(&state, &headers, query.as_deref())?;

    let (sha256, size) = match state.store.load_meta(&id).await {
        Ok(meta) => (meta.sha256, meta.size),
        Err(lanshare_upload::UploadError::NotFound) => {
            if !lanshare_upload::valid_id(&id) {
                return Err(ServerError::NotFound);
            }
            let path = state.store.final_path(&id);
            let size = match tokio::fs::metadata(&path).await {
                Ok(m) if m.is_file() => m.len() as i64,
                _ => return Err(ServerError::NotFound),
            };
            let sha256 = lanshare_upload::sha256_file(&path)
                .await
                .map_err(|e| ServerError::Internal(format!("hash failed: {e}")))?;
            (sha256, size)
        }
        Err(e) => return Err(e.into()),
    };

    Ok(axum::Json(ChecksumResponse { id, sha256, size }))
}

/// Parses a single-span `bytes=` range against a known size.
/// Returns `None` for anything malformed or unsatisfiable.
fn parse_range(raw: &str, size: u64) -> Option<(u64, u64)> {
    let spec = raw.strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None; // multipart ranges are not supported
    }
    let (start_s, end_s) = spec.split_once('-')?;

    if start_s.is_empty() {
        // Suffix form: last N bytes.
        let n: u64 = end_s.parse().ok()?;
        if n == 0 || size == 0 {
            return None;
        }
        let start = size.saturating_sub(n);
        return Some((start, size - 1));
    }

    let start: u64 = start_s.parse().ok()?;
    if start >= size {
        return None;
    }
    let end = if end_s.is_empty() {
        size - 1
    } else {
        end_s.parse::<u64>().ok()?.min(size - 1)
    };
    if end < start {
        return None;
    }
    Some((start, end))
}
