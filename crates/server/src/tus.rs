//! Resumable upload endpoints (tus 1.0 core protocol plus the
//! creation, creation-defer-length and termination extensions).
//!
//! Concatenation is deliberately rejected with 501 rather than left
//! unrouted, so clients probing for it get a definitive answer.

use std::collections::HashMap;

use axum::body::Body;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::TryStreamExt;
use tokio_util::io::StreamReader;
use tracing::info;

use lanshare_protocol::constants::{TUS_EXTENSIONS, TUS_VERSION, UPLOAD_BASE_PATH};
use lanshare_protocol::{WireMessage, now_ts};

use crate::api::{AppState, authenticate};
use crate::error::ServerError;

/// Capability discovery response. No auth and no version check, per
/// protocol. Served from a layer outside CORS, which would otherwise
/// swallow every OPTIONS request as a preflight.
pub fn capabilities(max_size: i64) -> Response {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Tus-Resumable", TUS_VERSION)
        .header("Tus-Version", TUS_VERSION)
        .header("Tus-Extension", TUS_EXTENSIONS)
        .header("Tus-Max-Size", max_size.to_string())
        .body(Body::empty())
        .expect("static response")
}

/// Creates an upload and returns its location.
pub async fn create(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    let device = authenticate(&state, &headers, query.as_deref())?;
    check_version(&headers)?;

    if headers.contains_key("Upload-Concat") {
        return Err(ServerError::NotImplemented);
    }

    let declared = match (
        header_i64(&headers, "Upload-Length")?,
        headers.contains_key("Upload-Defer-Length"),
    ) {
        (Some(_), true) => {
            return Err(ServerError::BadRequest(
                "Upload-Length and Upload-Defer-Length are mutually exclusive".into(),
            ));
        }
        (Some(len), false) if len >= 0 => Some(len),
        (Some(_), false) => {
            return Err(ServerError::BadRequest("negative Upload-Length".into()));
        }
        (None, true) => None,
        (None, false) => {
            return Err(ServerError::BadRequest(
                "either Upload-Length or Upload-Defer-Length is required".into(),
            ));
        }
    };

    let mut metadata = parse_metadata(&headers)?;
    metadata.entry("device".to_string()).or_insert(device);

    let id = state.store.create(declared, &metadata).await?;

    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header("Tus-Resumable", TUS_VERSION)
        .header("Location", format!("{UPLOAD_BASE_PATH}/{id}"))
        .body(Body::empty())
        .expect("static response"))
}

/// Reports the current offset for resumption.
pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    authenticate(&state, &headers, query.as_deref())?;
    check_version(&headers)?;

    let (offset, declared) = state.store.status(&id).await?;

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header("Tus-Resumable", TUS_VERSION)
        .header("Upload-Offset", offset.to_string())
        .header("Cache-Control", "no-store");
    builder = match declared {
        Some(len) => builder.header("Upload-Length", len.to_string()),
        None => builder.header("Upload-Defer-Length", "1"),
    };
    Ok(builder.body(Body::empty()).expect("static response"))
}

/// Appends one chunk at the client's claimed offset.
///
/// When the write brings the upload to its declared length, the file
/// is finalized on the spot and a file offer is broadcast to every
/// connected device.
pub async fn write_chunk(
    State(state): State<AppState>,
    Path(id): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ServerError> {
    authenticate(&state, &headers, query.as_deref())?;
    check_version(&headers)?;

    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if content_type != "application/offset+octet-stream" {
        return Err(ServerError::UnsupportedMediaType);
    }

    let offset = header_i64(&headers, "Upload-Offset")?
        .ok_or_else(|| ServerError::BadRequest("missing Upload-Offset".into()))?;
    if offset < 0 {
        return Err(ServerError::BadRequest("negative Upload-Offset".into()));
    }

    // A deferred length may be declared on any PATCH.
    if let Some(len) = header_i64(&headers, "Upload-Length")? {
        if state.store.status(&id).await?.1.is_none() {
            state.store.declare_length(&id, len).await?;
        }
    }

    let stream = body.into_data_stream().map_err(std::io::Error::other);
    let mut reader = StreamReader::new(stream);
    let new_offset = state
        .store
        .write_chunk_checked(&id, offset, &mut reader)
        .await?;

    if state.store.is_complete(&id).await? {
        let meta = state.store.finalize(&id).await?;
        info!(file_id = %meta.id, name = %meta.name, "upload finalized, offering to devices");
        state
            .hub
            .broadcast(WireMessage::FileOffer {
                offer_id: meta.id.clone(),
                from: meta.device.clone(),
                name: meta.name.clone(),
                size: meta.size,
                mime: meta.mime_type.clone(),
                sha256: meta.sha256.clone(),
                url: format!("/files/{}", meta.id),
                timestamp: now_ts(),
            })
            .await;
    }

    Ok(Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Tus-Resumable", TUS_VERSION)
        .header("Upload-Offset", new_offset.to_string())
        .body(Body::empty())
        .expect("static response"))
}

/// Aborts an upload and deletes its artifacts.
pub async fn terminate(
    State(state): State<AppState>,
    Path(id): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    authenticate(&state, &headers, query.as_deref())?;
    check_version(&headers)?;

    state.store.terminate(&id).await?;
    Ok(Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Tus-Resumable", TUS_VERSION)
        .body(Body::empty())
        .expect("static response"))
}

/// Every non-OPTIONS request must carry the protocol version.
fn check_version(headers: &HeaderMap) -> Result<(), ServerError> {
    match headers.get("Tus-Resumable").and_then(|v| v.to_str().ok()) {
        Some(TUS_VERSION) => Ok(()),
        _ => Err(ServerError::PreconditionFailed),
    }
}

fn header_i64(headers: &HeaderMap, name: &str) -> Result<Option<i64>, ServerError> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .map(Some)
            .ok_or_else(|| ServerError::BadRequest(format!("invalid {name} header"))),
    }
}

/// Parses `Upload-Metadata`: comma-separated `key base64value` pairs,
/// value optional.
fn parse_metadata(headers: &HeaderMap) -> Result<HashMap<String, String>, ServerError> {
    let mut metadata = HashMap::new();
    let Some(raw) = headers.get("Upload-Metadata").and_then(|v| v.to_str().ok()) else {
        return Ok(metadata);
    };

    for pair in raw.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let mut parts = pair.splitn(2, ' ');
        let key = parts.next().unwrap_or_default();
        if key.is_empty() {
            return Err(ServerError::BadRequest("empty Upload-Metadata key".into()));
        }
        let value = match parts.next() {
            Some(encoded) => {
                let bytes = BASE64
                    .decode(encoded.trim())
                    .map_err(|_| ServerError::BadRequest("invalid Upload-Metadata base64".into()))?;
                String::from_utf8(bytes)
                    .map_err(|_| ServerError::BadRequest("Upload-Metadata is not UTF-8".into()))?
            }
            None => String::new(),
        };
        metadata.insert(key.to_string(), value);
    }
    Ok(metadata)
}
