//! Persistent connection endpoint.
//!
//! The credential is validated before the upgrade completes, so an
//! unauthorized client gets a plain 401 instead of a doomed socket.

use axum::extract::{RawQuery, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use tracing::debug;

use lanshare_hub::serve_connection;
use lanshare_protocol::constants::WS_MAX_FRAME_SIZE;

use crate::api::{AppState, authenticate};
use crate::error::ServerError;

pub async fn upgrade(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ServerError> {
    let device = authenticate(&state, &headers, query.as_deref())?;
    debug!(%device, "upgrading connection");

    let hub = state.hub.clone();
    Ok(ws
        .max_frame_size(WS_MAX_FRAME_SIZE)
        .max_message_size(WS_MAX_FRAME_SIZE)
        .on_upgrade(move |socket| serve_connection(socket, hub, device)))
}
