//! HTTP surface: router assembly and the JSON management API.

use std::sync::Arc;

use axum::extract::{Path, RawQuery, Request, State};
use axum::http::{HeaderMap, Method};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use lanshare_hub::Hub;
use lanshare_protocol::constants::UPLOAD_BASE_PATH;
use lanshare_upload::UploadStore;

use crate::auth::{AuthService, token_from_request};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::{download, tus, ws};

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<UploadStore>,
    pub hub: Hub,
    pub auth: Arc<AuthService>,
    pub config: Arc<ServerConfig>,
}

/// Resolves the request's bearer token (header or query) to the
/// device it was issued to.
pub fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    query: Option<&str>,
) -> Result<String, ServerError> {
    let token = token_from_request(headers, query).ok_or(ServerError::Unauthorized)?;
    state.auth.validate(&token).ok_or(ServerError::Unauthorized)
}

/// Builds the full router: uploads, downloads, the persistent
/// connection endpoint and the management API.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/pair", post(pair))
        .route("/api/pairing-token", get(pairing_token))
        .route("/api/devices", get(devices))
        .route("/api/files", get(files))
        .route("/api/files/:id", delete(delete_file))
        .route("/api/config", get(server_config))
        .route("/tus/files", post(tus::create))
        // `get` also answers HEAD, which is the verb tus clients use.
        .route(
            "/tus/files/:id",
            get(tus::status)
                .patch(tus::write_chunk)
                .delete(tus::terminate),
        )
        .route("/files/:id", get(download::serve_file))
        .route("/files/:id/sha256", get(download::file_sha256))
        .route("/ws", get(ws::upgrade))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        // Outermost, so the CORS preflight short-circuit never sees
        // an upload OPTIONS request.
        .layer(middleware::from_fn_with_state(
            state.clone(),
            upload_capabilities,
        ))
        .with_state(state)
}

/// Capability discovery for the upload endpoints. The CORS layer
/// answers every OPTIONS request itself, so these are intercepted
/// before it runs.
async fn upload_capabilities(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS && req.uri().path().starts_with(UPLOAD_BASE_PATH) {
        return tus::capabilities(state.config.max_upload_size);
    }
    next.run(req).await
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    connected_devices: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        connected_devices: state.hub.client_count(),
    })
}

#[derive(Deserialize)]
struct PairRequest {
    token: String,
    #[serde(default)]
    device: String,
}

#[derive(Serialize)]
struct PairResponse {
    token: String,
    server: String,
}

/// Exchanges the pairing secret for a session token.
async fn pair(
    State(state): State<AppState>,
    Json(req): Json<PairRequest>,
) -> Result<Json<PairResponse>, ServerError> {
    let device = if req.device.is_empty() {
        "unknown".to_string()
    } else {
        req.device
    };
    let token = state
        .auth
        .pair(&req.token, &device)
        .ok_or(ServerError::Unauthorized)?;
    Ok(Json(PairResponse {
        token,
        server: state.config.device_name.clone(),
    }))
}

/// Exposes the pairing secret to an already-paired device, so it can
/// show a QR code or similar for onboarding the next one.
async fn pairing_token(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ServerError> {
    authenticate(&state, &headers, query.as_deref())?;
    Ok(Json(
        serde_json::json!({ "token": state.auth.pairing_token() }),
    ))
}

/// Removes a finalized file and its sidecar.
async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ServerError> {
    authenticate(&state, &headers, query.as_deref())?;
    // 404 for identifiers that never finalized.
    state.store.load_meta(&id).await?;
    state.store.delete_file(&id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct DeviceEntry {
    id: String,
    device: String,
}

/// Lists devices currently connected to the hub.
async fn devices(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ServerError> {
    authenticate(&state, &headers, query.as_deref())?;
    let devices: Vec<DeviceEntry> = state
        .hub
        .devices()
        .into_iter()
        .map(|(id, device)| DeviceEntry { id, device })
        .collect();
    Ok(Json(devices))
}

/// Lists finalized files with their sidecar metadata.
async fn files(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ServerError> {
    authenticate(&state, &headers, query.as_deref())?;
    let files = state.store.list_files().await?;
    Ok(Json(files))
}

#[derive(Serialize)]
struct ConfigResponse {
    device_name: String,
    max_upload_size: i64,
    version: &'static str,
}

async fn server_config(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ServerError> {
    authenticate(&state, &headers, query.as_deref())?;
    Ok(Json(ConfigResponse {
        device_name: state.config.device_name.clone(),
        max_upload_size: state.config.max_upload_size,
        version: env!("CARGO_PKG_VERSION"),
    }))
}
