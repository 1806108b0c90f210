use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use lanshare_hub::Hub;
use lanshare_server::api::{AppState, build_router};
use lanshare_server::auth::AuthService;
use lanshare_server::config::ServerConfig;
use lanshare_upload::{StoreConfig, UploadStore};

pub const PAIRING_SECRET: &str = "test-pairing-secret";

pub struct TestServer {
    pub router: Router,
    pub cancel: CancellationToken,
    _upload_dir: TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub async fn test_server() -> TestServer {
    let upload_dir = TempDir::new().unwrap();

    let config = ServerConfig {
        upload_dir: upload_dir.path().to_path_buf(),
        device_name: "test-server".into(),
        pairing_token: Some(PAIRING_SECRET.into()),
        mdns_enabled: false,
        ..ServerConfig::default()
    };

    let store = Arc::new(
        UploadStore::new(StoreConfig::new(config.upload_dir.clone()))
            .await
            .unwrap(),
    );
    let auth = Arc::new(AuthService::new(config.pairing_token.clone()));

    let cancel = CancellationToken::new();
    let (hub, runner) = Hub::new(config.device_name.clone());
    tokio::spawn(runner.run(cancel.clone()));

    let state = AppState {
        store,
        hub,
        auth,
        config: Arc::new(config),
    };
    TestServer {
        router: build_router(state),
        cancel,
        _upload_dir: upload_dir,
    }
}

pub async fn send(router: &Router, req: Request<Body>) -> Response<axum::body::Body> {
    router.clone().oneshot(req).await.unwrap()
}

pub async fn body_bytes(resp: Response<axum::body::Body>) -> Vec<u8> {
    axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

/// Pairs a device and returns its session token.
pub async fn pair(router: &Router, device: &str) -> String {
    let req = Request::builder()
        .method("POST")
        .uri("/api/pair")
        .header("content-type", "application/json")
        .body(Body::from(format!(
            r#"{{"token":"{PAIRING_SECRET}","device":"{device}"}}"#
        )))
        .unwrap();
    let resp = send(router, req).await;
    assert_eq!(resp.status(), 200, "pairing failed");

    let body: serde_json::Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    body["token"].as_str().unwrap().to_string()
}
