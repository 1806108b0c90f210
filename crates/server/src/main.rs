use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lanshare_hub::Hub;
use lanshare_server::api::{AppState, build_router};
use lanshare_server::auth::AuthService;
use lanshare_server::config::ServerConfig;
use lanshare_server::discovery::Advertiser;
use lanshare_upload::{StoreConfig, UploadStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,lanshare_server=debug")),
        )
        .init();

    info!("starting lanshare server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    info!(?config, "loaded configuration");

    let mut store_cfg = StoreConfig::new(config.upload_dir.clone());
    store_cfg.max_size = config.max_upload_size;
    let store = Arc::new(UploadStore::new(store_cfg).await?);

    let auth = Arc::new(AuthService::new(config.pairing_token.clone()));
    info!(
        pairing_token = %auth.pairing_token(),
        "pair new devices with this token"
    );

    let cancel = CancellationToken::new();

    let (hub, runner) = Hub::new(config.device_name.clone());
    tokio::spawn(runner.run(cancel.clone()));

    if config.mdns_enabled {
        let advertiser = Advertiser::new(config.device_name.clone(), config.http_addr.port());
        let mdns_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = advertiser.run(mdns_cancel).await {
                warn!("mDNS advertisement failed: {e}");
            }
        });
    }

    let state = AppState {
        store,
        hub,
        auth,
        config: Arc::new(config.clone()),
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    info!(addr = %config.http_addr, "listening");

    let shutdown_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
            shutdown_cancel.cancel();
        })
        .await?;

    cancel.cancel();
    info!("server stopped");
    Ok(())
}
