//! Server configuration loaded from environment variables.
//!
//! Every setting has a default so the server starts with zero
//! configuration on a development machine.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address the HTTP listener binds to.
    /// Env: `LANSHARE_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Directory for temp files, finalized files and sidecars.
    /// Env: `LANSHARE_UPLOAD_DIR`
    /// Default: `./uploads`
    pub upload_dir: PathBuf,

    /// Display name this server announces in welcome messages and
    /// over mDNS.
    /// Env: `LANSHARE_DEVICE_NAME`
    /// Default: the machine hostname.
    pub device_name: String,

    /// Fixed pairing secret. When unset a random one is generated at
    /// startup and logged.
    /// Env: `LANSHARE_PAIRING_TOKEN`
    pub pairing_token: Option<String>,

    /// Maximum accepted upload size in bytes.
    /// Env: `LANSHARE_MAX_UPLOAD`
    /// Default: 10 GiB.
    pub max_upload_size: i64,

    /// Whether to advertise the server via mDNS.
    /// Env: `LANSHARE_MDNS` (true/false)
    /// Default: `true`
    pub mdns_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            upload_dir: PathBuf::from("./uploads"),
            device_name: local_hostname(),
            pairing_token: None,
            max_upload_size: 10 * 1024 * 1024 * 1024,
            mdns_enabled: true,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables, falling back
    /// to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("LANSHARE_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => {
                    tracing::warn!(value = %addr, "invalid LANSHARE_ADDR, using default");
                }
            }
        }

        if let Ok(dir) = std::env::var("LANSHARE_UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(dir);
        }

        if let Ok(name) = std::env::var("LANSHARE_DEVICE_NAME") {
            if !name.is_empty() {
                config.device_name = name;
            }
        }

        if let Ok(token) = std::env::var("LANSHARE_PAIRING_TOKEN") {
            if !token.is_empty() {
                config.pairing_token = Some(token);
            }
        }

        if let Ok(val) = std::env::var("LANSHARE_MAX_UPLOAD") {
            match val.parse::<i64>() {
                Ok(n) if n > 0 => config.max_upload_size = n,
                _ => {
                    tracing::warn!(value = %val, "invalid LANSHARE_MAX_UPLOAD, using default");
                }
            }
        }

        if let Ok(val) = std::env::var("LANSHARE_MDNS") {
            config.mdns_enabled = val != "false" && val != "0";
        }

        // RUST_LOG is handled by tracing-subscriber's EnvFilter.

        config
    }
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "lanshare".into())
}
