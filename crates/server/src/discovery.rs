//! mDNS/DNS-SD advertisement so devices find the server by browsing
//! for the service type instead of typing an address.

use std::net::IpAddr;

use mdns_sd::{ServiceDaemon, ServiceInfo};
use tokio_util::sync::CancellationToken;

use lanshare_protocol::constants::MDNS_SERVICE;

use crate::error::ServerError;

/// Advertises this server on the local network.
pub struct Advertiser {
    device_name: String,
    port: u16,
    daemon: Option<ServiceDaemon>,
}

impl Advertiser {
    pub fn new(device_name: String, port: u16) -> Self {
        Self {
            device_name,
            port,
            daemon: None,
        }
    }

    /// Begins advertising. Safe to call again: the previous
    /// registration is dropped first.
    pub fn start(&mut self) -> Result<(), ServerError> {
        self.stop();

        let daemon = ServiceDaemon::new()
            .map_err(|e| ServerError::Internal(format!("mDNS daemon failed: {e}")))?;

        let ips = local_ips();
        if ips.is_empty() {
            return Err(ServerError::Internal("no usable network interfaces".into()));
        }

        let service_type = format!("{MDNS_SERVICE}.local.");
        let properties = [
            ("name", self.device_name.as_str()),
            ("version", env!("CARGO_PKG_VERSION")),
        ];
        let service = ServiceInfo::new(
            &service_type,
            &self.device_name,
            &local_hostname(),
            &ips[..],
            self.port,
            &properties[..],
        )
        .map_err(|e| ServerError::Internal(format!("mDNS service info failed: {e}")))?;

        daemon
            .register(service)
            .map_err(|e| ServerError::Internal(format!("mDNS register failed: {e}")))?;

        tracing::info!(service = %service_type, port = self.port, "advertising on the local network");
        self.daemon = Some(daemon);
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(daemon) = self.daemon.take() {
            let full_name = format!("{}.{MDNS_SERVICE}.local.", self.device_name);
            let _ = daemon.unregister(&full_name);
            let _ = daemon.shutdown();
        }
    }

    /// Advertises until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), ServerError> {
        self.start()?;
        cancel.cancelled().await;
        self.stop();
        Ok(())
    }
}

impl Drop for Advertiser {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Non-loopback, non-link-local IPv4 addresses.
fn local_ips() -> Vec<IpAddr> {
    let mut ips = Vec::new();
    let Ok(interfaces) = if_addrs::get_if_addrs() else {
        return ips;
    };

    for iface in interfaces {
        if iface.is_loopback() {
            continue;
        }
        if let IpAddr::V4(ipv4) = iface.ip() {
            let octets = ipv4.octets();
            if octets[0] == 127 || (octets[0] == 169 && octets[1] == 254) {
                continue;
            }
            ips.push(IpAddr::V4(ipv4));
        }
    }
    ips
}

/// Local hostname with the `.local.` suffix mDNS expects.
fn local_hostname() -> String {
    let mut name = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "lanshare".into());

    if !name.ends_with(".local.") {
        name = name.trim_end_matches('.').to_string();
        name.push_str(".local.");
    }
    name
}
