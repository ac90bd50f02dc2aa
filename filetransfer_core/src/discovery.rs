//! mDNS advertisement (receiver) and browse (sender).

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::TransferConfig;
use crate::error::{Result, TransferError};

/// How long to wait for the goodbye packets when unregistering.
const UNREGISTER_WAIT: Duration = Duration::from_secs(1);

/// Address of a discovered receiver. Used for exactly one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddress {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((self.ip, self.port))
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Instance name advertised for this host: the first label of the hostname.
pub fn local_instance_name() -> Result<String> {
    let host = hostname::get()
        .map_err(|e| TransferError::Discovery(format!("hostname lookup failed: {}", e)))?
        .to_string_lossy()
        .into_owned();
    let name = host.split('.').next().unwrap_or_default().to_string();
    if name.is_empty() {
        return Err(TransferError::Discovery("hostname is empty".to_string()));
    }
    Ok(name)
}

/// A registered service record. Unregisters on `shutdown`, or on drop if
/// `shutdown` never ran.
pub struct Advertisement {
    daemon: ServiceDaemon,
    fullname: String,
    released: bool,
}

impl Advertisement {
    pub fn register(config: &TransferConfig, instance: &str, port: u16) -> Result<Self> {
        let daemon = ServiceDaemon::new()?;
        let host_name = format!("{}.{}.", instance, config.domain.trim_matches('.'));

        let info = ServiceInfo::new(
            &config.service_domain(),
            instance,
            &host_name,
            "",
            port,
            None::<HashMap<String, String>>,
        )?
        .enable_addr_auto();
        let fullname = info.get_fullname().to_string();

        daemon.register(info)?;
        tracing::info!("Advertising {} on port {}", fullname, port);

        Ok(Self {
            daemon,
            fullname,
            released: false,
        })
    }

    pub fn fullname(&self) -> &str {
        &self.fullname
    }

    /// Unregister the record and stop the mDNS daemon. Blocks briefly while
    /// the goodbye packets go out.
    pub fn shutdown(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let status = self.daemon.unregister(&self.fullname)?;
        match status.recv_timeout(UNREGISTER_WAIT) {
            Ok(status) => tracing::debug!("Unregistered {}: {:?}", self.fullname, status),
            Err(e) => tracing::warn!("No unregister status for {}: {}", self.fullname, e),
        }
        self.daemon.shutdown()?;
        tracing::info!("Stopped advertising {}", self.fullname);
        Ok(())
    }
}

impl Drop for Advertisement {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!("Failed to unregister {}: {}", self.fullname, e);
        }
    }
}

/// Keep `advertisement` registered until `stop` fires (or its sender is
/// dropped), then unregister it.
pub async fn advertise(advertisement: Advertisement, stop: oneshot::Receiver<()>) -> Result<()> {
    let _ = stop.await;
    tokio::task::spawn_blocking(move || advertisement.shutdown())
        .await
        .map_err(|e| TransferError::Discovery(format!("advertisement task failed: {}", e)))?
}

/// Register this host under the configured service type and keep it
/// registered in a background task until `stop` fires. Registration errors
/// are returned here, before any task is spawned.
pub fn start_advertising(
    config: &TransferConfig,
    port: u16,
    stop: oneshot::Receiver<()>,
) -> Result<JoinHandle<Result<()>>> {
    let instance = local_instance_name()?;
    let advertisement = Advertisement::register(config, &instance, port)?;
    Ok(tokio::spawn(advertise(advertisement, stop)))
}

/// Browse for the configured service type and return the first receiver that
/// resolves with an IPv4 address.
///
/// When several receivers advertise at once, whichever resolves first wins;
/// the choice is not deterministic.
pub async fn browse(config: &TransferConfig) -> Result<PeerAddress> {
    browse_for(&config.service_domain(), config.browse_timeout()).await
}

pub async fn browse_for(service_domain: &str, timeout: Duration) -> Result<PeerAddress> {
    let daemon = ServiceDaemon::new()?;
    let events = match daemon.browse(service_domain) {
        Ok(events) => events,
        Err(e) => {
            if let Err(shutdown_err) = daemon.shutdown() {
                tracing::debug!("mDNS daemon shutdown failed: {}", shutdown_err);
            }
            return Err(e.into());
        }
    };
    tracing::debug!("Browsing for {} ({:?})", service_domain, timeout);

    let found = tokio::task::spawn_blocking(move || {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match events.recv_timeout(remaining) {
                Ok(ServiceEvent::ServiceResolved(info)) => {
                    match first_ipv4(info.get_addresses().iter()) {
                        Some(ip) => return Ok(Some(PeerAddress::new(ip, info.get_port()))),
                        None => tracing::debug!(
                            "Skipping {}: no IPv4 address",
                            info.get_fullname()
                        ),
                    }
                }
                Ok(other) => tracing::trace!("mDNS event: {:?}", other),
                Err(flume::RecvTimeoutError::Timeout) => return Ok(None),
                Err(flume::RecvTimeoutError::Disconnected) => {
                    return Err(TransferError::Discovery(
                        "mDNS daemon stopped while browsing".to_string(),
                    ));
                }
            }
        }
    })
    .await
    .map_err(|e| TransferError::Discovery(format!("browse task failed: {}", e)))?;

    if let Err(e) = daemon.stop_browse(service_domain) {
        tracing::debug!("stop_browse failed: {}", e);
    }
    if let Err(e) = daemon.shutdown() {
        tracing::debug!("mDNS daemon shutdown failed: {}", e);
    }

    match found? {
        Some(peer) => {
            tracing::info!("Receiver found at {}", peer);
            Ok(peer)
        }
        None => Err(TransferError::PeerNotFound(timeout)),
    }
}

/// First IPv4 address, preferring non-loopback ones.
fn first_ipv4<'a>(addrs: impl Iterator<Item = &'a IpAddr>) -> Option<Ipv4Addr> {
    let mut loopback = None;
    for addr in addrs {
        if let IpAddr::V4(v4) = addr {
            if !v4.is_loopback() {
                return Some(*v4);
            }
            loopback.get_or_insert(*v4);
        }
    }
    loopback
}
