//! Network access used by the device finder

use std::io;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;

use crate::{arp, ping, port, probe};

/// The network operations a scan performs.
///
/// [`SystemNetwork`] talks to the real network; tests substitute a fake.
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    /// Ping an address. `Err` means pinging is not possible here.
    async fn ping(&self, address: IpAddr, timeout: Duration) -> io::Result<bool>;

    /// Whether a TCP connect succeeds
    async fn port_open(&self, address: IpAddr, port: u16, timeout: Duration) -> bool;

    /// Device names served by an MTConnect agent on the endpoint
    async fn probe(&self, address: IpAddr, port: u16, timeout: Duration) -> Option<Vec<String>>;

    /// MAC address of the host, if it can be resolved
    async fn mac_address(&self, address: IpAddr) -> Option<String>;
}

/// Real network access
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemNetwork;

#[async_trait]
impl NetworkProbe for SystemNetwork {
    async fn ping(&self, address: IpAddr, timeout: Duration) -> io::Result<bool> {
        tokio::task::spawn_blocking(move || ping::icmp_echo(address, timeout))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    }

    async fn port_open(&self, address: IpAddr, port: u16, timeout: Duration) -> bool {
        port::port_open(address, port, timeout).await
    }

    async fn probe(&self, address: IpAddr, port: u16, timeout: Duration) -> Option<Vec<String>> {
        probe::probe_device_names(address, port, timeout).await
    }

    async fn mac_address(&self, address: IpAddr) -> Option<String> {
        arp::lookup_mac(address).await
    }
}
