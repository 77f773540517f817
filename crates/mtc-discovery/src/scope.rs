//! Per-interface scan configuration

use std::net::{IpAddr, Ipv4Addr};

use if_addrs::{get_if_addrs, IfAddr};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DiscoveryError;
use crate::range::{AddressRange, PortRange};

/// Largest subnet scanned when addresses default to the interface network
pub const MAX_DEFAULT_HOSTS: u32 = 1024;

fn default_timeout_ms() -> u64 {
    500
}

fn default_ping_delay_ms() -> u64 {
    25
}

fn default_ping_enabled() -> bool {
    true
}

fn default_max_concurrent_probes() -> usize {
    64
}

/// What to scan on one network interface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkInterfaceScope {
    /// Interface name (e.g. `eth0`); the first non-loopback IPv4 interface
    /// is used when unset
    #[serde(default)]
    pub interface_id: Option<String>,
    #[serde(default)]
    pub interface_description: Option<String>,
    /// Defaults to the subnet of the interface address
    #[serde(default)]
    pub addresses: Option<AddressRange>,
    /// Defaults to ports 5000-5019
    #[serde(default)]
    pub ports: Option<PortRange>,
    /// Timeout for each ping, connect and probe
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Delay between successive pings
    #[serde(default = "default_ping_delay_ms")]
    pub ping_delay_ms: u64,
    /// Pause between scans; 0 scans once and stops
    #[serde(default)]
    pub scan_interval_ms: u64,
    /// Skip ICMP and treat every address as responsive when false
    #[serde(default = "default_ping_enabled")]
    pub ping_enabled: bool,
    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,
}

impl Default for NetworkInterfaceScope {
    fn default() -> Self {
        Self {
            interface_id: None,
            interface_description: None,
            addresses: None,
            ports: None,
            timeout_ms: default_timeout_ms(),
            ping_delay_ms: default_ping_delay_ms(),
            scan_interval_ms: 0,
            ping_enabled: default_ping_enabled(),
            max_concurrent_probes: default_max_concurrent_probes(),
        }
    }
}

/// Address and port lists for one scan cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedScope {
    pub addresses: Vec<IpAddr>,
    pub ports: Vec<u16>,
}

impl NetworkInterfaceScope {
    /// Label used in log messages
    pub fn label(&self) -> &str {
        self.interface_description
            .as_deref()
            .or(self.interface_id.as_deref())
            .unwrap_or("default interface")
    }

    /// Resolve the effective address and port lists
    pub fn resolve(&self) -> Result<ResolvedScope, DiscoveryError> {
        let ports = match &self.ports {
            Some(ports) => ports.resolve()?,
            None => PortRange::default_agent_ports().resolve()?,
        };

        let addresses = match &self.addresses {
            Some(range) => range.resolve()?,
            None => self.default_addresses()?,
        };

        Ok(ResolvedScope { addresses, ports })
    }

    fn default_addresses(&self) -> Result<Vec<IpAddr>, DiscoveryError> {
        let interfaces =
            get_if_addrs().map_err(|e| DiscoveryError::Interface(e.to_string()))?;

        let found = interfaces.into_iter().find_map(|iface| {
            let matches = match &self.interface_id {
                Some(id) => &iface.name == id,
                None => !iface.is_loopback(),
            };
            match iface.addr {
                IfAddr::V4(v4) if matches => Some((iface.name, v4.ip, v4.netmask)),
                _ => None,
            }
        });

        match found {
            Some((name, ip, netmask)) => {
                let hosts = subnet_hosts(ip, netmask);
                debug!(interface = %name, %ip, %netmask, hosts = hosts.len(), "Using interface subnet");
                Ok(hosts.into_iter().map(IpAddr::V4).collect())
            }
            None => Err(DiscoveryError::Interface(format!(
                "no IPv4 address on {}",
                self.interface_id.as_deref().unwrap_or("any interface")
            ))),
        }
    }
}

/// Host addresses of the subnet containing `ip`, without the network and
/// broadcast addresses, capped at [`MAX_DEFAULT_HOSTS`]
pub fn subnet_hosts(ip: Ipv4Addr, netmask: Ipv4Addr) -> Vec<Ipv4Addr> {
    let mask = u32::from(netmask);
    let network = u32::from(ip) & mask;
    let broadcast = network | !mask;

    if broadcast - network < 2 {
        return vec![ip];
    }

    (network + 1..broadcast)
        .take(MAX_DEFAULT_HOSTS as usize)
        .map(Ipv4Addr::from)
        .collect()
}
