//! Devices found by a network scan

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::DeviceId;

/// An MTConnect device answering on the network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// Address the agent answered on
    pub address: IpAddr,
    /// Agent HTTP port
    pub port: u16,
    /// MAC address of the host, upper-case hex without separators
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    /// Device name as reported by the agent's probe document
    pub device_name: String,
    /// When the probe succeeded
    pub discovered_at: DateTime<Utc>,
}

impl DiscoveredDevice {
    pub fn device_id(&self) -> DeviceId {
        DeviceId::derive(&self.device_name, self.port, self.mac_address.as_deref())
    }
}
