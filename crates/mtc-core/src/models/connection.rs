//! Connection configuration for a single agent

use serde::{Deserialize, Serialize};

use crate::id::DeviceId;
use crate::models::DiscoveredDevice;

/// Default MTConnect agent port
pub const DEFAULT_AGENT_PORT: u16 = 5000;

/// Default interval between `current` polls
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// How to reach one MTConnect device.
///
/// The identity fields (device id, address, port, physical address and
/// device name) are fixed at construction and have no setters. Only the
/// `enabled` flag and the poll interval can change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    device_id: DeviceId,
    address: String,
    port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    physical_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_name: Option<String>,
    /// Disabled connections are kept but never activated
    pub enabled: bool,
    /// Interval between `current` polls in milliseconds
    pub interval_ms: u64,
}

impl Connection {
    /// Create a connection, deriving its device id.
    ///
    /// A leading `http://` and trailing `/` on the address are dropped.
    pub fn new(
        address: impl AsRef<str>,
        port: u16,
        device_name: Option<String>,
        physical_address: Option<String>,
    ) -> Self {
        let address = address
            .as_ref()
            .trim()
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string();
        let device_id = DeviceId::derive(
            device_name.as_deref().unwrap_or(""),
            port,
            physical_address.as_deref(),
        );

        Self {
            device_id,
            address,
            port,
            physical_address,
            device_name,
            enabled: true,
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }

    /// Build the connection for a device found by a network scan
    pub fn from_discovered(device: &DiscoveredDevice) -> Self {
        Self::new(
            device.address.to_string(),
            device.port,
            Some(device.device_name.clone()),
            device.mac_address.clone(),
        )
    }

    pub fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn physical_address(&self) -> Option<&str> {
        self.physical_address.as_deref()
    }

    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }

    /// Base URL of the agent, e.g. `http://10.0.0.5:5000`
    pub fn agent_url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }
}
