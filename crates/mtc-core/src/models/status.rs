//! Connection and availability snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::DeviceId;

/// Reachability of an agent and availability of its device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub device_id: DeviceId,
    /// The agent answered the last request
    pub connected: bool,
    /// The device's AVAILABILITY data item reads `AVAILABLE`
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_instance_id: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl Status {
    pub fn disconnected(device_id: DeviceId) -> Self {
        Self {
            device_id,
            connected: false,
            available: false,
            agent_instance_id: None,
            timestamp: Utc::now(),
        }
    }
}
