//! Events flowing from device connections into the telemetry cache

use serde::{Deserialize, Serialize};

use crate::id::DeviceId;
use crate::models::{
    Agent, AssetDefinition, ComponentDefinition, DataItemDefinition, DeviceDefinition, Sample,
    Status,
};

/// A unit of telemetry produced by a device connection.
///
/// A connection always sends the structural variants of one probe in the
/// order `Agent`, `Device`, `Components`, `DataItems`, before any sample
/// that refers to them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    Agent(Agent),
    Device(DeviceDefinition),
    /// Complete component list of one agent instance
    Components {
        device_id: DeviceId,
        agent_instance_id: u64,
        components: Vec<ComponentDefinition>,
    },
    /// Complete data item list of one agent instance
    DataItems {
        device_id: DeviceId,
        agent_instance_id: u64,
        data_items: Vec<DataItemDefinition>,
    },
    Samples(Vec<Sample>),
    Assets(Vec<AssetDefinition>),
    Status(Status),
}

impl TelemetryEvent {
    pub fn device_id(&self) -> Option<&DeviceId> {
        match self {
            Self::Agent(agent) => Some(&agent.device_id),
            Self::Device(device) => Some(&device.device_id),
            Self::Components { device_id, .. } | Self::DataItems { device_id, .. } => {
                Some(device_id)
            }
            Self::Samples(samples) => samples.first().map(|s| &s.device_id),
            Self::Assets(assets) => assets.first().map(|a| &a.device_id),
            Self::Status(status) => Some(&status.device_id),
        }
    }
}
