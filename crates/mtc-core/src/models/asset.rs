//! Assets (tools, programs, ...) published by an agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::DeviceId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDefinition {
    pub device_id: DeviceId,
    pub asset_id: String,
    /// Element name, e.g. `CuttingTool`
    pub asset_type: String,
    pub timestamp: DateTime<Utc>,
    /// Raw asset XML as returned by the agent
    pub xml: String,
}
