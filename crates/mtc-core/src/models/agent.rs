//! Agent header information

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::DeviceId;

/// The remote agent serving a device.
///
/// `instance_id` is assigned by the agent and changes every time the agent
/// process restarts. A new value invalidates cached definitions and sequence
/// numbers for the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub device_id: DeviceId,
    pub instance_id: u64,
    pub sender: String,
    /// MTConnect protocol version, e.g. "1.3.0.17"
    pub version: String,
    pub buffer_size: u64,
    #[serde(default)]
    pub test_indicator: bool,
    /// Agent creation time from the document header
    pub timestamp: DateTime<Utc>,
}

impl Agent {
    pub fn protocol_version(&self) -> ProtocolVersion {
        ProtocolVersion::from_version_str(&self.version)
    }
}

/// Protocol version bucket used to select trigger rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolVersion {
    /// Anything older than 1.2
    PreV12,
    /// 1.2.x
    V12,
    /// 1.3 and newer
    V13Plus,
}

impl ProtocolVersion {
    pub const ALL: [ProtocolVersion; 3] = [Self::PreV12, Self::V12, Self::V13Plus];

    /// Bucket a dotted version string.
    ///
    /// Strings that do not start with `major.minor` land in the newest bucket.
    pub fn from_version_str(version: &str) -> Self {
        let mut parts = version.trim().split('.');
        let major = parts.next().and_then(|p| p.parse::<u32>().ok());
        let minor = parts.next().and_then(|p| p.parse::<u32>().ok());

        match (major, minor) {
            (Some(major), Some(minor)) => match (major, minor) {
                (0, _) | (1, 0) | (1, 1) => Self::PreV12,
                (1, 2) => Self::V12,
                _ => Self::V13Plus,
            },
            (Some(0), None) => Self::PreV12,
            _ => Self::V13Plus,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreV12 => write!(f, "pre-1.2"),
            Self::V12 => write!(f, "1.2"),
            Self::V13Plus => write!(f, "1.3+"),
        }
    }
}
