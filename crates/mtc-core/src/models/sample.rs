//! Time series samples

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::DeviceId;

/// State of a CONDITION data item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionState {
    Normal,
    Warning,
    Fault,
    Unavailable,
}

impl ConditionState {
    /// Whether this state represents a raised alarm
    pub fn is_active(self) -> bool {
        matches!(self, Self::Warning | Self::Fault)
    }
}

impl FromStr for ConditionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NORMAL" => Ok(Self::Normal),
            "WARNING" => Ok(Self::Warning),
            "FAULT" => Ok(Self::Fault),
            "UNAVAILABLE" => Ok(Self::Unavailable),
            other => Err(format!("unknown condition state '{}'", other)),
        }
    }
}

impl fmt::Display for ConditionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Normal => "NORMAL",
            Self::Warning => "WARNING",
            Self::Fault => "FAULT",
            Self::Unavailable => "UNAVAILABLE",
        };
        f.write_str(s)
    }
}

/// One observed value of a data item.
///
/// Samples are never mutated; a later sample for the same data item
/// supersedes an earlier one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub device_id: DeviceId,
    /// Data item id
    pub id: String,
    pub agent_instance_id: u64,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionState>,
}

impl Sample {
    /// Ordering key used wherever samples are sorted
    pub fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.timestamp, self.sequence)
    }
}
