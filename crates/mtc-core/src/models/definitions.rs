//! Structural description of a machine: device, components and data items

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::id::DeviceId;
use crate::models::Agent;

/// The top-level `Device` element of a probe document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDefinition {
    pub device_id: DeviceId,
    pub agent_instance_id: u64,
    /// Element id inside the agent document
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub station: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso841_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_interval: Option<f64>,
}

/// Kind of element a component or data item hangs off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParentType {
    Device,
    Component,
}

/// A component (axes, controller, path, ...) somewhere below the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDefinition {
    pub device_id: DeviceId,
    pub agent_instance_id: u64,
    pub id: String,
    /// Element name, e.g. `Controller`, `Path`, `Linear`
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_name: Option<String>,
    pub parent_id: String,
    pub parent_type: ParentType,
}

/// Data item category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Sample,
    Event,
    Condition,
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SAMPLE" => Ok(Self::Sample),
            "EVENT" => Ok(Self::Event),
            "CONDITION" => Ok(Self::Condition),
            other => Err(format!("unknown category '{}'", other)),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sample => write!(f, "SAMPLE"),
            Self::Event => write!(f, "EVENT"),
            Self::Condition => write!(f, "CONDITION"),
        }
    }
}

/// A single telemetry channel exposed by the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataItemDefinition {
    pub device_id: DeviceId,
    pub agent_instance_id: u64,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub category: Category,
    /// MTConnect type, e.g. `EXECUTION`, `SPINDLE_SPEED`
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_units: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub representation: Option<String>,
    pub parent_id: String,
    pub parent_type: ParentType,
}

/// Everything the cache knows about a device's structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceModel {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<Agent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceDefinition>,
    pub components: Vec<ComponentDefinition>,
    pub data_items: Vec<DataItemDefinition>,
}
