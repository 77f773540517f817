//! Trigger rule documents (YAML)

use mtc_core::{Category, ProtocolVersion};
use serde::{Deserialize, Serialize};

use super::trigger::{normalize, TriggerFilter};
use crate::error::FilterError;

/// Event rules for one protocol version bucket.
///
/// ```yaml
/// version: v13_plus
/// events:
///   - name: Status
///     responses:
///       - value: Active
///         triggers:
///           - filter: Controller/Path/EXECUTION
///           - multi:
///               - filter: AVAILABILITY
///               - type: EMERGENCY_STOP
///                 component: Controller
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerDocument {
    pub version: ProtocolVersion,
    #[serde(default)]
    pub events: Vec<EventRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRule {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub responses: Vec<ResponseRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRule {
    /// Event value reported when the response fires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub triggers: Vec<TriggerRule>,
}

/// A single trigger or, with `multi`, a group of triggers.
///
/// The structured fields narrow whatever `filter` selects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    /// Type of the direct parent component
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    /// Value the trigger compares against; not used for durability
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub multi: Vec<TriggerRule>,
}

impl TriggerDocument {
    pub fn from_yaml(yaml: &str) -> Result<Self, FilterError> {
        serde_yaml::from_str(yaml).map_err(|e| FilterError::InvalidDocument(e.to_string()))
    }

    /// Every trigger of every event, with multi-triggers flattened
    pub fn filters(&self) -> Result<Vec<TriggerFilter>, FilterError> {
        let mut out = Vec::new();
        for event in &self.events {
            for response in &event.responses {
                for trigger in &response.triggers {
                    trigger.compile(&mut out).map_err(|e| {
                        FilterError::InvalidTrigger(format!("event '{}': {}", event.name, e))
                    })?;
                }
            }
        }
        Ok(out)
    }
}

impl TriggerRule {
    fn has_criteria(&self) -> bool {
        self.filter.is_some()
            || self.type_name.is_some()
            || self.sub_type.is_some()
            || self.category.is_some()
            || self.component.is_some()
    }

    fn compile(&self, out: &mut Vec<TriggerFilter>) -> Result<(), FilterError> {
        if !self.has_criteria() && self.multi.is_empty() {
            return Err(FilterError::InvalidTrigger(
                "trigger has no filter and no nested triggers".into(),
            ));
        }

        if self.has_criteria() {
            let mut filter = match &self.filter {
                Some(expr) => TriggerFilter::parse(expr)?,
                None => TriggerFilter::default(),
            };
            if let Some(type_name) = &self.type_name {
                filter.type_name = Some(normalize(type_name));
            }
            if let Some(sub_type) = &self.sub_type {
                filter.sub_type = Some(normalize(sub_type));
            }
            if self.category.is_some() {
                filter.category = self.category;
            }
            if let Some(component) = &self.component {
                let component = normalize(component);
                if filter.component_path.last() != Some(&component) {
                    filter.component_path.push(component);
                }
            }
            out.push(filter);
        }

        for nested in &self.multi {
            nested.compile(out)?;
        }
        Ok(())
    }
}
