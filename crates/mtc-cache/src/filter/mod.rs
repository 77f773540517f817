//! Event filter engine: decides which data items are backed up in full

mod document;
mod trigger;

pub use document::{EventRule, ResponseRule, TriggerDocument, TriggerRule};
pub use trigger::{normalize, TriggerFilter};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use mtc_core::{ComponentDefinition, DataItemDefinition, DeviceId, ParentType, ProtocolVersion};
use tracing::{debug, info};

use crate::error::FilterError;

const BUILTIN_PRE_V12: &str = include_str!("defaults/pre_v12.yaml");
const BUILTIN_V12: &str = include_str!("defaults/v12.yaml");
const BUILTIN_V13: &str = include_str!("defaults/v13.yaml");

/// Trigger rules per protocol version bucket
#[derive(Debug, Clone, Default)]
pub struct EventFilterEngine {
    rules: BTreeMap<ProtocolVersion, Vec<TriggerFilter>>,
}

impl EventFilterEngine {
    /// Build from rule documents. Documents for the same bucket are merged.
    pub fn new(documents: impl IntoIterator<Item = TriggerDocument>) -> Result<Self, FilterError> {
        let mut rules: BTreeMap<ProtocolVersion, Vec<TriggerFilter>> = BTreeMap::new();
        for doc in documents {
            let filters = doc.filters()?;
            rules.entry(doc.version).or_default().extend(filters);
        }
        Ok(Self { rules })
    }

    /// The rules compiled into the binary, one document per bucket
    pub fn builtin() -> Result<Self, FilterError> {
        Self::new([
            TriggerDocument::from_yaml(BUILTIN_PRE_V12)?,
            TriggerDocument::from_yaml(BUILTIN_V12)?,
            TriggerDocument::from_yaml(BUILTIN_V13)?,
        ])
    }

    /// Load every `*.yaml` / `*.yml` document in `dir`. Buckets without a
    /// document there keep their built-in rules.
    pub fn load_dir(dir: &Path) -> Result<Self, FilterError> {
        let mut engine = Self::builtin()?;
        let mut loaded: BTreeMap<ProtocolVersion, Vec<TriggerFilter>> = BTreeMap::new();

        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e == "yaml" || e == "yml")
            })
            .collect();
        paths.sort();

        for path in paths {
            let text = std::fs::read_to_string(&path)?;
            let doc = TriggerDocument::from_yaml(&text).map_err(|e| {
                FilterError::InvalidDocument(format!("{}: {}", path.display(), e))
            })?;
            info!(path = %path.display(), version = %doc.version, "Loaded trigger rules");
            loaded.entry(doc.version).or_default().extend(doc.filters()?);
        }

        engine.rules.extend(loaded);
        Ok(engine)
    }

    /// Rules for a bucket: its own, else the nearest older bucket, else the
    /// nearest newer one
    pub fn rules_for(&self, version: ProtocolVersion) -> &[TriggerFilter] {
        if let Some(rules) = self.rules.get(&version) {
            return rules;
        }
        let older = self.rules.range(..version).next_back();
        let newer = self.rules.range(version..).next();
        older
            .or(newer)
            .map(|(_, rules)| rules.as_slice())
            .unwrap_or(&[])
    }

    /// Ids of the data items of `device_id` matched by any rule of the
    /// version bucket. Pure: the same inputs always give the same set.
    pub fn select_durable_ids(
        &self,
        device_id: &DeviceId,
        version: ProtocolVersion,
        data_items: &[DataItemDefinition],
        components: &[ComponentDefinition],
    ) -> BTreeSet<String> {
        let rules = self.rules_for(version);
        let components: HashMap<&str, &ComponentDefinition> = components
            .iter()
            .filter(|c| &c.device_id == device_id)
            .map(|c| (c.id.as_str(), c))
            .collect();

        let selected: BTreeSet<String> = data_items
            .iter()
            .filter(|item| &item.device_id == device_id)
            .filter(|item| {
                let path = ancestry(item, &components);
                rules.iter().any(|rule| rule.matches(item, &path))
            })
            .map(|item| item.id.clone())
            .collect();

        debug!(
            %device_id,
            %version,
            rules = rules.len(),
            selected = selected.len(),
            "Selected durable data items"
        );
        selected
    }
}

/// Normalized component types from the device down to the item's parent
fn ancestry(item: &DataItemDefinition, components: &HashMap<&str, &ComponentDefinition>) -> Vec<String> {
    let mut path = Vec::new();
    let mut parent_type = item.parent_type;
    let mut parent_id = item.parent_id.as_str();

    // Bounded walk; a malformed document could contain a parent cycle
    for _ in 0..=components.len() {
        match parent_type {
            ParentType::Device => {
                path.push(normalize("Device"));
                break;
            }
            ParentType::Component => match components.get(parent_id) {
                Some(component) => {
                    path.push(normalize(&component.type_name));
                    parent_type = component.parent_type;
                    parent_id = component.parent_id.as_str();
                }
                None => break,
            },
        }
    }

    path.reverse();
    path
}
