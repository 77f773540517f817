//! Trigger filter expressions

use std::fmt;

use mtc_core::{Category, DataItemDefinition};

use crate::error::FilterError;

/// Selects data items by type, sub type, category and component path.
///
/// The textual form is a `/`-separated path whose last segment names the
/// data item and whose leading segments name component types:
///
/// | Expression                 | Selects                                           |
/// |----------------------------|---------------------------------------------------|
/// | `EXECUTION`                | every EXECUTION item                              |
/// | `PATH_FEEDRATE:OVERRIDE`   | PATH_FEEDRATE items with sub type OVERRIDE        |
/// | `CONDITION`                | every item of category CONDITION                  |
/// | `Controller/Path/PROGRAM`  | PROGRAM items directly below a Path inside a Controller |
/// | `Path/*`                   | every item directly below a Path                  |
///
/// Names compare case-insensitively and ignore underscores, so `Execution`,
/// `EXECUTION` and `execution` are the same. Component segments must appear
/// in order among the item's ancestors, and the last one must be the item's
/// direct parent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerFilter {
    pub component_path: Vec<String>,
    pub type_name: Option<String>,
    pub sub_type: Option<String>,
    pub category: Option<Category>,
}

impl TriggerFilter {
    pub fn parse(expr: &str) -> Result<Self, FilterError> {
        let segments: Vec<&str> = expr.trim().split('/').map(str::trim).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(FilterError::InvalidTrigger(format!(
                "empty segment in filter '{}'",
                expr
            )));
        }

        let (leaf, components) = match segments.split_last() {
            Some(split) => split,
            None => return Err(FilterError::InvalidTrigger("empty filter".into())),
        };

        let mut filter = Self {
            component_path: components.iter().map(|s| normalize(s)).collect(),
            ..Default::default()
        };

        if *leaf == "*" {
            if filter.component_path.is_empty() {
                return Err(FilterError::InvalidTrigger(
                    "'*' needs a component path".into(),
                ));
            }
        } else if let Ok(category) = leaf.parse::<Category>() {
            filter.category = Some(category);
        } else if let Some((type_name, sub_type)) = leaf.split_once(':') {
            filter.type_name = Some(normalize(type_name));
            filter.sub_type = Some(normalize(sub_type));
        } else {
            filter.type_name = Some(normalize(leaf));
        }

        Ok(filter)
    }

    /// Whether the filter selects anything narrower than "every item"
    pub fn is_empty(&self) -> bool {
        self.component_path.is_empty()
            && self.type_name.is_none()
            && self.sub_type.is_none()
            && self.category.is_none()
    }

    /// Test a data item. `ancestry` lists the normalized component types
    /// from the device down to the item's direct parent.
    pub fn matches(&self, item: &DataItemDefinition, ancestry: &[String]) -> bool {
        if self.category.is_some_and(|c| c != item.category) {
            return false;
        }
        if let Some(type_name) = &self.type_name {
            if *type_name != normalize(&item.type_name) {
                return false;
            }
        }
        if let Some(sub_type) = &self.sub_type {
            match &item.sub_type {
                Some(item_sub) if normalize(item_sub) == *sub_type => {}
                _ => return false,
            }
        }
        path_matches(&self.component_path, ancestry)
    }
}

impl fmt::Display for TriggerFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for component in &self.component_path {
            write!(f, "{}/", component)?;
        }
        match (&self.type_name, &self.sub_type, self.category) {
            (Some(t), Some(s), _) => write!(f, "{}:{}", t, s),
            (Some(t), None, _) => write!(f, "{}", t),
            (None, _, Some(c)) => write!(f, "{}", c),
            _ => write!(f, "*"),
        }
    }
}

/// Upper-case and strip underscores and whitespace
pub fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn path_matches(path: &[String], ancestry: &[String]) -> bool {
    let Some(last) = path.last() else {
        return true;
    };
    if ancestry.last() != Some(last) {
        return false;
    }

    let mut remaining = ancestry.iter();
    path.iter()
        .all(|segment| remaining.any(|ancestor| ancestor == segment))
}
