//! Active alarm tracking over CONDITION samples

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ConditionState, Sample};

/// A CONDITION data item currently in WARNING or FAULT
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveAlarm {
    pub data_item_id: String,
    pub state: ConditionState,
    /// Timestamp of the sample that raised the alarm
    pub since: DateTime<Utc>,
    pub value: String,
}

/// Folds condition samples into the set of currently raised alarms.
///
/// WARNING and FAULT raise (or update) an alarm for the data item;
/// NORMAL and UNAVAILABLE clear it. Non-condition samples are ignored.
#[derive(Debug, Default, Clone)]
pub struct AlarmTracker {
    active: BTreeMap<String, ActiveAlarm>,
}

impl AlarmTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tracker from samples in any order
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a Sample>) -> Self {
        let mut ordered: Vec<&Sample> = samples.into_iter().collect();
        ordered.sort_by_key(|s| s.order_key());

        let mut tracker = Self::new();
        for sample in ordered {
            tracker.apply(sample);
        }
        tracker
    }

    pub fn apply(&mut self, sample: &Sample) {
        let Some(state) = sample.condition else {
            return;
        };

        if state.is_active() {
            let since = match self.active.get(&sample.id) {
                Some(existing) if existing.state == state => existing.since,
                _ => sample.timestamp,
            };
            self.active.insert(
                sample.id.clone(),
                ActiveAlarm {
                    data_item_id: sample.id.clone(),
                    state,
                    since,
                    value: sample.value.clone(),
                },
            );
        } else {
            self.active.remove(&sample.id);
        }
    }

    pub fn active(&self) -> Vec<ActiveAlarm> {
        self.active.values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::id::DeviceId;

    fn condition(id: &str, secs: i64, state: ConditionState) -> Sample {
        Sample {
            device_id: DeviceId::derive("D1", 5000, None),
            id: id.into(),
            agent_instance_id: 1,
            sequence: secs as u64,
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            value: String::new(),
            condition: Some(state),
        }
    }

    #[test]
    fn test_fault_then_normal_clears() {
        let samples = vec![
            condition("logic", 10, ConditionState::Fault),
            condition("logic", 20, ConditionState::Normal),
        ];
        assert!(AlarmTracker::from_samples(&samples).is_empty());
    }

    #[test]
    fn test_order_of_input_does_not_matter() {
        let samples = vec![
            condition("logic", 20, ConditionState::Normal),
            condition("logic", 10, ConditionState::Fault),
            condition("motion", 15, ConditionState::Warning),
        ];
        let active = AlarmTracker::from_samples(&samples).active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].data_item_id, "motion");
        assert_eq!(active[0].state, ConditionState::Warning);
    }

    #[test]
    fn test_repeated_state_keeps_original_since() {
        let samples = vec![
            condition("logic", 10, ConditionState::Fault),
            condition("logic", 12, ConditionState::Fault),
        ];
        let active = AlarmTracker::from_samples(&samples).active();
        assert_eq!(active[0].since, Utc.timestamp_opt(10, 0).unwrap());
    }
}
