//! In-memory telemetry cache

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use mtc_core::{
    ActiveAlarm, Agent, AlarmTracker, AssetDefinition, ComponentDefinition, Connection,
    DataItemDefinition, DeviceDefinition, DeviceId, DeviceModel, DurableStore, ProtocolVersion,
    Sample, Status, TelemetryEvent,
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use crate::backup::BackupReport;
use crate::error::CacheError;
use crate::filter::EventFilterEngine;

/// Bucket used for durable-id selection before an agent header is known
const FALLBACK_VERSION: ProtocolVersion = ProtocolVersion::V13Plus;

#[derive(Debug, Clone)]
struct Entry {
    sample: Sample,
    /// Bumped whenever the entry is replaced, so a backup never marks a
    /// newer write as flushed
    revision: u64,
    flushed: bool,
}

type Series = BTreeMap<DateTime<Utc>, Entry>;
type SeriesKey = (DeviceId, String);

/// Process-wide cache of definitions, statuses and samples.
///
/// Each logical table has its own lock. A lock is never held while another
/// one is taken or across an `.await`, so concurrent device connections,
/// queries and the backup only contend per table.
pub struct TelemetryCache {
    filter: Arc<EventFilterEngine>,
    connections: RwLock<BTreeMap<DeviceId, Connection>>,
    agents: RwLock<HashMap<DeviceId, Agent>>,
    devices: RwLock<HashMap<DeviceId, DeviceDefinition>>,
    components: RwLock<HashMap<DeviceId, Vec<ComponentDefinition>>>,
    data_items: RwLock<HashMap<DeviceId, Vec<DataItemDefinition>>>,
    assets: RwLock<BTreeMap<SeriesKey, AssetDefinition>>,
    statuses: RwLock<HashMap<DeviceId, Status>>,
    samples: RwLock<HashMap<DeviceId, HashMap<String, Series>>>,
    durable_ids: RwLock<HashMap<DeviceId, BTreeSet<String>>>,
    /// Stored history of non-durable ids still to be cut back to the
    /// latest written sample
    pending_trims: Mutex<BTreeMap<SeriesKey, DateTime<Utc>>>,
    definitions_dirty: AtomicBool,
    revision: AtomicU64,
}

impl TelemetryCache {
    pub fn new(filter: Arc<EventFilterEngine>) -> Self {
        Self {
            filter,
            connections: RwLock::new(BTreeMap::new()),
            agents: RwLock::new(HashMap::new()),
            devices: RwLock::new(HashMap::new()),
            components: RwLock::new(HashMap::new()),
            data_items: RwLock::new(HashMap::new()),
            assets: RwLock::new(BTreeMap::new()),
            statuses: RwLock::new(HashMap::new()),
            samples: RwLock::new(HashMap::new()),
            durable_ids: RwLock::new(HashMap::new()),
            pending_trims: Mutex::new(BTreeMap::new()),
            definitions_dirty: AtomicBool::new(false),
            revision: AtomicU64::new(0),
        }
    }

    // =========================================================================
    // Ingestion
    // =========================================================================

    /// Apply one event from a device connection
    pub fn apply(&self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::Agent(agent) => self.apply_agent(agent),
            TelemetryEvent::Device(device) => {
                self.devices.write().insert(device.device_id.clone(), device);
                self.definitions_dirty.store(true, Ordering::SeqCst);
            }
            TelemetryEvent::Components {
                device_id,
                agent_instance_id,
                components,
            } => {
                if !self.is_current_instance(&device_id, agent_instance_id) {
                    debug!(%device_id, agent_instance_id, "Discarding stale components");
                    return;
                }
                self.components.write().insert(device_id.clone(), components);
                self.definitions_dirty.store(true, Ordering::SeqCst);
                self.refresh_durable_ids(&device_id);
            }
            TelemetryEvent::DataItems {
                device_id,
                agent_instance_id,
                data_items,
            } => {
                if !self.is_current_instance(&device_id, agent_instance_id) {
                    debug!(%device_id, agent_instance_id, "Discarding stale data items");
                    return;
                }
                self.data_items.write().insert(device_id.clone(), data_items);
                self.definitions_dirty.store(true, Ordering::SeqCst);
                self.refresh_durable_ids(&device_id);
            }
            TelemetryEvent::Samples(samples) => self.apply_samples(samples),
            TelemetryEvent::Assets(assets) => {
                let mut table = self.assets.write();
                for asset in assets {
                    table.insert((asset.device_id.clone(), asset.asset_id.clone()), asset);
                }
            }
            TelemetryEvent::Status(status) => {
                trace!(
                    device_id = %status.device_id,
                    connected = status.connected,
                    available = status.available,
                    "Status"
                );
                self.statuses.write().insert(status.device_id.clone(), status);
            }
        }
    }

    fn apply_agent(&self, agent: Agent) {
        let device_id = agent.device_id.clone();
        let previous = self.agents.write().insert(device_id.clone(), agent.clone());

        let restarted = previous
            .as_ref()
            .is_some_and(|p| p.instance_id != agent.instance_id);
        if restarted {
            info!(
                %device_id,
                instance_id = agent.instance_id,
                "Agent restarted, dropping cached definitions"
            );
            self.components.write().remove(&device_id);
            self.data_items.write().remove(&device_id);
        }

        let version_changed = previous
            .as_ref()
            .map_or(true, |p| p.protocol_version() != agent.protocol_version());
        self.definitions_dirty.store(true, Ordering::SeqCst);
        if restarted || version_changed {
            self.refresh_durable_ids(&device_id);
        }
    }

    /// Whether `instance_id` belongs to the agent instance last seen for
    /// the device. Devices without a known agent accept anything.
    fn is_current_instance(&self, device_id: &DeviceId, instance_id: u64) -> bool {
        self.agents
            .read()
            .get(device_id)
            .map_or(true, |agent| agent.instance_id == instance_id)
    }

    fn apply_samples(&self, samples: Vec<Sample>) {
        let mut accepted = Vec::with_capacity(samples.len());
        {
            let agents = self.agents.read();
            for sample in samples {
                match agents.get(&sample.device_id) {
                    Some(agent) if agent.instance_id != sample.agent_instance_id => {
                        debug!(
                            device_id = %sample.device_id,
                            id = %sample.id,
                            instance_id = sample.agent_instance_id,
                            current = agent.instance_id,
                            "Discarding sample from stale agent instance"
                        );
                    }
                    _ => accepted.push(sample),
                }
            }
        }
        if accepted.is_empty() {
            return;
        }

        let mut table = self.samples.write();
        for sample in accepted {
            let series = table
                .entry(sample.device_id.clone())
                .or_default()
                .entry(sample.id.clone())
                .or_default();
            if series
                .get(&sample.timestamp)
                .is_some_and(|existing| existing.sample == sample)
            {
                continue;
            }
            let revision = self.revision.fetch_add(1, Ordering::SeqCst);
            series.insert(
                sample.timestamp,
                Entry {
                    sample,
                    revision,
                    flushed: false,
                },
            );
        }
    }

    fn refresh_durable_ids(&self, device_id: &DeviceId) {
        let version = self
            .agents
            .read()
            .get(device_id)
            .map_or(FALLBACK_VERSION, Agent::protocol_version);
        let data_items = self
            .data_items
            .read()
            .get(device_id)
            .cloned()
            .unwrap_or_default();
        let components = self
            .components
            .read()
            .get(device_id)
            .cloned()
            .unwrap_or_default();

        let ids = self
            .filter
            .select_durable_ids(device_id, version, &data_items, &components);
        self.durable_ids.write().insert(device_id.clone(), ids);
    }

    // =========================================================================
    // Connections
    // =========================================================================

    /// Insert or replace a connection. Returns the previous entry.
    pub fn add_connection(&self, connection: Connection) -> Option<Connection> {
        self.definitions_dirty.store(true, Ordering::SeqCst);
        self.connections
            .write()
            .insert(connection.device_id().clone(), connection)
    }

    pub fn remove_connection(&self, device_id: &DeviceId) -> Option<Connection> {
        let removed = self.connections.write().remove(device_id);
        if removed.is_some() {
            self.statuses.write().remove(device_id);
        }
        removed
    }

    pub fn connection(&self, device_id: &DeviceId) -> Option<Connection> {
        self.connections.read().get(device_id).cloned()
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.connections.read().values().cloned().collect()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn latest_status(&self, device_id: &DeviceId) -> Option<Status> {
        self.statuses.read().get(device_id).cloned()
    }

    pub fn statuses(&self) -> Vec<Status> {
        self.statuses.read().values().cloned().collect()
    }

    pub fn agent(&self, device_id: &DeviceId) -> Option<Agent> {
        self.agents.read().get(device_id).cloned()
    }

    /// Structural description of a device, or `None` if nothing is known
    pub fn device_model(&self, device_id: &DeviceId) -> Option<DeviceModel> {
        let agent = self.agent(device_id);
        let device = self.devices.read().get(device_id).cloned();
        if agent.is_none() && device.is_none() {
            return None;
        }
        Some(DeviceModel {
            agent,
            device,
            components: self
                .components
                .read()
                .get(device_id)
                .cloned()
                .unwrap_or_default(),
            data_items: self
                .data_items
                .read()
                .get(device_id)
                .cloned()
                .unwrap_or_default(),
        })
    }

    /// Samples of a device between `from` and `to`.
    ///
    /// For every data item the result holds the latest sample at or before
    /// `from`, followed by every sample after `from` up to and including
    /// `to`. The result is ordered by timestamp, then sequence.
    pub fn samples(
        &self,
        device_id: &DeviceId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<Sample> {
        if to < from {
            return Vec::new();
        }

        let table = self.samples.read();
        let Some(device) = table.get(device_id) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for series in device.values() {
            if let Some((_, initial)) = series.range(..=from).next_back() {
                out.push(initial.sample.clone());
            }
            out.extend(
                series
                    .range((Bound::Excluded(from), Bound::Included(to)))
                    .map(|(_, entry)| entry.sample.clone()),
            );
        }
        drop(table);

        out.sort_by_key(Sample::order_key);
        out
    }

    /// Most recent sample of one data item
    pub fn latest_sample(&self, device_id: &DeviceId, data_item_id: &str) -> Option<Sample> {
        self.samples
            .read()
            .get(device_id)?
            .get(data_item_id)?
            .values()
            .next_back()
            .map(|entry| entry.sample.clone())
    }

    /// Alarms currently raised by the device's CONDITION data items
    pub fn alarms(&self, device_id: &DeviceId) -> Vec<ActiveAlarm> {
        let conditions: Vec<Sample> = self
            .samples
            .read()
            .get(device_id)
            .map(|device| {
                device
                    .values()
                    .flat_map(|series| series.values())
                    .filter(|entry| entry.sample.condition.is_some())
                    .map(|entry| entry.sample.clone())
                    .collect()
            })
            .unwrap_or_default();
        AlarmTracker::from_samples(&conditions).active()
    }

    pub fn assets(&self, device_id: &DeviceId) -> Vec<AssetDefinition> {
        self.assets
            .read()
            .iter()
            .filter(|((device, _), _)| device == device_id)
            .map(|(_, asset)| asset.clone())
            .collect()
    }

    /// Data item ids of the device whose full history is backed up
    pub fn durable_ids(&self, device_id: &DeviceId) -> BTreeSet<String> {
        self.durable_ids
            .read()
            .get(device_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of samples held in memory for the device
    pub fn sample_count(&self, device_id: &DeviceId) -> usize {
        self.samples
            .read()
            .get(device_id)
            .map_or(0, |device| device.values().map(BTreeMap::len).sum())
    }

    /// Number of samples not yet handled by a backup
    pub fn unflushed_count(&self) -> usize {
        self.samples
            .read()
            .values()
            .flat_map(HashMap::values)
            .flat_map(BTreeMap::values)
            .filter(|entry| !entry.flushed)
            .count()
    }

    // =========================================================================
    // Durable store
    // =========================================================================

    /// Load everything the store holds. Definitions are restricted to the
    /// latest known agent instance of each device; restored samples count
    /// as already flushed. Returns the number of samples restored.
    pub async fn restore(&self, store: &dyn DurableStore) -> Result<usize, CacheError> {
        let connections = store.read_connections().await?;
        let agents = store.read_agents().await?;
        let devices = store.read_devices().await?;
        let components = store.read_components().await?;
        let data_items = store.read_data_items().await?;
        let samples = store.read_samples().await?;

        let mut latest: HashMap<DeviceId, Agent> = HashMap::new();
        for agent in agents {
            match latest.get(&agent.device_id) {
                Some(known) if (known.timestamp, known.instance_id) >= (agent.timestamp, agent.instance_id) => {}
                _ => {
                    latest.insert(agent.device_id.clone(), agent);
                }
            }
        }
        let is_current = |device_id: &DeviceId, instance_id: u64| {
            latest
                .get(device_id)
                .map_or(true, |agent| agent.instance_id == instance_id)
        };

        let mut component_map: HashMap<DeviceId, Vec<ComponentDefinition>> = HashMap::new();
        for component in components {
            if is_current(&component.device_id, component.agent_instance_id) {
                component_map
                    .entry(component.device_id.clone())
                    .or_default()
                    .push(component);
            }
        }
        let mut data_item_map: HashMap<DeviceId, Vec<DataItemDefinition>> = HashMap::new();
        for item in data_items {
            if is_current(&item.device_id, item.agent_instance_id) {
                data_item_map
                    .entry(item.device_id.clone())
                    .or_default()
                    .push(item);
            }
        }

        let connection_count = connections.len();
        {
            let mut table = self.connections.write();
            for connection in connections {
                table.insert(connection.device_id().clone(), connection);
            }
        }
        let device_ids: BTreeSet<DeviceId> = latest
            .keys()
            .chain(component_map.keys())
            .chain(data_item_map.keys())
            .cloned()
            .collect();
        self.agents.write().extend(latest);
        self.devices
            .write()
            .extend(devices.into_iter().map(|d| (d.device_id.clone(), d)));
        self.components.write().extend(component_map);
        self.data_items.write().extend(data_item_map);

        let sample_count = samples.len();
        {
            let mut table = self.samples.write();
            for sample in samples {
                let revision = self.revision.fetch_add(1, Ordering::SeqCst);
                table
                    .entry(sample.device_id.clone())
                    .or_default()
                    .entry(sample.id.clone())
                    .or_default()
                    .insert(
                        sample.timestamp,
                        Entry {
                            sample,
                            revision,
                            flushed: true,
                        },
                    );
            }
        }

        for device_id in &device_ids {
            self.refresh_durable_ids(device_id);
        }

        info!(
            connections = connection_count,
            devices = device_ids.len(),
            samples = sample_count,
            "Restored telemetry cache"
        );
        Ok(sample_count)
    }

    /// One backup cycle: write changed definitions and unflushed samples,
    /// cut stored history of non-durable ids back to their latest sample,
    /// then apply the retention window.
    ///
    /// A failed write aborts the cycle and leaves everything in memory for
    /// the next one. Failed deletes are logged and retried next cycle;
    /// memory is only evicted after the matching delete succeeded.
    pub async fn backup(
        &self,
        store: &dyn DurableStore,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Result<BackupReport, CacheError> {
        let mut report = BackupReport::default();

        if self.definitions_dirty.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.write_definitions(store).await {
                self.definitions_dirty.store(true, Ordering::SeqCst);
                error!(error = %e, "Failed to back up definitions");
                return Err(e);
            }
            report.definitions_written = true;
        }

        let plan = self.flush_plan();
        if !plan.batch.is_empty() {
            if let Err(e) = store.write_samples(&plan.batch).await {
                error!(error = %e, samples = plan.batch.len(), "Failed to back up samples");
                return Err(e.into());
            }
        }
        report.samples_written = plan.batch.len();
        self.mark_flushed(&plan.handled);
        self.pending_trims.lock().extend(plan.trims);

        self.run_trims(store, &mut report).await;
        self.apply_retention(store, now - retention, &mut report).await;

        debug!(
            written = report.samples_written,
            deleted = report.samples_deleted,
            evicted = report.samples_evicted,
            "Backup cycle finished"
        );
        Ok(report)
    }

    async fn write_definitions(&self, store: &dyn DurableStore) -> Result<(), CacheError> {
        let connections = self.connections();
        let agents: Vec<Agent> = self.agents.read().values().cloned().collect();
        let devices: Vec<DeviceDefinition> = self.devices.read().values().cloned().collect();
        let components: Vec<ComponentDefinition> =
            self.components.read().values().flatten().cloned().collect();
        let data_items: Vec<DataItemDefinition> =
            self.data_items.read().values().flatten().cloned().collect();

        store.write_connections(&connections).await?;
        store.write_agents(&agents).await?;
        store.write_devices(&devices).await?;
        store.write_components(&components).await?;
        store.write_data_items(&data_items).await?;
        Ok(())
    }

    fn flush_plan(&self) -> FlushPlan {
        let durable = self.durable_ids.read().clone();
        let table = self.samples.read();
        let mut plan = FlushPlan::default();

        for (device_id, device) in table.iter() {
            let durable_ids = durable.get(device_id);
            for (id, series) in device {
                let is_durable = durable_ids.is_some_and(|ids| ids.contains(id));
                if is_durable {
                    for entry in series.values().filter(|e| !e.flushed) {
                        plan.batch.push(entry.sample.clone());
                        plan.handled.push(handled_key(entry));
                    }
                    continue;
                }

                let Some(latest) = series.values().next_back() else {
                    continue;
                };
                if latest.flushed {
                    continue;
                }
                plan.batch.push(latest.sample.clone());
                plan.handled
                    .extend(series.values().filter(|e| !e.flushed).map(handled_key));
                plan.trims
                    .push(((device_id.clone(), id.clone()), latest.sample.timestamp));
            }
        }
        plan
    }

    fn mark_flushed(&self, handled: &[HandledKey]) {
        let mut table = self.samples.write();
        for (device_id, id, timestamp, revision) in handled {
            let entry = table
                .get_mut(device_id)
                .and_then(|device| device.get_mut(id))
                .and_then(|series| series.get_mut(timestamp));
            if let Some(entry) = entry {
                if entry.revision == *revision {
                    entry.flushed = true;
                }
            }
        }
    }

    /// A trim stays queued until its delete succeeded, so an abandoned
    /// cycle leaves it for the next one.
    async fn run_trims(&self, store: &dyn DurableStore, report: &mut BackupReport) {
        let trims: Vec<(SeriesKey, DateTime<Utc>)> = self
            .pending_trims
            .lock()
            .iter()
            .map(|(key, older_than)| (key.clone(), *older_than))
            .collect();
        for (key, older_than) in trims {
            let (device_id, id) = &key;
            match store.delete_samples(device_id, id, older_than).await {
                Ok(n) => {
                    report.samples_deleted += n;
                    let mut pending = self.pending_trims.lock();
                    // a newer trim queued meanwhile still has to run
                    if pending.get(&key) == Some(&older_than) {
                        pending.remove(&key);
                    }
                }
                Err(e) => {
                    warn!(%device_id, id = %id, error = %e, "Failed to trim stored samples");
                    report.failed_deletes += 1;
                }
            }
        }
    }

    async fn apply_retention(
        &self,
        store: &dyn DurableStore,
        cutoff: DateTime<Utc>,
        report: &mut BackupReport,
    ) {
        let keepers: Vec<(DeviceId, String, DateTime<Utc>)> = {
            let table = self.samples.read();
            table
                .iter()
                .flat_map(|(device_id, device)| {
                    device.iter().filter_map(move |(id, series)| {
                        let mut expired = series.range(..cutoff);
                        let (keeper_ts, keeper) = expired.next_back()?;
                        // one expired sample is already the single survivor
                        expired.next_back()?;
                        keeper
                            .flushed
                            .then(|| (device_id.clone(), id.clone(), *keeper_ts))
                    })
                })
                .collect()
        };

        for (device_id, id, keeper) in keepers {
            match store.delete_samples(&device_id, &id, keeper).await {
                Ok(deleted) => {
                    report.samples_deleted += deleted;
                    report.samples_evicted += self.evict(&device_id, &id, keeper);
                }
                Err(e) => {
                    warn!(%device_id, id = %id, error = %e, "Failed to delete expired samples");
                    report.failed_deletes += 1;
                }
            }
        }
    }

    /// Drop flushed samples older than `keeper` from memory
    fn evict(&self, device_id: &DeviceId, id: &str, keeper: DateTime<Utc>) -> usize {
        let mut table = self.samples.write();
        let Some(series) = table.get_mut(device_id).and_then(|d| d.get_mut(id)) else {
            return 0;
        };
        let before = series.len();
        series.retain(|timestamp, entry| *timestamp >= keeper || !entry.flushed);
        before - series.len()
    }
}

type HandledKey = (DeviceId, String, DateTime<Utc>, u64);

fn handled_key(entry: &Entry) -> HandledKey {
    (
        entry.sample.device_id.clone(),
        entry.sample.id.clone(),
        entry.sample.timestamp,
        entry.revision,
    )
}

#[derive(Default)]
struct FlushPlan {
    batch: Vec<Sample>,
    handled: Vec<HandledKey>,
    trims: Vec<(SeriesKey, DateTime<Utc>)>,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use mtc_core::{Category, ConditionState, MemoryStore, ParentType};
    use pretty_assertions::assert_eq;

    use super::*;

    fn device() -> DeviceId {
        DeviceId::derive("D1", 5000, None)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn agent(instance_id: u64) -> Agent {
        Agent {
            device_id: device(),
            instance_id,
            sender: "agent".into(),
            version: "1.3.0.18".into(),
            buffer_size: 131072,
            test_indicator: false,
            timestamp: at(0),
        }
    }

    fn data_item(id: &str, type_name: &str, category: Category) -> DataItemDefinition {
        DataItemDefinition {
            device_id: device(),
            agent_instance_id: 1,
            id: id.into(),
            name: None,
            category,
            type_name: type_name.into(),
            sub_type: None,
            units: None,
            native_units: None,
            representation: None,
            parent_id: "d1".into(),
            parent_type: ParentType::Device,
        }
    }

    fn sample(id: &str, secs: i64, value: &str) -> Sample {
        Sample {
            device_id: device(),
            id: id.into(),
            agent_instance_id: 1,
            sequence: secs as u64,
            timestamp: at(secs),
            value: value.into(),
            condition: None,
        }
    }

    fn cache() -> TelemetryCache {
        let cache = TelemetryCache::new(Arc::new(EventFilterEngine::builtin().unwrap()));
        cache.apply(TelemetryEvent::Agent(agent(1)));
        cache.apply(TelemetryEvent::DataItems {
            device_id: device(),
            agent_instance_id: 1,
            data_items: vec![
                data_item("avail", "AVAILABILITY", Category::Event),
                data_item("speed", "SPINDLE_SPEED", Category::Sample),
            ],
        });
        cache
    }

    #[test]
    fn test_durable_ids_follow_data_items() {
        let cache = cache();
        assert_eq!(
            cache.durable_ids(&device()).into_iter().collect::<Vec<_>>(),
            vec!["avail".to_string()]
        );
    }

    #[test]
    fn test_same_timestamp_replaces() {
        let cache = cache();
        cache.apply(TelemetryEvent::Samples(vec![sample("speed", 5, "100")]));
        cache.apply(TelemetryEvent::Samples(vec![sample("speed", 5, "120")]));

        let samples = cache.samples(&device(), at(0), at(10));
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, "120");
    }

    #[test]
    fn test_samples_start_with_value_at_from() {
        let cache = cache();
        cache.apply(TelemetryEvent::Samples(vec![
            sample("speed", 1, "10"),
            sample("speed", 3, "30"),
            sample("speed", 6, "60"),
            sample("speed", 9, "90"),
            sample("avail", 2, "AVAILABLE"),
        ]));

        let samples = cache.samples(&device(), at(4), at(8));
        let values: Vec<&str> = samples.iter().map(|s| s.value.as_str()).collect();
        assert_eq!(values, vec!["AVAILABLE", "30", "60"]);
        assert!(samples.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_stale_instance_samples_are_discarded() {
        let cache = cache();
        cache.apply(TelemetryEvent::Agent(agent(2)));

        let mut stale = sample("speed", 5, "1");
        stale.agent_instance_id = 1;
        let mut fresh = sample("speed", 6, "2");
        fresh.agent_instance_id = 2;
        cache.apply(TelemetryEvent::Samples(vec![stale, fresh]));

        let samples = cache.samples(&device(), at(0), at(10));
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].agent_instance_id, 2);
    }

    #[test]
    fn test_restart_drops_definitions() {
        let cache = cache();
        cache.apply(TelemetryEvent::Agent(agent(2)));

        let model = cache.device_model(&device()).unwrap();
        assert!(model.data_items.is_empty());
        assert!(cache.durable_ids(&device()).is_empty());

        // late data items of the old instance are ignored
        cache.apply(TelemetryEvent::DataItems {
            device_id: device(),
            agent_instance_id: 1,
            data_items: vec![data_item("avail", "AVAILABILITY", Category::Event)],
        });
        assert!(cache.device_model(&device()).unwrap().data_items.is_empty());
    }

    #[test]
    fn test_alarms_cleared_by_normal() {
        let cache = cache();
        let mut fault = sample("system", 10, "Overtemp");
        fault.condition = Some(ConditionState::Fault);
        let mut normal = sample("system", 20, "");
        normal.condition = Some(ConditionState::Normal);
        cache.apply(TelemetryEvent::Samples(vec![fault]));
        assert_eq!(cache.alarms(&device()).len(), 1);

        cache.apply(TelemetryEvent::Samples(vec![normal]));
        assert!(cache.alarms(&device()).is_empty());
    }

    #[tokio::test]
    async fn test_backup_writes_durable_history_and_latest_other() {
        let cache = cache();
        let store = MemoryStore::new();
        cache.apply(TelemetryEvent::Samples(vec![
            sample("avail", 1, "AVAILABLE"),
            sample("avail", 2, "UNAVAILABLE"),
            sample("speed", 1, "10"),
            sample("speed", 2, "20"),
        ]));

        let report = cache.backup(&store, at(10), Duration::hours(1)).await.unwrap();
        assert!(report.definitions_written);
        assert_eq!(report.samples_written, 3);
        assert_eq!(store.sample_count(&device(), "avail"), 2);
        assert_eq!(store.sample_count(&device(), "speed"), 1);
        assert_eq!(cache.unflushed_count(), 0);

        // nothing new, nothing written
        let report = cache.backup(&store, at(11), Duration::hours(1)).await.unwrap();
        assert!(!report.definitions_written);
        assert_eq!(report.samples_written, 0);
    }

    #[tokio::test]
    async fn test_non_durable_history_is_trimmed_in_store() {
        let cache = cache();
        let store = MemoryStore::new();
        cache.apply(TelemetryEvent::Samples(vec![sample("speed", 1, "10")]));
        cache.backup(&store, at(2), Duration::hours(1)).await.unwrap();
        cache.apply(TelemetryEvent::Samples(vec![sample("speed", 3, "30")]));
        let report = cache.backup(&store, at(4), Duration::hours(1)).await.unwrap();

        assert_eq!(report.samples_deleted, 1);
        assert_eq!(store.sample_count(&device(), "speed"), 1);
        // memory still answers for the whole window
        assert_eq!(cache.sample_count(&device()), 2);
    }

    #[tokio::test]
    async fn test_store_failure_keeps_samples() {
        let cache = cache();
        let store = MemoryStore::new();
        cache.apply(TelemetryEvent::Samples(vec![
            sample("avail", 1, "AVAILABLE"),
            sample("avail", 2, "UNAVAILABLE"),
        ]));

        store.set_failing(true);
        assert!(cache.backup(&store, at(10_000), Duration::seconds(60)).await.is_err());
        assert_eq!(cache.unflushed_count(), 2);
        assert_eq!(cache.sample_count(&device()), 2);

        store.set_failing(false);
        let report = cache.backup(&store, at(10_000), Duration::seconds(60)).await.unwrap();
        assert_eq!(report.samples_written, 2);
        assert_eq!(store.sample_count(&device(), "avail"), 1);
        assert_eq!(cache.sample_count(&device()), 1);
    }

    #[tokio::test]
    async fn test_restore_round_trip() {
        let store = MemoryStore::new();
        {
            let cache = cache();
            cache.add_connection(Connection::new("10.0.0.5", 5000, Some("D1".into()), None));
            cache.apply(TelemetryEvent::Samples(vec![sample("avail", 1, "AVAILABLE")]));
            cache.backup(&store, at(2), Duration::hours(1)).await.unwrap();
        }

        let restored = TelemetryCache::new(Arc::new(EventFilterEngine::builtin().unwrap()));
        assert_eq!(restored.restore(&store).await.unwrap(), 1);
        assert_eq!(restored.connections().len(), 1);
        assert_eq!(restored.agent(&device()).unwrap().instance_id, 1);
        assert!(restored.durable_ids(&device()).contains("avail"));
        assert_eq!(restored.unflushed_count(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_cycle_keeps_trims_queued() {
        let cache = cache();
        let store = MemoryStore::new();
        cache.apply(TelemetryEvent::Samples(vec![sample("speed", 1, "10")]));
        cache.backup(&store, at(2), Duration::hours(1)).await.unwrap();
        cache.apply(TelemetryEvent::Samples(vec![sample("speed", 3, "30")]));

        store.set_stall_deletes(true);
        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            cache.backup(&store, at(4), Duration::hours(1)),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(store.sample_count(&device(), "speed"), 2);

        store.set_stall_deletes(false);
        let report = cache.backup(&store, at(5), Duration::hours(1)).await.unwrap();
        assert_eq!(report.samples_written, 0);
        assert_eq!(report.samples_deleted, 1);
        assert_eq!(store.sample_count(&device(), "speed"), 1);
    }
}
