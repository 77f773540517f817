//! Durable store contract used by the telemetry cache

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::{StoreError, StoreResult};
use crate::id::DeviceId;
use crate::models::{
    Agent, ComponentDefinition, Connection, DataItemDefinition, DeviceDefinition, Sample,
};

/// Persistent storage for cached telemetry.
///
/// Every `write_*` call is all-or-nothing: either the whole batch is stored
/// or nothing is. Writes are upserts keyed by the identity of each row:
///
/// | Table       | Key                                    |
/// |-------------|----------------------------------------|
/// | connections | device id                              |
/// | agents      | device id, instance id                 |
/// | devices     | device id                              |
/// | components  | device id, component id                |
/// | data items  | device id, data item id                |
/// | samples     | device id, data item id, timestamp     |
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn write_connections(&self, batch: &[Connection]) -> StoreResult<()>;
    async fn write_agents(&self, batch: &[Agent]) -> StoreResult<()>;
    async fn write_devices(&self, batch: &[DeviceDefinition]) -> StoreResult<()>;
    async fn write_components(&self, batch: &[ComponentDefinition]) -> StoreResult<()>;
    async fn write_data_items(&self, batch: &[DataItemDefinition]) -> StoreResult<()>;
    async fn write_samples(&self, batch: &[Sample]) -> StoreResult<()>;

    async fn read_connections(&self) -> StoreResult<Vec<Connection>>;
    async fn read_agents(&self) -> StoreResult<Vec<Agent>>;
    async fn read_devices(&self) -> StoreResult<Vec<DeviceDefinition>>;
    async fn read_components(&self) -> StoreResult<Vec<ComponentDefinition>>;
    async fn read_data_items(&self) -> StoreResult<Vec<DataItemDefinition>>;
    async fn read_samples(&self) -> StoreResult<Vec<Sample>>;

    /// Delete samples of one data item with a timestamp strictly before
    /// `older_than`. Returns the number of rows removed.
    async fn delete_samples(
        &self,
        device_id: &DeviceId,
        data_item_id: &str,
        older_than: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Forget a connection so it is not restored on the next start
    async fn delete_connection(&self, device_id: &DeviceId) -> StoreResult<()>;
}

// =============================================================================
// In-memory store
// =============================================================================

type SampleKey = (DeviceId, String, DateTime<Utc>);

#[derive(Default)]
struct Tables {
    connections: BTreeMap<DeviceId, Connection>,
    agents: BTreeMap<(DeviceId, u64), Agent>,
    devices: BTreeMap<DeviceId, DeviceDefinition>,
    components: BTreeMap<(DeviceId, String), ComponentDefinition>,
    data_items: BTreeMap<(DeviceId, String), DataItemDefinition>,
    samples: BTreeMap<SampleKey, Sample>,
}

/// Store backed by process memory.
///
/// Used by tests and when no database is configured. Failures can be
/// injected with [`MemoryStore::set_failing`].
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    failing: AtomicBool,
    stall_deletes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make `delete_samples` hang until the calling future is dropped
    pub fn set_stall_deletes(&self, stall: bool) {
        self.stall_deletes.store(stall, Ordering::SeqCst);
    }

    /// Number of stored samples for one data item
    pub fn sample_count(&self, device_id: &DeviceId, data_item_id: &str) -> usize {
        self.tables
            .lock()
            .samples
            .keys()
            .filter(|(d, id, _)| d == device_id && id == data_item_id)
            .count()
    }

    fn check(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store set to fail".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn write_connections(&self, batch: &[Connection]) -> StoreResult<()> {
        self.check()?;
        let mut tables = self.tables.lock();
        for c in batch {
            tables.connections.insert(c.device_id().clone(), c.clone());
        }
        Ok(())
    }

    async fn write_agents(&self, batch: &[Agent]) -> StoreResult<()> {
        self.check()?;
        let mut tables = self.tables.lock();
        for a in batch {
            tables
                .agents
                .insert((a.device_id.clone(), a.instance_id), a.clone());
        }
        Ok(())
    }

    async fn write_devices(&self, batch: &[DeviceDefinition]) -> StoreResult<()> {
        self.check()?;
        let mut tables = self.tables.lock();
        for d in batch {
            tables.devices.insert(d.device_id.clone(), d.clone());
        }
        Ok(())
    }

    async fn write_components(&self, batch: &[ComponentDefinition]) -> StoreResult<()> {
        self.check()?;
        let mut tables = self.tables.lock();
        for c in batch {
            tables
                .components
                .insert((c.device_id.clone(), c.id.clone()), c.clone());
        }
        Ok(())
    }

    async fn write_data_items(&self, batch: &[DataItemDefinition]) -> StoreResult<()> {
        self.check()?;
        let mut tables = self.tables.lock();
        for d in batch {
            tables
                .data_items
                .insert((d.device_id.clone(), d.id.clone()), d.clone());
        }
        Ok(())
    }

    async fn write_samples(&self, batch: &[Sample]) -> StoreResult<()> {
        self.check()?;
        let mut tables = self.tables.lock();
        for s in batch {
            tables
                .samples
                .insert((s.device_id.clone(), s.id.clone(), s.timestamp), s.clone());
        }
        Ok(())
    }

    async fn read_connections(&self) -> StoreResult<Vec<Connection>> {
        self.check()?;
        Ok(self.tables.lock().connections.values().cloned().collect())
    }

    async fn read_agents(&self) -> StoreResult<Vec<Agent>> {
        self.check()?;
        Ok(self.tables.lock().agents.values().cloned().collect())
    }

    async fn read_devices(&self) -> StoreResult<Vec<DeviceDefinition>> {
        self.check()?;
        Ok(self.tables.lock().devices.values().cloned().collect())
    }

    async fn read_components(&self) -> StoreResult<Vec<ComponentDefinition>> {
        self.check()?;
        Ok(self.tables.lock().components.values().cloned().collect())
    }

    async fn read_data_items(&self) -> StoreResult<Vec<DataItemDefinition>> {
        self.check()?;
        Ok(self.tables.lock().data_items.values().cloned().collect())
    }

    async fn read_samples(&self) -> StoreResult<Vec<Sample>> {
        self.check()?;
        Ok(self.tables.lock().samples.values().cloned().collect())
    }

    async fn delete_samples(
        &self,
        device_id: &DeviceId,
        data_item_id: &str,
        older_than: DateTime<Utc>,
    ) -> StoreResult<u64> {
        self.check()?;
        if self.stall_deletes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let mut tables = self.tables.lock();
        let before = tables.samples.len();
        tables.samples.retain(|(d, id, ts), _| {
            !(d == device_id && id == data_item_id && *ts < older_than)
        });
        Ok((before - tables.samples.len()) as u64)
    }

    async fn delete_connection(&self, device_id: &DeviceId) -> StoreResult<()> {
        self.check()?;
        self.tables.lock().connections.remove(device_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn sample(device_id: &DeviceId, id: &str, secs: i64) -> Sample {
        Sample {
            device_id: device_id.clone(),
            id: id.into(),
            agent_instance_id: 7,
            sequence: secs as u64,
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            value: secs.to_string(),
            condition: None,
        }
    }

    #[tokio::test]
    async fn test_samples_upsert_by_timestamp() {
        let store = MemoryStore::new();
        let dev = DeviceId::derive("mill", 5000, None);

        store.write_samples(&[sample(&dev, "x", 1)]).await.unwrap();
        let mut replaced = sample(&dev, "x", 1);
        replaced.value = "new".into();
        store.write_samples(&[replaced]).await.unwrap();

        let stored = store.read_samples().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].value, "new");
    }

    #[tokio::test]
    async fn test_delete_samples_is_strictly_older() {
        let store = MemoryStore::new();
        let dev = DeviceId::derive("mill", 5000, None);
        store
            .write_samples(&[sample(&dev, "x", 1), sample(&dev, "x", 2), sample(&dev, "y", 1)])
            .await
            .unwrap();

        let removed = store
            .delete_samples(&dev, "x", Utc.timestamp_opt(2, 0).unwrap())
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.sample_count(&dev, "x"), 1);
        assert_eq!(store.sample_count(&dev, "y"), 1);
    }

    #[tokio::test]
    async fn test_failing_store_rejects_everything() {
        let store = MemoryStore::new();
        store.set_failing(true);
        assert!(store.read_connections().await.is_err());
        assert!(store.write_samples(&[]).await.is_err());
        store.set_failing(false);
        assert!(store.read_connections().await.is_ok());
    }
}
