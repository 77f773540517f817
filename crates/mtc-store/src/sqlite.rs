//! SQLite implementation of the durable store

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mtc_core::{
    Agent, ComponentDefinition, Connection, DataItemDefinition, DeviceDefinition, DeviceId,
    DurableStore, Sample, StoreError, StoreResult,
};
use parking_lot::Mutex;
use rusqlite::{params, Row};
use tracing::{debug, info};

use crate::rows::{self, parent_type_str, to_millis};
use crate::schema::SCHEMA;

fn db_error(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::FromSqlConversionFailure(..) | rusqlite::Error::InvalidColumnType(..) => {
            StoreError::InvalidRow(e.to_string())
        }
        other => StoreError::Database(other.to_string()),
    }
}

/// Durable store on one SQLite database.
///
/// The connection is not `Sync`, so it sits behind a mutex and every call
/// runs on tokio's blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = rusqlite::Connection::open(path).map_err(|e| {
            StoreError::Unavailable(format!("cannot open {}: {}", path.display(), e))
        })?;
        let store = Self::init(conn)?;
        info!(path = %path.display(), "Opened SQLite store");
        Ok(store)
    }

    /// In-memory database, mainly for tests
    pub fn new_in_memory() -> StoreResult<Self> {
        let conn = rusqlite::Connection::open_in_memory().map_err(db_error)?;
        Self::init(conn)
    }

    fn init(conn: rusqlite::Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA).map_err(db_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Internal(format!("store task failed: {}", e)))?
        .map_err(db_error)
    }

    async fn read_all<T, F>(&self, table: &'static str, columns: &'static str, map: F) -> StoreResult<Vec<T>>
    where
        T: Send + 'static,
        F: Fn(&Row) -> rusqlite::Result<T> + Send + 'static,
    {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!("SELECT {} FROM {}", columns, table))?;
            let rows = stmt.query_map([], |row| map(row))?;
            rows.collect::<rusqlite::Result<Vec<T>>>()
        })
        .await
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn write_connections(&self, batch: &[Connection]) -> StoreResult<()> {
        let batch = batch.to_vec();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO connections
                     (device_id, address, port, physical_address, device_name, enabled, interval_ms)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for c in &batch {
                    stmt.execute(params![
                        c.device_id().as_str(),
                        c.address(),
                        c.port(),
                        c.physical_address(),
                        c.device_name(),
                        c.enabled,
                        c.interval_ms as i64,
                    ])?;
                }
            }
            tx.commit()
        })
        .await
    }

    async fn write_agents(&self, batch: &[Agent]) -> StoreResult<()> {
        let batch = batch.to_vec();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO agents
                     (device_id, instance_id, sender, version, buffer_size, test_indicator, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for a in &batch {
                    stmt.execute(params![
                        a.device_id.as_str(),
                        a.instance_id as i64,
                        a.sender,
                        a.version,
                        a.buffer_size as i64,
                        a.test_indicator,
                        to_millis(a.timestamp),
                    ])?;
                }
            }
            tx.commit()
        })
        .await
    }

    async fn write_devices(&self, batch: &[DeviceDefinition]) -> StoreResult<()> {
        let batch = batch.to_vec();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO devices
                     (device_id, agent_instance_id, id, name, uuid, manufacturer, model,
                      serial_number, station, description, iso841_class, sample_interval)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                )?;
                for d in &batch {
                    stmt.execute(params![
                        d.device_id.as_str(),
                        d.agent_instance_id as i64,
                        d.id,
                        d.name,
                        d.uuid,
                        d.manufacturer,
                        d.model,
                        d.serial_number,
                        d.station,
                        d.description,
                        d.iso841_class,
                        d.sample_interval,
                    ])?;
                }
            }
            tx.commit()
        })
        .await
    }

    async fn write_components(&self, batch: &[ComponentDefinition]) -> StoreResult<()> {
        let batch = batch.to_vec();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO components
                     (device_id, agent_instance_id, id, type, name, uuid, native_name,
                      parent_id, parent_type)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )?;
                for c in &batch {
                    stmt.execute(params![
                        c.device_id.as_str(),
                        c.agent_instance_id as i64,
                        c.id,
                        c.type_name,
                        c.name,
                        c.uuid,
                        c.native_name,
                        c.parent_id,
                        parent_type_str(c.parent_type),
                    ])?;
                }
            }
            tx.commit()
        })
        .await
    }

    async fn write_data_items(&self, batch: &[DataItemDefinition]) -> StoreResult<()> {
        let batch = batch.to_vec();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO data_items
                     (device_id, agent_instance_id, id, name, category, type, sub_type, units,
                      native_units, representation, parent_id, parent_type)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                )?;
                for d in &batch {
                    stmt.execute(params![
                        d.device_id.as_str(),
                        d.agent_instance_id as i64,
                        d.id,
                        d.name,
                        d.category.to_string(),
                        d.type_name,
                        d.sub_type,
                        d.units,
                        d.native_units,
                        d.representation,
                        d.parent_id,
                        parent_type_str(d.parent_type),
                    ])?;
                }
            }
            tx.commit()
        })
        .await
    }

    async fn write_samples(&self, batch: &[Sample]) -> StoreResult<()> {
        let batch = batch.to_vec();
        let count = batch.len();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO samples
                     (device_id, id, agent_instance_id, sequence, timestamp, value, condition)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for s in &batch {
                    stmt.execute(params![
                        s.device_id.as_str(),
                        s.id,
                        s.agent_instance_id as i64,
                        s.sequence as i64,
                        to_millis(s.timestamp),
                        s.value,
                        s.condition.map(|c| c.to_string()),
                    ])?;
                }
            }
            tx.commit()
        })
        .await?;
        debug!(count, "Wrote samples");
        Ok(())
    }

    async fn read_connections(&self) -> StoreResult<Vec<Connection>> {
        self.read_all("connections", rows::CONNECTION_COLUMNS, rows::connection)
            .await
    }

    async fn read_agents(&self) -> StoreResult<Vec<Agent>> {
        self.read_all("agents", rows::AGENT_COLUMNS, rows::agent).await
    }

    async fn read_devices(&self) -> StoreResult<Vec<DeviceDefinition>> {
        self.read_all("devices", rows::DEVICE_COLUMNS, rows::device).await
    }

    async fn read_components(&self) -> StoreResult<Vec<ComponentDefinition>> {
        self.read_all("components", rows::COMPONENT_COLUMNS, rows::component)
            .await
    }

    async fn read_data_items(&self) -> StoreResult<Vec<DataItemDefinition>> {
        self.read_all("data_items", rows::DATA_ITEM_COLUMNS, rows::data_item)
            .await
    }

    async fn read_samples(&self) -> StoreResult<Vec<Sample>> {
        self.read_all("samples", rows::SAMPLE_COLUMNS, rows::sample).await
    }

    async fn delete_samples(
        &self,
        device_id: &DeviceId,
        data_item_id: &str,
        older_than: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let device_id = device_id.as_str().to_string();
        let data_item_id = data_item_id.to_string();
        let older_than = to_millis(older_than);
        let deleted = self
            .blocking(move |conn| {
                conn.execute(
                    "DELETE FROM samples WHERE device_id = ?1 AND id = ?2 AND timestamp < ?3",
                    params![device_id, data_item_id, older_than],
                )
            })
            .await?;
        Ok(deleted as u64)
    }

    async fn delete_connection(&self, device_id: &DeviceId) -> StoreResult<()> {
        let device_id = device_id.as_str().to_string();
        self.blocking(move |conn| {
            conn.execute("DELETE FROM connections WHERE device_id = ?1", params![device_id])
                .map(|_| ())
        })
        .await
    }
}
