//! Collector: finders → activation queue → device connections → cache

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use mtc_cache::TelemetryCache;
use mtc_core::{Connection, DeviceId, DurableStore};
use mtc_discovery::{DeviceFinder, FinderEvent, NetworkProbe, SystemNetwork};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{CollectorConfig, CollectorSettings, DeviceEntry, DeviceFinderConfig};
use crate::connection::{ConnectionState, DeviceConnection};
use crate::error::CollectorError;
use crate::queue::{ConnectionActivationQueue, QueueEvent};

/// Owns every running part of data collection.
///
/// Cloning is cheap and every clone drives the same collector.
#[derive(Clone)]
pub struct Collector {
    inner: Arc<Inner>,
}

struct Inner {
    cache: Arc<TelemetryCache>,
    store: Arc<dyn DurableStore>,
    settings: CollectorSettings,
    finder_config: DeviceFinderConfig,
    devices: Vec<DeviceEntry>,
    network: Arc<dyn NetworkProbe>,
    queue: ConnectionActivationQueue,
    /// At most one session per device id
    connections: DashMap<DeviceId, Arc<DeviceConnection>>,
    finders: Mutex<Vec<DeviceFinder>>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl Collector {
    pub fn new(
        config: &CollectorConfig,
        cache: Arc<TelemetryCache>,
        store: Arc<dyn DurableStore>,
    ) -> Self {
        Self::with_network(config, cache, store, Arc::new(SystemNetwork))
    }

    /// Collector whose device finders use `network`
    pub fn with_network(
        config: &CollectorConfig,
        cache: Arc<TelemetryCache>,
        store: Arc<dyn DurableStore>,
        network: Arc<dyn NetworkProbe>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                store,
                settings: config.collector.clone(),
                finder_config: config.device_finder.clone(),
                devices: config.devices.clone(),
                network,
                queue: ConnectionActivationQueue::new(config.collector.activation_delay()),
                connections: DashMap::new(),
                finders: Mutex::new(Vec::new()),
                cancel: Mutex::new(None),
            }),
        }
    }

    pub fn cache(&self) -> &Arc<TelemetryCache> {
        &self.inner.cache
    }

    /// Start the activation queue, queue configured and restored
    /// connections, and start one device finder per configured interface.
    ///
    /// A finder whose scope cannot be resolved fails the whole start.
    pub fn start(&self) -> Result<(), CollectorError> {
        let cancel = {
            let mut slot = self.inner.cancel.lock();
            if slot.is_some() {
                return Err(CollectorError::AlreadyRunning);
            }
            let cancel = CancellationToken::new();
            *slot = Some(cancel.clone());
            cancel
        };

        let activations = self.inner.queue.start();
        tokio::spawn(activation_loop(
            Arc::downgrade(&self.inner),
            activations,
            cancel.clone(),
        ));

        let configured: Vec<Connection> = self
            .inner
            .devices
            .iter()
            .map(DeviceEntry::to_connection)
            .collect();
        for connection in &configured {
            self.add_connection(connection.clone());
        }
        for connection in self.inner.cache.connections() {
            let is_configured = configured
                .iter()
                .any(|c| c.device_id() == connection.device_id());
            if !is_configured && connection.enabled {
                debug!(device_id = %connection.device_id(), "Re-activating stored connection");
                self.inner.queue.add(connection);
            }
        }

        if self.inner.finder_config.enabled {
            if let Err(e) = self.start_finders(&cancel) {
                self.stop();
                return Err(e);
            }
        }

        info!(
            configured = configured.len(),
            finders = self.inner.finders.lock().len(),
            "Collector started"
        );
        Ok(())
    }

    fn start_finders(&self, cancel: &CancellationToken) -> Result<(), CollectorError> {
        for scope in &self.inner.finder_config.interfaces {
            let finder = DeviceFinder::with_network(self.inner.network.clone());
            let events = finder.start(scope.clone())?;
            tokio::spawn(discovery_loop(
                Arc::downgrade(&self.inner),
                events,
                cancel.clone(),
            ));
            self.inner.finders.lock().push(finder);
        }
        Ok(())
    }

    /// Stop finders, the queue and every device connection. Idempotent.
    pub fn stop(&self) {
        let Some(cancel) = self.inner.cancel.lock().take() else {
            return;
        };
        cancel.cancel();
        for finder in self.inner.finders.lock().drain(..) {
            finder.stop();
        }
        self.inner.queue.stop();

        let ids: Vec<DeviceId> = self
            .inner
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for id in ids {
            self.inner.deactivate(&id);
        }
        info!("Collector stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.cancel.lock().is_some()
    }

    /// Record a connection and queue it if enabled. A disabled connection
    /// that is running is stopped, and one whose settings changed is
    /// restarted through the queue. Returns whether it was queued.
    pub fn add_connection(&self, connection: Connection) -> bool {
        self.inner.add_connection(connection)
    }

    /// Stop and forget a connection, including its stored row
    pub async fn remove_connection(
        &self,
        device_id: &DeviceId,
    ) -> Result<Option<Connection>, CollectorError> {
        let removed = self.inner.cache.remove_connection(device_id);
        self.inner.deactivate(device_id);
        self.inner.store.delete_connection(device_id).await?;
        if removed.is_some() {
            info!(%device_id, "Connection removed");
        }
        Ok(removed)
    }

    pub fn connection_state(&self, device_id: &DeviceId) -> Option<ConnectionState> {
        self.inner
            .connections
            .get(device_id)
            .map(|connection| connection.state())
    }

    /// Number of running device connections
    pub fn active_count(&self) -> usize {
        self.inner.connections.len()
    }
}

impl Inner {
    fn add_connection(&self, connection: Connection) -> bool {
        let device_id = connection.device_id().clone();
        let enabled = connection.enabled;
        let replaced = self
            .cache
            .connection(&device_id)
            .is_some_and(|previous| previous != connection);
        self.cache.add_connection(connection.clone());

        // A session keeps the settings it was started with
        if !enabled || replaced {
            self.deactivate(&device_id);
        }
        if !enabled {
            return false;
        }
        self.queue.add(connection)
    }

    /// Start the session for a connection leaving the queue
    fn activate(&self, connection: Connection) {
        let device_id = connection.device_id().clone();
        if self.connections.contains_key(&device_id) {
            debug!(%device_id, "Connection already active");
            return;
        }

        let (tx, mut rx) = mpsc::channel(self.settings.event_channel_capacity.max(1));
        let session = Arc::new(DeviceConnection::new(
            connection,
            self.settings.connection_settings(),
            tx,
        ));
        if let Err(e) = session.start() {
            warn!(%device_id, error = %e, "Failed to start device connection");
            self.queue.forget(&device_id);
            return;
        }
        self.connections.insert(device_id, session);

        // Ends once the session and its readers have dropped their senders
        let cache = self.cache.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                cache.apply(event);
            }
        });
    }

    fn deactivate(&self, device_id: &DeviceId) {
        self.queue.forget(device_id);
        if let Some((_, session)) = self.connections.remove(device_id) {
            session.stop();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
        for entry in self.connections.iter() {
            entry.value().stop();
        }
    }
}

async fn activation_loop(
    inner: Weak<Inner>,
    mut activations: mpsc::Receiver<QueueEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = activations.recv() => event,
        };
        let Some(QueueEvent::ConnectionStarted(connection)) = event else {
            break;
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.activate(connection);
    }
    debug!("Activation loop finished");
}

async fn discovery_loop(
    inner: Weak<Inner>,
    mut events: mpsc::Receiver<FinderEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        let Some(event) = event else {
            break;
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match event {
            FinderEvent::DeviceFound(device) => {
                let connection = Connection::from_discovered(&device);
                // A stored connection keeps its settings, disabled included
                if inner.cache.connection(connection.device_id()).is_none() {
                    info!(
                        device_id = %connection.device_id(),
                        address = %device.address,
                        port = device.port,
                        device = %device.device_name,
                        "Adding discovered device"
                    );
                    inner.add_connection(connection);
                }
            }
            FinderEvent::SearchCompleted {
                elapsed,
                found_count,
            } => {
                debug!(
                    found = found_count,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Device search completed"
                );
            }
        }
    }
    debug!("Discovery loop finished");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mtc_cache::EventFilterEngine;
    use mtc_core::MemoryStore;
    use pretty_assertions::assert_eq;

    use super::*;

    fn config(devices: &str) -> CollectorConfig {
        let text = format!(
            "[server]\nprefixes = [\"http://127.0.0.1:0/\"]\n[collector]\nactivation_delay_ms = 10\n{}",
            devices
        );
        CollectorConfig::from_toml(&text).unwrap()
    }

    fn collector(config: &CollectorConfig) -> Collector {
        let cache = Arc::new(TelemetryCache::new(Arc::new(EventFilterEngine::builtin().unwrap())));
        Collector::new(config, cache, Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let collector = collector(&config(""));
        collector.start().unwrap();
        assert!(matches!(
            collector.start(),
            Err(CollectorError::AlreadyRunning)
        ));
        collector.stop();
        collector.stop();
        assert!(!collector.is_running());
    }

    #[tokio::test]
    async fn test_disabled_devices_are_recorded_not_started() {
        let collector = collector(&config(
            "[[devices]]\naddress = \"127.0.0.1\"\nport = 1\ndevice_name = \"Off\"\nenabled = false\n",
        ));
        collector.start().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(collector.cache().connections().len(), 1);
        assert_eq!(collector.active_count(), 0);
        collector.stop();
    }

    #[tokio::test]
    async fn test_remove_connection_stops_session() {
        let collector = collector(&config(
            "[[devices]]\naddress = \"127.0.0.1\"\nport = 1\ndevice_name = \"Gone\"\n",
        ));
        collector.start().unwrap();
        let id = collector.cache().connections()[0].device_id().clone();

        let started = mtc_client::testing::wait_for(
            || collector.active_count() == 1,
            Duration::from_secs(5),
        )
        .await;
        assert!(started);

        let removed = collector.remove_connection(&id).await.unwrap();
        assert!(removed.is_some());
        assert_eq!(collector.active_count(), 0);
        assert!(collector.connection_state(&id).is_none());
        assert!(collector.cache().connection(&id).is_none());
        collector.stop();
    }

    #[tokio::test]
    async fn test_replacing_connection_restarts_session() {
        use mtc_client::testing::{wait_for, MockAgent, MockDevice};

        let agent = MockAgent::start(MockDevice::cnc("Mill")).await.unwrap();
        agent.push("avail", "AVAILABLE");
        let collector = collector(&config(""));
        collector.start().unwrap();

        let wrong = Connection::new("127.0.0.2", agent.port(), Some("Mill".into()), None)
            .with_interval_ms(50);
        let id = wrong.device_id().clone();
        assert!(collector.add_connection(wrong));
        let started = wait_for(|| collector.active_count() == 1, Duration::from_secs(5)).await;
        assert!(started);

        let fixed = Connection::new("127.0.0.1", agent.port(), Some("Mill".into()), None)
            .with_interval_ms(50);
        assert_eq!(fixed.device_id(), &id);
        assert!(collector.add_connection(fixed.clone()));
        assert_eq!(collector.cache().connection(&id), Some(fixed.clone()));

        let connected = wait_for(
            || {
                collector
                    .cache()
                    .latest_status(&id)
                    .is_some_and(|s| s.connected && s.available)
            },
            Duration::from_secs(5),
        )
        .await;
        assert!(connected);
        assert_eq!(collector.active_count(), 1);

        // The same settings again leave the running session alone
        assert!(!collector.add_connection(fixed));
        assert_eq!(collector.active_count(), 1);
        collector.stop();
    }
}
