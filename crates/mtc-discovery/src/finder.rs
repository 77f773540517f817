//! Device finder: repeated ping / port / probe scans of one interface

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mtc_core::DiscoveredDevice;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DiscoveryError;
use crate::network::{NetworkProbe, SystemNetwork};
use crate::ping::PingSweeper;
use crate::scope::{NetworkInterfaceScope, ResolvedScope};

/// Capacity of the event channel returned by [`DeviceFinder::start`]
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events reported by a running finder
#[derive(Debug, Clone, PartialEq)]
pub enum FinderEvent {
    /// A probe answered with this device
    DeviceFound(DiscoveredDevice),
    /// Every dispatched port/probe attempt of a scan has finished
    SearchCompleted { elapsed: Duration, found_count: usize },
}

/// Scans one network interface for MTConnect agents.
///
/// `start` resolves the scope (reporting configuration errors to the
/// caller) and spawns the scan loop. `stop` cancels in-flight pings,
/// connects and probes as well as the rescan timer; it is idempotent.
pub struct DeviceFinder {
    network: Arc<dyn NetworkProbe>,
    cancel: Mutex<Option<CancellationToken>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceFinder {
    pub fn new() -> Self {
        Self::with_network(Arc::new(SystemNetwork))
    }

    pub fn with_network(network: Arc<dyn NetworkProbe>) -> Self {
        Self {
            network,
            cancel: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    /// Begin scanning. Events arrive on the returned channel until the
    /// finder stops; the channel closes when it does.
    pub fn start(
        &self,
        scope: NetworkInterfaceScope,
    ) -> Result<mpsc::Receiver<FinderEvent>, DiscoveryError> {
        if self.is_running() {
            return Err(DiscoveryError::AlreadyRunning);
        }

        let resolved = scope.resolve()?;
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let worker = ScanWorker {
            network: self.network.clone(),
            scope,
            cancel: cancel.clone(),
            events: tx,
        };
        let handle = tokio::spawn(worker.run(resolved));

        *self.cancel.lock() = Some(cancel);
        *self.handle.lock() = Some(handle);
        Ok(rx)
    }

    pub fn stop(&self) {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
            info!("Device finder stopped");
        }
        self.handle.lock().take();
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Default for DeviceFinder {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DeviceFinder {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
    }
}

struct ScanWorker {
    network: Arc<dyn NetworkProbe>,
    scope: NetworkInterfaceScope,
    cancel: CancellationToken,
    events: mpsc::Sender<FinderEvent>,
}

impl ScanWorker {
    async fn run(self, mut resolved: ResolvedScope) {
        loop {
            info!(
                interface = self.scope.label(),
                addresses = resolved.addresses.len(),
                ports = resolved.ports.len(),
                "Searching for MTConnect devices"
            );

            let Some(completed) = self.scan(&resolved).await else {
                break;
            };
            if self.events.send(completed).await.is_err() {
                break;
            }

            if self.scope.scan_interval_ms == 0 {
                break;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_millis(self.scope.scan_interval_ms)) => {}
            }

            match self.scope.resolve() {
                Ok(next) => resolved = next,
                Err(e) => warn!(error = %e, "Keeping previous scan range"),
            }
        }
        debug!(interface = self.scope.label(), "Scan loop finished");
    }

    /// One scan cycle. Returns the completion event, or `None` when the scan
    /// was cancelled or nobody is listening any more.
    async fn scan(&self, resolved: &ResolvedScope) -> Option<FinderEvent> {
        let started = tokio::time::Instant::now();
        let timeout = Duration::from_millis(self.scope.timeout_ms);

        let responsive = if self.scope.ping_enabled {
            let sweeper = PingSweeper::new(
                self.network.clone(),
                Duration::from_millis(self.scope.ping_delay_ms),
                timeout,
            );
            sweeper.sweep(&resolved.addresses, &self.cancel).await
        } else {
            resolved.addresses.clone()
        };
        if self.cancel.is_cancelled() {
            return None;
        }
        debug!(responsive = responsive.len(), "Ping sweep finished");

        let limit = Arc::new(Semaphore::new(self.scope.max_concurrent_probes.max(1)));
        let mut attempts = JoinSet::new();
        for &address in &responsive {
            for &port in &resolved.ports {
                let network = self.network.clone();
                let limit = limit.clone();
                attempts.spawn(async move {
                    let _permit = limit.acquire_owned().await.ok()?;
                    probe_endpoint(network.as_ref(), address, port, timeout).await
                });
            }
        }

        let mut seen: HashSet<(IpAddr, u16, String)> = HashSet::new();
        loop {
            let joined = tokio::select! {
                _ = self.cancel.cancelled() => {
                    attempts.abort_all();
                    return None;
                }
                joined = attempts.join_next() => joined,
            };
            let Some(result) = joined else { break };
            let Ok(Some(devices)) = result else { continue };

            for device in devices {
                let key = (device.address, device.port, device.device_name.clone());
                if !seen.insert(key) {
                    continue;
                }
                info!(
                    address = %device.address,
                    port = device.port,
                    device = %device.device_name,
                    "MTConnect device found"
                );
                if self.events.send(FinderEvent::DeviceFound(device)).await.is_err() {
                    return None;
                }
            }
        }

        let elapsed = started.elapsed();
        info!(found = seen.len(), elapsed_ms = elapsed.as_millis() as u64, "Search completed");
        Some(FinderEvent::SearchCompleted {
            elapsed,
            found_count: seen.len(),
        })
    }
}

/// Port check followed by a probe; one device per name in the response
async fn probe_endpoint(
    network: &dyn NetworkProbe,
    address: IpAddr,
    port: u16,
    timeout: Duration,
) -> Option<Vec<DiscoveredDevice>> {
    if !network.port_open(address, port, timeout).await {
        return None;
    }
    let names = network.probe(address, port, timeout).await?;
    let mac_address = network.mac_address(address).await;
    let discovered_at = Utc::now();

    Some(
        names
            .into_iter()
            .map(|device_name| DiscoveredDevice {
                address,
                port,
                mac_address: mac_address.clone(),
                device_name,
                discovered_at,
            })
            .collect(),
    )
}
