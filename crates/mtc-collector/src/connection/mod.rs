//! Device connection: one MTConnect agent session per device
//!
//! A session is a poll loop plus two readers:
//!
//! - the poll loop probes the agent, then requests `current` at the
//!   connection's interval. It owns the Connected/Available status and
//!   re-probes whenever the agent instance changes.
//! - the sample reader follows `nextSequence` through `sample` requests.
//! - the asset reader polls `assets` at a coarse interval.
//!
//! Transport errors never end the session; the poll loop retries at its
//! interval until [`DeviceConnection::stop`] is called.

mod mapping;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mtc_client::{AgentClient, AgentClientError, StreamsDocument};
use mtc_core::{Connection, DeviceId, Status, TelemetryEvent};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CollectorError;

const AVAILABLE: &str = "AVAILABLE";

/// Agent instance ids start at 1; 0 means no probe has succeeded yet
const NO_INSTANCE: u64 = 0;

/// Timing and batching of a device session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Unconditional status re-emit cadence
    pub status_refresh: Duration,
    pub asset_interval: Duration,
    /// `count` of each `sample` request
    pub sample_count: u32,
    pub request_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            status_refresh: Duration::from_secs(10),
            asset_interval: Duration::from_secs(30),
            sample_count: 1000,
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Observable state of a device session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Stopped,
    /// Probing, or retrying after a transport error
    Connecting,
    /// Structure known, `current` answering
    Polling,
    /// Sample reader following the agent's sequence
    Streaming,
}

/// Session with the MTConnect agent serving one device.
///
/// Every event goes out on the `events` channel, structural events of a
/// probe before the samples that refer to them.
pub struct DeviceConnection {
    connection: Connection,
    settings: ConnectionSettings,
    events: mpsc::Sender<TelemetryEvent>,
    state: Arc<RwLock<ConnectionState>>,
    cancel: Mutex<Option<CancellationToken>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceConnection {
    pub fn new(
        connection: Connection,
        settings: ConnectionSettings,
        events: mpsc::Sender<TelemetryEvent>,
    ) -> Self {
        Self {
            connection,
            settings,
            events,
            state: Arc::new(RwLock::new(ConnectionState::Stopped)),
            cancel: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn device_id(&self) -> &DeviceId {
        self.connection.device_id()
    }

    /// Begin the session. Fails only if the agent URL is unusable or the
    /// session is already running.
    pub fn start(&self) -> Result<(), CollectorError> {
        if self.is_running() {
            return Err(CollectorError::AlreadyRunning);
        }

        let client = AgentClient::with_timeout(
            &self.connection.agent_url(),
            self.connection.device_name(),
            self.settings.request_timeout,
        )?;
        let cancel = CancellationToken::new();

        let session = Session {
            shared: Arc::new(Shared {
                device_id: self.connection.device_id().clone(),
                device_name: self.connection.device_name().map(str::to_string),
                client,
                events: self.events.clone(),
                state: self.state.clone(),
                instance: AtomicU64::new(NO_INSTANCE),
                needs_probe: AtomicBool::new(true),
            }),
            settings: self.settings.clone(),
            interval: Duration::from_millis(self.connection.interval_ms.max(1)),
            cancel: cancel.clone(),
        };

        info!(
            device_id = %self.connection.device_id(),
            url = %self.connection.agent_url(),
            "Starting device connection"
        );
        set_state(&self.state, ConnectionState::Connecting);
        let handle = tokio::spawn(session.run());

        *self.cancel.lock() = Some(cancel);
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    /// Cancel the poll loop, both readers and any request in flight.
    /// Idempotent.
    pub fn stop(&self) {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
            info!(device_id = %self.connection.device_id(), "Device connection stopped");
        }
        self.handle.lock().take();
        *self.state.write() = ConnectionState::Stopped;
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for DeviceConnection {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
    }
}

fn set_state(state: &RwLock<ConnectionState>, next: ConnectionState) {
    let mut current = state.write();
    if *current != next {
        debug!(from = ?*current, to = ?next, "Connection state");
        *current = next;
    }
}

/// State shared by the poll loop and the readers
struct Shared {
    device_id: DeviceId,
    device_name: Option<String>,
    client: AgentClient,
    events: mpsc::Sender<TelemetryEvent>,
    state: Arc<RwLock<ConnectionState>>,
    /// Instance id of the last successful probe
    instance: AtomicU64,
    needs_probe: AtomicBool,
}

impl Shared {
    async fn emit(&self, event: TelemetryEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    fn instance(&self) -> u64 {
        self.instance.load(Ordering::SeqCst)
    }

    /// Check a streams document against the probed instance. A mismatch
    /// schedules a re-probe and the document must be dropped.
    fn accepts(&self, doc: &StreamsDocument) -> bool {
        let current = self.instance();
        if doc.header.instance_id == current {
            return true;
        }
        if current != NO_INSTANCE && !self.needs_probe.swap(true, Ordering::SeqCst) {
            info!(
                device_id = %self.device_id,
                previous = current,
                instance_id = doc.header.instance_id,
                "Agent instance changed"
            );
        }
        false
    }

    async fn emit_samples(&self, doc: &StreamsDocument) -> bool {
        let Some(stream) = doc.stream_for(self.device_name.as_deref()) else {
            return true;
        };
        let samples = mapping::samples(&self.device_id, doc.header.instance_id, stream);
        if samples.is_empty() {
            return true;
        }
        self.emit(TelemetryEvent::Samples(samples)).await
    }
}

struct Session {
    shared: Arc<Shared>,
    settings: ConnectionSettings,
    interval: Duration,
    cancel: CancellationToken,
}

impl Session {
    async fn run(self) {
        let mut availability_id: Option<String> = None;
        let mut last_status: Option<(bool, bool)> = None;
        let mut last_emit = tokio::time::Instant::now();
        let mut readers_started = false;

        loop {
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => break,
                outcome = self.poll(&mut availability_id) => outcome,
            };

            let (connected, available) = match outcome {
                Ok(available) => {
                    if !readers_started {
                        self.spawn_readers();
                        readers_started = true;
                    }
                    (true, available)
                }
                Err(e) => {
                    if e.is_transport() {
                        debug!(device_id = %self.shared.device_id, error = %e, "Agent unreachable");
                    } else {
                        warn!(device_id = %self.shared.device_id, error = %e, "Unusable agent response");
                    }
                    set_state(&self.shared.state, ConnectionState::Connecting);
                    (false, false)
                }
            };

            let changed = last_status != Some((connected, available));
            if changed || last_emit.elapsed() >= self.settings.status_refresh {
                let status = Status {
                    device_id: self.shared.device_id.clone(),
                    connected,
                    available,
                    agent_instance_id: connected.then(|| self.shared.instance()),
                    timestamp: Utc::now(),
                };
                if changed {
                    info!(
                        device_id = %self.shared.device_id,
                        connected,
                        available,
                        "Device status changed"
                    );
                }
                if !self.shared.emit(TelemetryEvent::Status(status)).await {
                    break;
                }
                last_status = Some((connected, available));
                last_emit = tokio::time::Instant::now();
            }

            // An instance change seen by `current` is handled right away
            if connected && self.shared.needs_probe.load(Ordering::SeqCst) {
                continue;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        let _ = self
            .shared
            .events
            .try_send(TelemetryEvent::Status(Status::disconnected(
                self.shared.device_id.clone(),
            )));
        set_state(&self.shared.state, ConnectionState::Stopped);
        debug!(device_id = %self.shared.device_id, "Poll loop finished");
    }

    /// One poll iteration: probe if needed, then `current`. A `current`
    /// from a new instance triggers one re-probe within the same iteration.
    /// Returns whether the device reports itself available.
    async fn poll(&self, availability_id: &mut Option<String>) -> Result<bool, AgentClientError> {
        let mut attempts = 0;
        let doc = loop {
            if self.shared.needs_probe.load(Ordering::SeqCst) {
                set_state(&self.shared.state, ConnectionState::Connecting);
                *availability_id = self.probe().await?;
            }
            let doc = self.shared.client.current().await?;
            if self.shared.accepts(&doc) {
                break doc;
            }
            attempts += 1;
            if attempts == 2 {
                return Ok(false);
            }
        };
        self.shared.emit_samples(&doc).await;

        {
            let mut state = self.shared.state.write();
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Polling;
            }
        }

        // A device without an AVAILABILITY item never reports itself available
        let available = availability_id.as_deref().is_some_and(|id| {
            doc.stream_for(self.shared.device_name.as_deref())
                .and_then(|stream| stream.latest(id))
                .is_some_and(|observation| observation.value == AVAILABLE)
        });
        Ok(available)
    }

    /// Fetch the structure and emit it. Returns the AVAILABILITY item id.
    async fn probe(&self) -> Result<Option<String>, AgentClientError> {
        let doc = self.shared.client.probe().await?;
        let Some(device) = mapping::select_device(&doc, self.shared.device_name.as_deref()) else {
            return Err(AgentClientError::ParseError(format!(
                "device {:?} not served by agent",
                self.shared.device_name
            )));
        };

        info!(
            device_id = %self.shared.device_id,
            device = %device.name,
            instance_id = doc.header.instance_id,
            version = %doc.header.version,
            "Probed agent"
        );

        // Readers keep dropping documents of the new instance until its
        // structure is on the channel
        for event in mapping::structure(&self.shared.device_id, &doc.header, device) {
            self.shared.emit(event).await;
        }
        self.shared
            .instance
            .store(doc.header.instance_id, Ordering::SeqCst);
        self.shared.needs_probe.store(false, Ordering::SeqCst);

        Ok(mapping::availability_id(device))
    }

    fn spawn_readers(&self) {
        let samples = SampleReader {
            shared: self.shared.clone(),
            count: self.settings.sample_count.max(1),
            interval: self.interval,
            cancel: self.cancel.child_token(),
        };
        tokio::spawn(samples.run());

        let assets = AssetReader {
            shared: self.shared.clone(),
            interval: self.settings.asset_interval,
            cancel: self.cancel.child_token(),
        };
        tokio::spawn(assets.run());
    }
}

/// Follows the agent's sequence numbers through `sample` requests
struct SampleReader {
    shared: Arc<Shared>,
    count: u32,
    interval: Duration,
    cancel: CancellationToken,
}

impl SampleReader {
    async fn run(self) {
        let mut from: Option<u64> = None;

        loop {
            let full_batch = tokio::select! {
                _ = self.cancel.cancelled() => break,
                full = self.read(&mut from) => full,
            };
            if full_batch {
                continue;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        debug!(device_id = %self.shared.device_id, "Sample reader finished");
    }

    /// One request. Returns true when the agent had more than one batch
    /// waiting, so the next request should go out immediately.
    async fn read(&self, from: &mut Option<u64>) -> bool {
        if self.shared.needs_probe.load(Ordering::SeqCst) {
            *from = None;
            return false;
        }

        let start = match *from {
            Some(start) => start,
            None => match self.shared.client.current().await {
                Ok(doc) if self.shared.accepts(&doc) => match doc.header.next_sequence {
                    Some(next) => {
                        *from = Some(next);
                        next
                    }
                    None => return false,
                },
                Ok(_) => return false,
                Err(e) => {
                    debug!(device_id = %self.shared.device_id, error = %e, "current failed");
                    return false;
                }
            },
        };

        match self.shared.client.sample(start, self.count).await {
            Ok(doc) => {
                if !self.shared.accepts(&doc) {
                    *from = None;
                    return false;
                }
                {
                    let mut state = self.shared.state.write();
                    if *state == ConnectionState::Polling {
                        *state = ConnectionState::Streaming;
                    }
                }

                let received = doc
                    .stream_for(self.shared.device_name.as_deref())
                    .map_or(0, |stream| stream.observations.len());
                self.shared.emit_samples(&doc).await;
                if let Some(next) = doc.header.next_sequence {
                    *from = Some(next);
                }
                received >= self.count as usize
            }
            Err(e) if e.is_out_of_range() => {
                info!(
                    device_id = %self.shared.device_id,
                    from = start,
                    "Sequence left the agent buffer, resuming from current"
                );
                *from = None;
                false
            }
            Err(e) => {
                debug!(device_id = %self.shared.device_id, error = %e, "sample failed");
                false
            }
        }
    }
}

/// Polls the `assets` verb
struct AssetReader {
    shared: Arc<Shared>,
    interval: Duration,
    cancel: CancellationToken,
}

impl AssetReader {
    async fn run(self) {
        loop {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.shared.client.assets() => result,
            };
            match result {
                Ok(doc) => {
                    let assets = mapping::assets(&self.shared.device_id, &doc);
                    if !assets.is_empty() && !self.shared.emit(TelemetryEvent::Assets(assets)).await {
                        break;
                    }
                }
                Err(e) => debug!(device_id = %self.shared.device_id, error = %e, "assets failed"),
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        debug!(device_id = %self.shared.device_id, "Asset reader finished");
    }
}
