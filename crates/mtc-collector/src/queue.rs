//! Rate-limited connection activation

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mtc_core::{Connection, DeviceId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events reported by a running queue
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    /// The connection left the queue and should be started now
    ConnectionStarted(Connection),
}

#[derive(Default)]
struct Pending {
    /// Queued connections with their arrival order
    queued: DashMap<DeviceId, (u64, Connection)>,
    /// Ids handed out already; re-adding them is a no-op
    started: DashMap<DeviceId, ()>,
    next_seq: AtomicU64,
}

impl Pending {
    /// Remove and return the oldest queued connection
    fn pop(&self) -> Option<Connection> {
        loop {
            let oldest = self
                .queued
                .iter()
                .min_by_key(|entry| entry.value().0)
                .map(|entry| entry.key().clone())?;
            // Lost a race with `forget`; look again
            if let Some((id, (_, connection))) = self.queued.remove(&oldest) {
                self.started.insert(id, ());
                return Some(connection);
            }
        }
    }
}

/// Starts queued connections one per tick.
///
/// Many devices found or configured at once would otherwise all connect at
/// the same moment. `add` can be called from any task; a device id is
/// started at most once until [`forget`](Self::forget) is called for it.
pub struct ConnectionActivationQueue {
    pending: Arc<Pending>,
    delay: Duration,
    cancel: Mutex<Option<CancellationToken>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionActivationQueue {
    pub fn new(delay: Duration) -> Self {
        Self {
            pending: Arc::new(Pending::default()),
            delay: delay.max(Duration::from_millis(1)),
            cancel: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    /// Queue a connection. Returns false if the device is already queued
    /// or was started before.
    pub fn add(&self, connection: Connection) -> bool {
        let id = connection.device_id().clone();
        if self.pending.started.contains_key(&id) {
            return false;
        }
        match self.pending.queued.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let seq = self.pending.next_seq.fetch_add(1, Ordering::SeqCst);
                debug!(device_id = %slot.key(), "Connection queued");
                slot.insert((seq, connection));
                true
            }
        }
    }

    /// Drop a device from the queue and from the started set, so a later
    /// `add` activates it again
    pub fn forget(&self, device_id: &DeviceId) {
        self.pending.queued.remove(device_id);
        self.pending.started.remove(device_id);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.queued.len()
    }

    /// Start the timer loop. Started connections arrive on the returned
    /// channel; it closes when the queue stops.
    pub fn start(&self) -> mpsc::Receiver<QueueEvent> {
        self.stop();

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let pending = self.pending.clone();
        let delay = self.delay;
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(delay);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(connection) = pending.pop() else {
                    continue;
                };
                info!(device_id = %connection.device_id(), "Activating connection");
                if tx.send(QueueEvent::ConnectionStarted(connection)).await.is_err() {
                    break;
                }
            }
            debug!("Activation queue finished");
        });

        *self.cancel.lock() = Some(cancel);
        *self.handle.lock() = Some(handle);
        rx
    }

    pub fn stop(&self) {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
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

impl Drop for ConnectionActivationQueue {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
    }
}
