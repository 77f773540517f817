//! Periodic backup of the telemetry cache

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mtc_core::DurableStore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cache::TelemetryCache;
use crate::error::CacheError;

fn default_interval_ms() -> u64 {
    60_000
}

fn default_retention_secs() -> u64 {
    86_400
}

/// Backup cadence and retention window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Samples older than this are cut back to one per data item
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            retention_secs: default_retention_secs(),
        }
    }
}

impl BackupConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn retention(&self) -> chrono::Duration {
        // clamp to a century, far inside chrono's range
        let secs = self.retention_secs.min(100 * 365 * 86_400);
        chrono::Duration::seconds(secs as i64)
    }
}

/// Outcome of one backup cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackupReport {
    /// Connections, agents and structural definitions were rewritten
    pub definitions_written: bool,
    pub samples_written: usize,
    /// Rows removed from the store
    pub samples_deleted: u64,
    /// Samples dropped from memory
    pub samples_evicted: usize,
    /// Deletes that failed and will be retried
    pub failed_deletes: usize,
}

/// Runs [`TelemetryCache::backup`] on a fixed interval
pub struct BackupScheduler {
    cache: Arc<TelemetryCache>,
    store: Arc<dyn DurableStore>,
    config: BackupConfig,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackupScheduler {
    pub fn new(cache: Arc<TelemetryCache>, store: Arc<dyn DurableStore>, config: BackupConfig) -> Self {
        Self {
            cache,
            store,
            config,
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the backup loop. The first cycle runs one interval from now.
    /// Calling `start` on a running scheduler does nothing.
    pub fn start(&self) {
        let mut handle = self.handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) || self.cancel.is_cancelled() {
            return;
        }

        let cache = self.cache.clone();
        let store = self.store.clone();
        let config = self.config.clone();
        let cancel = self.cancel.clone();

        info!(
            interval_ms = config.interval_ms,
            retention_secs = config.retention_secs,
            "Starting backup scheduler"
        );
        *handle = Some(tokio::spawn(async move {
            let period = config.interval();
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                // a failed cycle leaves everything in memory for the next one
                let _ = run_cycle(&cache, store.as_ref(), &config).await;
            }
        }));
    }

    /// Stop the loop. Idempotent; a cycle in progress is abandoned at its
    /// next store call and its unfinished trims run in the next cycle.
    pub fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }

    /// Run one cycle now, independent of the loop
    pub async fn run_once(&self) -> Result<BackupReport, CacheError> {
        run_cycle(&self.cache, self.store.as_ref(), &self.config).await
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for BackupScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_cycle(
    cache: &TelemetryCache,
    store: &dyn DurableStore,
    config: &BackupConfig,
) -> Result<BackupReport, CacheError> {
    match cache.backup(store, Utc::now(), config.retention()).await {
        Ok(report) => {
            if report.samples_written > 0 || report.samples_deleted > 0 {
                info!(
                    written = report.samples_written,
                    deleted = report.samples_deleted,
                    evicted = report.samples_evicted,
                    "Backup complete"
                );
            }
            Ok(report)
        }
        Err(e) => {
            error!(error = %e, "Backup failed, retrying next cycle");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use mtc_core::{DeviceId, MemoryStore, Sample, TelemetryEvent};

    use super::*;
    use crate::filter::EventFilterEngine;

    fn sample(id: &str) -> Sample {
        Sample {
            device_id: DeviceId::derive("D1", 5000, None),
            id: id.into(),
            agent_instance_id: 1,
            sequence: 1,
            timestamp: Utc::now(),
            value: "1".into(),
            condition: None,
        }
    }

    #[test]
    fn test_config_defaults() {
        let config: BackupConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, BackupConfig::default());
        assert_eq!(config.interval(), Duration::from_secs(60));
        assert_eq!(config.retention(), chrono::Duration::hours(24));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_runs_on_interval() {
        let cache = Arc::new(TelemetryCache::new(Arc::new(EventFilterEngine::default())));
        let store = Arc::new(MemoryStore::new());
        let scheduler = BackupScheduler::new(
            cache.clone(),
            store.clone(),
            BackupConfig {
                interval_ms: 1_000,
                retention_secs: 3_600,
            },
        );
        cache.apply(TelemetryEvent::Samples(vec![sample("speed")]));
        scheduler.start();
        assert!(scheduler.is_running());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(cache.unflushed_count(), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(cache.unflushed_count(), 0);
        assert_eq!(store.sample_count(&DeviceId::derive("D1", 5000, None), "speed"), 1);

        scheduler.stop();
        scheduler.stop();
        tokio::task::yield_now().await;
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_run_once_reports_failure() {
        let cache = Arc::new(TelemetryCache::new(Arc::new(EventFilterEngine::default())));
        let store = Arc::new(MemoryStore::new());
        let scheduler = BackupScheduler::new(cache.clone(), store.clone(), BackupConfig::default());
        cache.apply(TelemetryEvent::Samples(vec![sample("speed")]));

        store.set_failing(true);
        assert!(scheduler.run_once().await.is_err());
        store.set_failing(false);
        assert_eq!(scheduler.run_once().await.unwrap().samples_written, 1);
    }
}
