//! Backup to SQLite and restore on the next start

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mtc_cache::{BackupConfig, BackupScheduler};
use mtc_client::testing::{wait_for, MockAgent, MockDevice};
use mtc_collector::Collector;
use mtc_core::{Connection, DeviceId};
use mtc_store::SqliteStore;
use mtc_tests::{config, device_entry, new_cache};
use pretty_assertions::assert_eq;

const TIMEOUT: Duration = Duration::from_secs(5);

fn device_id(agent: &MockAgent) -> DeviceId {
    Connection::new("127.0.0.1", agent.port(), Some("Mill".into()), None)
        .device_id()
        .clone()
}

fn values(cache: &mtc_cache::TelemetryCache, id: &DeviceId, item: &str) -> Vec<String> {
    let to = Utc::now();
    let from = to - chrono::Duration::hours(1);
    cache
        .samples(id, from, to)
        .into_iter()
        .filter(|s| s.id == item)
        .map(|s| s.value)
        .collect()
}

#[tokio::test]
async fn test_backup_then_restore_on_next_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mtc.db");

    let agent = MockAgent::start(MockDevice::cnc("Mill")).await.unwrap();
    agent.push("avail", "AVAILABLE");
    agent.push("exec", "ACTIVE");
    let id = device_id(&agent);

    // First run: collect, back up, shut down
    {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let cache = new_cache();
        let collector = Collector::new(
            &config(&device_entry(agent.port(), "Mill")),
            cache.clone(),
            store.clone(),
        );
        collector.start().unwrap();

        let collected = wait_for(
            || cache.latest_sample(&id, "exec").is_some_and(|s| s.value == "ACTIVE"),
            TIMEOUT,
        )
        .await;
        assert!(collected);
        agent.push("exec", "READY");
        let collected = wait_for(
            || cache.latest_sample(&id, "exec").is_some_and(|s| s.value == "READY"),
            TIMEOUT,
        )
        .await;
        assert!(collected);
        collector.stop();
        // let the dispatcher apply the final status
        tokio::time::sleep(Duration::from_millis(200)).await;

        let scheduler = BackupScheduler::new(cache.clone(), store, BackupConfig::default());
        let report = scheduler.run_once().await.unwrap();
        assert!(report.definitions_written);
        assert!(report.samples_written >= 3);
        assert_eq!(cache.unflushed_count(), 0);

        // Nothing new: the next cycle writes nothing
        let report = scheduler.run_once().await.unwrap();
        assert!(!report.definitions_written);
        assert_eq!(report.samples_written, 0);
    }

    // Second run: a fresh cache restored from the same file
    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let cache = new_cache();
    let restored = cache.restore(store.as_ref()).await.unwrap();
    assert!(restored >= 3);
    assert_eq!(cache.unflushed_count(), 0);

    let connection = cache.connection(&id).unwrap();
    assert_eq!(connection.address(), "127.0.0.1");
    assert_eq!(connection.port(), agent.port());
    assert_eq!(cache.agent(&id).map(|a| a.instance_id), Some(1));
    let model = cache.device_model(&id).unwrap();
    assert_eq!(model.data_items.len(), 5);
    assert_eq!(values(&cache, &id, "exec"), vec!["ACTIVE", "READY"]);

    // The stored connection is not in the config but is activated again
    let collector = Collector::new(&config(""), cache.clone(), store);
    collector.start().unwrap();
    agent.push("exec", "STOPPED");
    let resumed = wait_for(
        || cache.latest_sample(&id, "exec").is_some_and(|s| s.value == "STOPPED"),
        TIMEOUT,
    )
    .await;
    assert!(resumed, "restored connection was not re-activated");
    assert_eq!(collector.active_count(), 1);
    collector.stop();
}

#[tokio::test]
async fn test_removed_connection_is_not_restored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mtc.db");

    let agent = MockAgent::start(MockDevice::cnc("Mill")).await.unwrap();
    agent.push("avail", "AVAILABLE");
    let id = device_id(&agent);

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let cache = new_cache();
    cache.add_connection(Connection::new("127.0.0.1", agent.port(), Some("Mill".into()), None));
    let scheduler = BackupScheduler::new(cache.clone(), store.clone(), BackupConfig::default());
    scheduler.run_once().await.unwrap();

    let collector = Collector::new(&config(""), cache.clone(), store.clone());
    let removed = collector.remove_connection(&id).await.unwrap();
    assert!(removed.is_some());
    drop(collector);
    drop(store);

    let store = SqliteStore::open(&path).unwrap();
    let restored = new_cache();
    restored.restore(&store).await.unwrap();
    assert!(restored.connection(&id).is_none());
}
