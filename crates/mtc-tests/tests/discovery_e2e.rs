//! Device finders feeding the collector

use std::sync::Arc;
use std::time::Duration;

use mtc_client::testing::{wait_for, MockAgent, MockDevice};
use mtc_collector::Collector;
use mtc_core::{Connection, MemoryStore};
use mtc_discovery::{AddressRange, NetworkInterfaceScope};
use mtc_tests::{config, new_cache, FakeNetwork};
use pretty_assertions::assert_eq;

const TIMEOUT: Duration = Duration::from_secs(5);

fn finder_section(port: u16) -> String {
    format!(
        r#"
[device_finder]
enabled = true

[[device_finder.interfaces]]
interface_description = "loopback"
addresses = {{ allow = ["127.0.0.1"] }}
ports = {{ allow = [{}] }}
ping_enabled = false
scan_interval_ms = 0
"#,
        port
    )
}

#[tokio::test]
async fn test_discovered_device_is_activated() {
    let agent = MockAgent::start(MockDevice::cnc("Mill")).await.unwrap();
    agent.push("avail", "AVAILABLE");

    let network = Arc::new(FakeNetwork {
        port: agent.port(),
        names: vec!["Mill".into()],
        mac_address: None,
    });
    let cache = new_cache();
    let collector = Collector::with_network(
        &config(&finder_section(agent.port())),
        cache.clone(),
        Arc::new(MemoryStore::new()),
        network,
    );
    collector.start().unwrap();

    let id = Connection::new("127.0.0.1", agent.port(), Some("Mill".into()), None)
        .device_id()
        .clone();
    let online = wait_for(
        || cache.latest_status(&id).is_some_and(|s| s.connected),
        TIMEOUT,
    )
    .await;
    assert!(online, "discovered device was never connected");

    let connection = cache.connection(&id).unwrap();
    assert_eq!(connection.address(), "127.0.0.1");
    assert_eq!(connection.device_name(), Some("Mill"));
    assert_eq!(collector.active_count(), 1);
    collector.stop();
}

#[tokio::test]
async fn test_disabled_stored_connection_is_not_activated_by_discovery() {
    let agent = MockAgent::start(MockDevice::cnc("Mill")).await.unwrap();
    let network = Arc::new(FakeNetwork {
        port: agent.port(),
        names: vec!["Mill".into()],
        mac_address: None,
    });

    let cache = new_cache();
    let disabled = Connection::new("127.0.0.1", agent.port(), Some("Mill".into()), None)
        .with_enabled(false);
    let id = disabled.device_id().clone();
    cache.add_connection(disabled);

    let collector = Collector::with_network(
        &config(&finder_section(agent.port())),
        cache.clone(),
        Arc::new(MemoryStore::new()),
        network,
    );
    collector.start().unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(collector.active_count(), 0);
    assert!(!cache.connection(&id).unwrap().enabled);
    assert_eq!(agent.request_count("probe"), 0);
    collector.stop();
}

#[tokio::test]
async fn test_invalid_scope_fails_start() {
    let cache = new_cache();
    let mut config = config("");
    config.device_finder.enabled = true;
    config.device_finder.interfaces.push(NetworkInterfaceScope {
        addresses: Some(AddressRange::between("10.0.0.9", "not-an-address")),
        ..Default::default()
    });

    let collector = Collector::new(&config, cache, Arc::new(MemoryStore::new()));
    assert!(collector.start().is_err());
    assert!(!collector.is_running());
}
