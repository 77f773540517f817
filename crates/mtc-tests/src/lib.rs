//! End-to-end tests for the MTConnect data collector
//!
//! These tests run the real collector against in-process mock agents
//! (`mtc_client::testing::MockAgent`) on 127.0.0.1:
//!
//! - `collect_e2e.rs` - configured devices: status, samples, agent restarts
//! - `discovery_e2e.rs` - device finder feeding the activation queue
//! - `backup_e2e.rs` - backup to SQLite and restore on the next start
//! - `api_e2e.rs` - the HTTP facade over a live collector
//!
//! The helpers below build the pieces every test needs.

use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mtc_cache::{EventFilterEngine, TelemetryCache};
use mtc_collector::CollectorConfig;
use mtc_discovery::NetworkProbe;

/// Cache with the built-in trigger rules
pub fn new_cache() -> Arc<TelemetryCache> {
    Arc::new(TelemetryCache::new(Arc::new(
        EventFilterEngine::builtin().expect("built-in trigger rules"),
    )))
}

/// Config with fast timings and one listener prefix on an ephemeral port,
/// followed by `extra` TOML
pub fn config(extra: &str) -> CollectorConfig {
    let text = format!(
        r#"
[server]
prefixes = ["http://127.0.0.1:0/"]

[collector]
activation_delay_ms = 10
status_refresh_ms = 200
asset_interval_ms = 100
request_timeout_ms = 1000

{}
"#,
        extra
    );
    CollectorConfig::from_toml(&text).expect("valid test config")
}

/// A `[[devices]]` entry for a mock agent serving `device_name`
pub fn device_entry(port: u16, device_name: &str) -> String {
    format!(
        "[[devices]]\naddress = \"127.0.0.1\"\nport = {}\ndevice_name = \"{}\"\ninterval_ms = 50\n",
        port, device_name
    )
}

/// Network where every address answers and `port` serves `names`
pub struct FakeNetwork {
    pub port: u16,
    pub names: Vec<String>,
    pub mac_address: Option<String>,
}

#[async_trait]
impl NetworkProbe for FakeNetwork {
    async fn ping(&self, _address: IpAddr, _timeout: Duration) -> io::Result<bool> {
        Ok(true)
    }

    async fn port_open(&self, _address: IpAddr, port: u16, _timeout: Duration) -> bool {
        port == self.port
    }

    async fn probe(&self, _address: IpAddr, port: u16, _timeout: Duration) -> Option<Vec<String>> {
        (port == self.port).then(|| self.names.clone())
    }

    async fn mac_address(&self, _address: IpAddr) -> Option<String> {
        self.mac_address.clone()
    }
}
