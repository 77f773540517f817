//! Collector configuration document (TOML)
//!
//! ```toml
//! [server]
//! prefixes = ["http://+:8080/"]
//!
//! [collector]
//! activation_delay_ms = 1000
//!
//! [backup]
//! interval_ms = 60000
//! retention_secs = 86400
//! database = "/var/lib/mtcd/telemetry.db"
//!
//! [device_finder]
//! enabled = true
//!
//! [[device_finder.interfaces]]
//! interface_id = "eth0"
//! addresses = { minimum = "192.168.1.1", maximum = "192.168.1.254" }
//! ports = { minimum = 5000, maximum = 5010 }
//! scan_interval_ms = 300000
//!
//! [[devices]]
//! address = "192.168.1.20"
//! port = 5000
//! device_name = "VMC-3Axis"
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use mtc_cache::BackupConfig;
use mtc_core::{Connection, DEFAULT_AGENT_PORT, DEFAULT_POLL_INTERVAL_MS};
use mtc_discovery::NetworkInterfaceScope;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::connection::ConnectionSettings;
use crate::error::ConfigError;

/// The whole configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectorConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub collector: CollectorSettings,
    #[serde(default)]
    pub backup: StorageConfig,
    #[serde(default)]
    pub triggers: TriggersConfig,
    #[serde(default)]
    pub device_finder: DeviceFinderConfig,
    /// Connections known up front
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

impl CollectorConfig {
    /// Parse and validate a document
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Check everything that can be checked before starting
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.prefixes.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one server prefix is required".into(),
            ));
        }
        self.server.listeners()?;

        if self.collector.activation_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "collector.activation_delay_ms must be greater than 0".into(),
            ));
        }
        if self.collector.event_channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "collector.event_channel_capacity must be greater than 0".into(),
            ));
        }
        if self.backup.schedule.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "backup.interval_ms must be greater than 0".into(),
            ));
        }

        if self.device_finder.enabled {
            for scope in &self.device_finder.interfaces {
                scope.resolve().map_err(|e| {
                    ConfigError::Invalid(format!("device finder '{}': {}", scope.label(), e))
                })?;
            }
        }

        for (index, device) in self.devices.iter().enumerate() {
            device
                .validate()
                .map_err(|msg| ConfigError::Invalid(format!("devices[{}]: {}", index, msg)))?;
        }
        Ok(())
    }
}

// =============================================================================
// Server
// =============================================================================

/// URL prefixes the query facade listens on
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub prefixes: Vec<String>,
}

/// One listener derived from a prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerPrefix {
    pub addr: SocketAddr,
    /// Path the routes are nested under; empty for the root
    pub path: String,
}

impl ServerConfig {
    /// Parse every prefix. `+` and `*` as host mean all interfaces.
    pub fn listeners(&self) -> Result<Vec<ListenerPrefix>, ConfigError> {
        self.prefixes.iter().map(|p| parse_prefix(p)).collect()
    }
}

fn parse_prefix(prefix: &str) -> Result<ListenerPrefix, ConfigError> {
    let invalid = |msg: &str| ConfigError::Invalid(format!("server prefix '{}': {}", prefix, msg));

    let url = Url::parse(prefix).map_err(|e| invalid(&e.to_string()))?;
    if url.scheme() != "http" {
        return Err(invalid("only http is supported"));
    }
    let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
    let ip = match host {
        "+" | "*" => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        "localhost" => IpAddr::V4(Ipv4Addr::LOCALHOST),
        other => other
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse()
            .map_err(|_| invalid("host must be an IP address, localhost, + or *"))?,
    };
    let port = url.port_or_known_default().unwrap_or(80);

    Ok(ListenerPrefix {
        addr: SocketAddr::new(ip, port),
        path: url.path().trim_end_matches('/').to_string(),
    })
}

// =============================================================================
// Collector
// =============================================================================

fn default_activation_delay_ms() -> u64 {
    1000
}

fn default_status_refresh_ms() -> u64 {
    10_000
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_asset_interval_ms() -> u64 {
    30_000
}

fn default_sample_count() -> u32 {
    1000
}

fn default_request_timeout_ms() -> u64 {
    5000
}

/// Timing and sizing of device connections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorSettings {
    /// Minimum time between two connection starts
    #[serde(default = "default_activation_delay_ms")]
    pub activation_delay_ms: u64,
    /// Status is re-sent at least this often
    #[serde(default = "default_status_refresh_ms")]
    pub status_refresh_ms: u64,
    /// Buffered events per connection before the connection waits
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
    #[serde(default = "default_asset_interval_ms")]
    pub asset_interval_ms: u64,
    /// `count` of each sample request
    #[serde(default = "default_sample_count")]
    pub sample_count: u32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            activation_delay_ms: default_activation_delay_ms(),
            status_refresh_ms: default_status_refresh_ms(),
            event_channel_capacity: default_event_channel_capacity(),
            asset_interval_ms: default_asset_interval_ms(),
            sample_count: default_sample_count(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl CollectorSettings {
    pub fn activation_delay(&self) -> Duration {
        Duration::from_millis(self.activation_delay_ms)
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            status_refresh: Duration::from_millis(self.status_refresh_ms),
            asset_interval: Duration::from_millis(self.asset_interval_ms),
            sample_count: self.sample_count.max(1),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

// =============================================================================
// Backup, triggers, discovery
// =============================================================================

/// `[backup]`: schedule plus where the durable store lives
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(flatten)]
    pub schedule: BackupConfig,
    /// SQLite database file; samples stay in memory only when unset
    #[serde(default)]
    pub database: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggersConfig {
    /// Directory of trigger rule documents; built-in rules when unset
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceFinderConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub interfaces: Vec<NetworkInterfaceScope>,
}

// =============================================================================
// Devices
// =============================================================================

fn default_port() -> u16 {
    DEFAULT_AGENT_PORT
}

fn default_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_enabled() -> bool {
    true
}

/// A statically configured agent connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub physical_address: Option<String>,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl DeviceEntry {
    pub fn validate(&self) -> Result<(), String> {
        if self.address.trim().is_empty() {
            return Err("address is empty".into());
        }
        if self.port == 0 {
            return Err("port must not be 0".into());
        }
        if self.interval_ms == 0 {
            return Err("interval_ms must be greater than 0".into());
        }
        Ok(())
    }

    pub fn to_connection(&self) -> Connection {
        Connection::new(
            &self.address,
            self.port,
            self.device_name.clone(),
            self.physical_address.clone(),
        )
        .with_interval_ms(self.interval_ms)
        .with_enabled(self.enabled)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const MINIMAL: &str = r#"
[server]
prefixes = ["http://+:8080/"]
"#;

    #[test]
    fn test_defaults() {
        let config = CollectorConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(config.collector.activation_delay_ms, 1000);
        assert_eq!(config.collector.status_refresh_ms, 10_000);
        assert_eq!(config.backup.schedule, BackupConfig::default());
        assert!(config.backup.database.is_none());
        assert!(!config.device_finder.enabled);
        assert!(config.devices.is_empty());
    }

    #[test]
    fn test_prefixes_are_required() {
        assert!(matches!(
            CollectorConfig::from_toml(""),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_listener_prefixes() {
        let server = ServerConfig {
            prefixes: vec![
                "http://+:8080/".into(),
                "http://127.0.0.1:9000/api/".into(),
                "http://localhost/".into(),
            ],
        };
        let listeners = server.listeners().unwrap();
        assert_eq!(listeners[0].addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(listeners[0].path, "");
        assert_eq!(listeners[1].addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(listeners[1].path, "/api");
        assert_eq!(listeners[2].addr, "127.0.0.1:80".parse().unwrap());

        let bad = ServerConfig {
            prefixes: vec!["https://example.com/".into()],
        };
        assert!(bad.listeners().is_err());
    }

    #[test]
    fn test_full_document() {
        let config = CollectorConfig::from_toml(
            r#"
[server]
prefixes = ["http://+:8080/"]

[collector]
activation_delay_ms = 250

[backup]
interval_ms = 5000
retention_secs = 3600
database = "telemetry.db"

[triggers]
directory = "triggers"

[device_finder]
enabled = true

[[device_finder.interfaces]]
interface_id = "eth0"
addresses = { minimum = "10.0.0.1", maximum = "10.0.0.20", deny = ["10.0.0.9"] }
ports = { allow = [5000] }
scan_interval_ms = 60000
ping_enabled = false

[[devices]]
address = "http://10.0.0.5/"
device_name = "VMC-3Axis"

[[devices]]
address = "10.0.0.6"
port = 7878
enabled = false
"#,
        )
        .unwrap();

        assert_eq!(config.collector.activation_delay_ms, 250);
        assert_eq!(config.backup.schedule.interval_ms, 5000);
        assert_eq!(config.backup.schedule.retention_secs, 3600);
        assert_eq!(config.backup.database, Some(PathBuf::from("telemetry.db")));
        assert_eq!(config.triggers.directory, Some(PathBuf::from("triggers")));

        let scope = &config.device_finder.interfaces[0];
        assert!(!scope.ping_enabled);
        let resolved = scope.resolve().unwrap();
        assert_eq!(resolved.addresses.len(), 19);
        assert_eq!(resolved.ports, vec![5000]);

        let first = config.devices[0].to_connection();
        assert_eq!(first.address(), "10.0.0.5");
        assert_eq!(first.port(), 5000);
        assert!(first.enabled);
        assert!(!config.devices[1].to_connection().enabled);
    }

    #[test]
    fn test_invalid_device_entry() {
        let err = CollectorConfig::from_toml(
            r#"
[server]
prefixes = ["http://+:8080/"]

[[devices]]
address = "10.0.0.5"
port = 0
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("devices[0]"));
    }

    #[test]
    fn test_invalid_scan_range() {
        let err = CollectorConfig::from_toml(
            r#"
[server]
prefixes = ["http://+:8080/"]

[device_finder]
enabled = true

[[device_finder.interfaces]]
addresses = { minimum = "10.0.0.x", maximum = "10.0.0.9" }
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
