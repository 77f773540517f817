//! Collector error types

use mtc_client::AgentClientError;
use mtc_core::StoreError;
use mtc_discovery::DiscoveryError;
use thiserror::Error;

/// Problems with the configuration document. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration document: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors starting or driving the collector
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Device finder failed to start: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Agent client error: {0}")]
    Client(#[from] AgentClientError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Already running")]
    AlreadyRunning,
}
