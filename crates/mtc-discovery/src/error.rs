//! Discovery error types

use thiserror::Error;

/// Errors reported when a device finder cannot start.
///
/// Failures of individual pings, connects or probes are never errors; a
/// candidate that does not answer is simply not an agent.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Address or port range could not be resolved
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// The configured network interface is unusable
    #[error("Network interface error: {0}")]
    Interface(String),

    /// `start` was called while a scan is already running
    #[error("Device finder is already running")]
    AlreadyRunning,
}
