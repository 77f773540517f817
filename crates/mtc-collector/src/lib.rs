//! mtc-collector - Connects to MTConnect agents and feeds the telemetry cache
//!
//! ```text
//!  config [[devices]] ─┐
//!  stored connections ─┼──► ConnectionActivationQueue ──► DeviceConnection ──► TelemetryCache
//!  DeviceFinder ───────┘        (one start per tick)        (poll + readers)
//! ```
//!
//! [`Collector`] wires the pieces together: it owns the finders, the queue
//! and the running connections, and guarantees at most one connection per
//! device id.

pub mod collector;
pub mod config;
pub mod connection;
pub mod error;
pub mod queue;

pub use collector::Collector;
pub use config::{
    CollectorConfig, CollectorSettings, DeviceEntry, DeviceFinderConfig, ListenerPrefix,
    ServerConfig, StorageConfig, TriggersConfig,
};
pub use connection::{ConnectionSettings, ConnectionState, DeviceConnection};
pub use error::{CollectorError, ConfigError};
pub use queue::{ConnectionActivationQueue, QueueEvent};
