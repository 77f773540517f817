//! mtc-core - Core types for the MTConnect data collector
//!
//! This crate holds the data model shared by every other crate in the
//! workspace: connection and device identity, the structural description of
//! a machine (device, components, data items), the sample time series, and
//! the durable store contract the telemetry cache writes through.

pub mod alarms;
pub mod error;
pub mod event;
pub mod id;
pub mod models;
pub mod store;

pub use alarms::{ActiveAlarm, AlarmTracker};
pub use error::{StoreError, StoreResult};
pub use event::TelemetryEvent;
pub use id::{DeviceId, InvalidDeviceId};
pub use models::*;
pub use store::{DurableStore, MemoryStore};
