//! mtc-cache - In-memory telemetry cache with write-through backup
//!
//! ```text
//!  TelemetryEvent ──► TelemetryCache ──► queries (status, samples, model)
//!                          │   ▲
//!                          │   └── EventFilterEngine (durable data item ids)
//!                          ▼
//!                   BackupScheduler ──► DurableStore
//! ```
//!
//! The cache keeps every sample in memory until it has been backed up and
//! has fallen out of the retention window. The backup writes the samples of
//! data items selected by the trigger rules, plus the latest sample of every
//! other data item, and trims stored history older than the window down to
//! one sample per data item.

pub mod backup;
pub mod cache;
pub mod error;
pub mod filter;

pub use backup::{BackupConfig, BackupReport, BackupScheduler};
pub use cache::TelemetryCache;
pub use error::{CacheError, FilterError};
pub use filter::{EventFilterEngine, TriggerDocument, TriggerFilter};
