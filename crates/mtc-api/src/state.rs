//! Application state for the query facade

use std::sync::Arc;

use mtc_cache::TelemetryCache;
use mtc_collector::Collector;
use mtc_core::DeviceId;

use crate::error::ApiError;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<TelemetryCache>,
    pub collector: Collector,
}

impl AppState {
    pub fn new(cache: Arc<TelemetryCache>, collector: Collector) -> Self {
        Self { cache, collector }
    }

    /// Parse a path segment into a device id
    pub fn parse_device_id(&self, raw: &str) -> Result<DeviceId, ApiError> {
        raw.parse()
            .map_err(|_| ApiError::BadRequest(format!("Invalid device id: {}", raw)))
    }

    /// A device id the cache knows through a connection or a probe
    pub fn known_device(&self, raw: &str) -> Result<DeviceId, ApiError> {
        let device_id = self.parse_device_id(raw)?;
        if self.cache.connection(&device_id).is_some() || self.cache.agent(&device_id).is_some()
        {
            Ok(device_id)
        } else {
            Err(ApiError::NotFound(format!("Device not found: {}", raw)))
        }
    }
}
