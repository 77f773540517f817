//! Device snapshot handlers

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use mtc_collector::ConnectionState;
use mtc_core::{ActiveAlarm, DeviceModel, Sample, Status};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ConnectionState>,
}

#[derive(Serialize)]
pub struct SamplesResponse {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub items: Vec<Sample>,
    pub total_count: usize,
}

#[derive(Serialize)]
pub struct AlarmsResponse {
    pub items: Vec<ActiveAlarm>,
    pub total_count: usize,
}

/// Both bounds are RFC 3339. `to` defaults to now and `from` to `to`,
/// which yields the latest value of every data item.
#[derive(Deserialize, Default)]
pub struct SamplesQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// GET /devices/{device_id}/status
pub async fn get_status(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let id = state.parse_device_id(&device_id)?;
    let status = state
        .cache
        .latest_status(&id)
        .ok_or_else(|| ApiError::NotFound(format!("No status for device: {}", device_id)))?;
    Ok(Json(StatusResponse {
        status,
        state: state.collector.connection_state(&id),
    }))
}

/// GET /devices/{device_id}/samples?from=&to=
/// Latest sample at or before `from` for every data item, then every
/// later sample up to `to`
pub async fn get_samples(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(query): Query<SamplesQuery>,
) -> Result<Json<SamplesResponse>, ApiError> {
    let id = state.known_device(&device_id)?;
    let to = query.to.unwrap_or_else(Utc::now);
    let from = query.from.unwrap_or(to);
    if to < from {
        return Err(ApiError::BadRequest(format!(
            "'to' ({}) is before 'from' ({})",
            to, from
        )));
    }

    let items = state.cache.samples(&id, from, to);
    let total_count = items.len();
    Ok(Json(SamplesResponse {
        from,
        to,
        items,
        total_count,
    }))
}

/// GET /devices/{device_id}/model
pub async fn get_model(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<DeviceModel>, ApiError> {
    let id = state.parse_device_id(&device_id)?;
    state
        .cache
        .device_model(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No model for device: {}", device_id)))
}

/// GET /devices/{device_id}/alarms
pub async fn get_alarms(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<AlarmsResponse>, ApiError> {
    let id = state.known_device(&device_id)?;
    let items = state.cache.alarms(&id);
    let total_count = items.len();
    Ok(Json(AlarmsResponse { items, total_count }))
}
