//! Connection handlers

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use mtc_collector::{ConnectionState, DeviceEntry};
use mtc_core::{Connection, Status};
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct ConnectionsResponse {
    pub items: Vec<ConnectionInfo>,
    pub total_count: usize,
}

#[derive(Serialize)]
pub struct ConnectionInfo {
    #[serde(flatten)]
    pub connection: Connection,
    /// Session state; absent when no session runs for the device
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ConnectionState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
}

impl ConnectionInfo {
    fn new(state: &AppState, connection: Connection) -> Self {
        let device_id = connection.device_id().clone();
        Self {
            connection,
            state: state.collector.connection_state(&device_id),
            status: state.cache.latest_status(&device_id),
        }
    }
}

/// GET /connections
pub async fn list_connections(State(state): State<AppState>) -> Json<ConnectionsResponse> {
    let items: Vec<ConnectionInfo> = state
        .cache
        .connections()
        .into_iter()
        .map(|connection| ConnectionInfo::new(&state, connection))
        .collect();
    let total_count = items.len();
    Json(ConnectionsResponse { items, total_count })
}

/// POST /connections
/// Add or replace a connection; enabled connections are queued for
/// activation
pub async fn add_connection(
    State(state): State<AppState>,
    Json(entry): Json<DeviceEntry>,
) -> Result<(StatusCode, Json<ConnectionInfo>), ApiError> {
    entry.validate().map_err(ApiError::BadRequest)?;

    let connection = entry.to_connection();
    let existed = state.cache.connection(connection.device_id()).is_some();
    state.collector.add_connection(connection.clone());

    let status = if existed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(ConnectionInfo::new(&state, connection))))
}

/// DELETE /connections/{device_id}
pub async fn remove_connection(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = state.parse_device_id(&device_id)?;
    match state.collector.remove_connection(&id).await? {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(ApiError::NotFound(format!(
            "Connection not found: {}",
            device_id
        ))),
    }
}
