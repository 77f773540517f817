//! mtc-api - HTTP query facade over the telemetry cache
//!
//! Read-only snapshots of what the collector has gathered, plus adding and
//! removing connections.
//!
//! # Usage
//!
//! ```ignore
//! use mtc_api::{create_router, AppState};
//!
//! let state = AppState::new(cache, collector);
//! let router = mtc_api::router_for_prefix(state, "/mtc");
//! axum::serve(listener, router).await?;
//! ```

pub mod error;
pub mod handlers;
pub mod state;

pub use error::ApiError;
pub use state::AppState;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the query facade router with the given application state
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(|| async { "OK" }))
        // Connection routes
        .route(
            "/connections",
            get(handlers::connections::list_connections)
                .post(handlers::connections::add_connection),
        )
        .route(
            "/connections/{device_id}",
            axum::routing::delete(handlers::connections::remove_connection),
        )
        // Device routes
        .route(
            "/devices/{device_id}/status",
            get(handlers::devices::get_status),
        )
        .route(
            "/devices/{device_id}/samples",
            get(handlers::devices::get_samples),
        )
        .route(
            "/devices/{device_id}/model",
            get(handlers::devices::get_model),
        )
        .route(
            "/devices/{device_id}/alarms",
            get(handlers::devices::get_alarms),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Router for one listener prefix; routes are nested under `path` unless
/// it is empty
pub fn router_for_prefix(state: AppState, path: &str) -> Router {
    let router = create_router(state);
    if path.is_empty() || path == "/" {
        router
    } else {
        Router::new().nest(path, router)
    }
}
