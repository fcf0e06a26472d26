use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::http::server::AppState;
use crate::load_balancer::{EndpointHealth, EndpointSnapshot, PoolError};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub endpoints: usize,
    pub healthy_endpoints: usize,
    pub active_requests: usize,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let snapshot = state.pool.snapshot();
    let healthy = snapshot
        .iter()
        .filter(|e| e.health == EndpointHealth::Healthy)
        .count();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if healthy > 0 { "operational" } else { "degraded" },
        endpoints: snapshot.len(),
        healthy_endpoints: healthy,
        active_requests: state.pool.total_active_requests(),
    })
}

pub async fn get_endpoints(State(state): State<AppState>) -> Json<Vec<EndpointSnapshot>> {
    Json(state.pool.snapshot())
}

/// Clear an endpoint's failure state, e.g. after a credit top-up.
pub async fn reset_endpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    match state.pool.reset(&id) {
        Ok(()) => {
            tracing::info!(endpoint = %id, "Endpoint reset via admin API");
            Ok(StatusCode::NO_CONTENT)
        }
        Err(e @ PoolError::UnknownEndpoint(_)) => Err((StatusCode::NOT_FOUND, e.to_string())),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}
