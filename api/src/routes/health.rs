//! Liveness + observability snapshot.

use axum::extract::State;
use axum::Json;

use common::HealthSnapshot;

use crate::state::GatewayState;

pub async fn health(State(state): State<GatewayState>) -> Json<HealthSnapshot> {
    let mut snapshot = state.service.health().await;
    snapshot.uptime_secs = state.started.elapsed().as_secs();
    Json(snapshot)
}
