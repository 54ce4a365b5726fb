//! Admin route switching the active library version.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::state::GatewayState;

/// Header carrying the admin token.
const AUTH_HEADER: &str = "hc-auth";

pub async fn switch_version(
    State(state): State<GatewayState>,
    Path(version): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    let Some(expected) = state
        .config
        .highcharts
        .admin_token
        .as_deref()
        .filter(|token| !token.is_empty())
    else {
        return Err(ApiError::Unauthorized(
            "Version switching is disabled: no admin token is configured".to_string(),
        ));
    };

    let provided = headers.get(AUTH_HEADER).and_then(|v| v.to_str().ok());
    if provided != Some(expected) {
        warn!("version switch rejected: bad or missing auth token");
        return Err(ApiError::Unauthorized(
            "Invalid or missing hc-auth token".to_string(),
        ));
    }

    let active = state.service.switch_version(&version).await?;
    info!(version = %active, "library version switched by admin request");
    Ok(Json(serde_json::json!({ "status": "OK", "version": active })))
}
