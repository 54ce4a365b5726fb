//! Optional UI static entry point at `GET /`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use tracing::warn;

use crate::state::GatewayState;

pub async fn index(State(state): State<GatewayState>) -> Response {
    match &state.config.server.ui_path {
        Some(dir) => match tokio::fs::read_to_string(dir.join("index.html")).await {
            Ok(markup) => Html(markup).into_response(),
            Err(err) => {
                warn!(%err, dir = %dir.display(), "UI index not readable");
                StatusCode::NOT_FOUND.into_response()
            }
        },
        None => (StatusCode::OK, "chart export server is running").into_response(),
    }
}
