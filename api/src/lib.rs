//! HTTP gateway for the export service.
//!
//! Routes: `POST /` and `POST /{filename}` for exports (JSON, URL-encoded,
//! multipart), `GET /health`, `POST /change-hc-version/{version}` behind
//! the admin token, and an optional static UI at `GET /`.

mod body;
mod error;
mod middleware;
mod routes;
mod state;

pub use body::{build_job, parse_payload, ExportPayload, ResponseShape};
pub use error::{ApiError, ApiResult};
pub use state::GatewayState;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use common::{Config, ExportService};

/// Assemble the gateway router. Middleware is applied before the state so
/// type inference works out under axum 0.8.
pub fn build_router(state: GatewayState) -> Router {
    let body_limit = state.config.server.max_body_size;

    Router::new()
        .route("/health", get(routes::health::health))
        .route(
            "/change-hc-version/{version}",
            post(routes::version::switch_version),
        )
        .route(
            "/",
            get(routes::ui::index).post(routes::export::export_root),
        )
        .route("/{filename}", post(routes::export::export_named))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is told to stop.
pub async fn serve(
    service: Arc<dyn ExportService>,
    config: Arc<Config>,
    shutdown: tokio_util::sync::CancellationToken,
) -> anyhow::Result<()> {
    let state = GatewayState::new(service, config.clone());
    let router = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "export server listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await?;

    Ok(())
}
