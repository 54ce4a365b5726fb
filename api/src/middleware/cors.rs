//! CORS configuration.

use axum::http::Method;
use tower_http::cors::{Any, CorsLayer};

/// Permissive CORS: export requests come from arbitrary dashboards and
/// server-side tooling alike.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .allow_origin(Any)
}
