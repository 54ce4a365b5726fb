//! Shared gateway state.

use std::sync::Arc;
use std::time::Instant;

use common::{Config, ExportService};

use crate::middleware::RateLimiter;

/// Everything the routes need, cheap to clone (axum requires `Clone`
/// state; trait objects ride behind `Arc`).
#[derive(Clone)]
pub struct GatewayState {
    pub service: Arc<dyn ExportService>,
    pub config: Arc<Config>,
    pub limiter: Arc<RateLimiter>,
    pub started: Instant,
}

impl GatewayState {
    pub fn new(service: Arc<dyn ExportService>, config: Arc<Config>) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.server.rate_limiting.clone()));
        Self {
            service,
            config,
            limiter,
            started: Instant::now(),
        }
    }
}
