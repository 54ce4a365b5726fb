//! Fixed-window rate limiting per client IP.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use tracing::debug;

use common::config::RateLimitingConfig;

use crate::state::GatewayState;

const LIMIT_MESSAGE: &str =
    "Too many requests, you have been rate limited. Please try again later.";

struct Window {
    started: Instant,
    count: u32,
}

/// Token-window limiter: `max_requests` per `window` minutes per client,
/// with an optional fixed delay tier before the hard cap.
pub struct RateLimiter {
    config: RateLimitingConfig,
    windows: DashMap<String, Window>,
}

enum Decision {
    Allow,
    Delay(Duration),
    Reject,
}

impl RateLimiter {
    pub fn new(config: RateLimitingConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enable
    }

    /// Matching `key`/`access_token` query parameters bypass the limiter.
    fn bypassed(&self, query: Option<&str>) -> bool {
        let (Some(skip_key), Some(skip_token)) = (
            self.config.skip_key.as_deref(),
            self.config.skip_token.as_deref(),
        ) else {
            return false;
        };
        let Some(query) = query else {
            return false;
        };
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query).unwrap_or_default();
        let mut key_ok = false;
        let mut token_ok = false;
        for (name, value) in pairs {
            match name.as_str() {
                "key" if value == skip_key => key_ok = true,
                "access_token" if value == skip_token => token_ok = true,
                _ => {}
            }
        }
        key_ok && token_ok
    }

    fn check(&self, client: &str) -> Decision {
        let window_len = Duration::from_secs(self.config.window.max(1) * 60);
        let mut entry = self.windows.entry(client.to_string()).or_insert(Window {
            started: Instant::now(),
            count: 0,
        });
        if entry.started.elapsed() >= window_len {
            entry.started = Instant::now();
            entry.count = 0;
        }
        entry.count += 1;

        if entry.count > self.config.max_requests {
            Decision::Reject
        } else if self.config.delay > 0 && entry.count * 2 > self.config.max_requests {
            // Soft tier: slow the caller down before the hard cap bites.
            Decision::Delay(Duration::from_millis(u64::from(self.config.delay)))
        } else {
            Decision::Allow
        }
    }

    fn client_ip(&self, req: &Request) -> String {
        if self.config.trust_proxy {
            if let Some(forwarded) = req
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
            {
                if let Some(first) = forwarded.split(',').next() {
                    let first = first.trim();
                    if !first.is_empty() {
                        return first.to_string();
                    }
                }
            }
        }
        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Axum middleware enforcing the limiter on the export routes.
pub async fn rate_limit(
    State(state): State<GatewayState>,
    req: Request,
    next: Next,
) -> Response {
    let limiter = &state.limiter;
    // Only export submissions are limited; health probes and admin calls
    // pass through.
    let is_export = req.method() == axum::http::Method::POST
        && !req.uri().path().starts_with("/change-hc-version");
    if !is_export || !limiter.enabled() || limiter.bypassed(req.uri().query()) {
        return next.run(req).await;
    }

    let client = limiter.client_ip(&req);
    let wants_json = req
        .headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("application/json"));

    match limiter.check(&client) {
        Decision::Allow => next.run(req).await,
        Decision::Delay(pause) => {
            debug!(%client, ?pause, "rate limiter delaying request");
            tokio::time::sleep(pause).await;
            next.run(req).await
        }
        Decision::Reject => {
            debug!(%client, "rate limit exceeded");
            if wants_json {
                (
                    axum::http::StatusCode::TOO_MANY_REQUESTS,
                    axum::Json(serde_json::json!({ "message": LIMIT_MESSAGE })),
                )
                    .into_response()
            } else {
                (axum::http::StatusCode::TOO_MANY_REQUESTS, LIMIT_MESSAGE).into_response()
            }
        }
    }
}
