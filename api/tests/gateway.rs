//! Gateway behavior through the real router, with the export machinery
//! stubbed out behind the service seam.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tower::ServiceExt;

use common::{
    ChartInput, Config, ExportArtifact, ExportError, ExportJob, ExportService, HealthSnapshot,
    OutputType, PoolSnapshot,
};
use hcexport_api::{build_router, GatewayState};

struct StubService {
    version: Mutex<String>,
    fail_switch: bool,
}

impl StubService {
    fn new() -> Self {
        Self {
            version: Mutex::new("11.4.8".to_string()),
            fail_switch: false,
        }
    }
}

#[async_trait]
impl ExportService for StubService {
    async fn export(&self, job: ExportJob) -> Result<ExportArtifact, ExportError> {
        match (&job.input, job.out_type) {
            (ChartInput::Vector(markup), OutputType::Svg) => {
                Ok(ExportArtifact::Text(markup.clone()))
            }
            (_, OutputType::Svg) => Ok(ExportArtifact::Text("<svg/>".to_string())),
            (_, OutputType::Png) => Ok(ExportArtifact::Binary(vec![0x89, 0x50, 0x4E, 0x47])),
            (_, OutputType::Jpeg) => Ok(ExportArtifact::Binary(vec![0xFF, 0xD8, 0xFF, 0xE0])),
            (_, OutputType::Pdf) => Ok(ExportArtifact::Binary(b"%PDF-1.4".to_vec())),
        }
    }

    async fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            status: "ok".to_string(),
            service: "hc-export-server".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            highcharts_version: self.version.lock().unwrap().clone(),
            uptime_secs: 0,
            pool: PoolSnapshot::default(),
            success_rate_30m: 1.0,
        }
    }

    async fn switch_version(&self, version: &str) -> Result<String, ExportError> {
        if self.fail_switch {
            return Err(ExportError::Cache {
                kind: common::CacheErrorKind::Network,
                message: "cdn unreachable".to_string(),
            });
        }
        let mut current = self.version.lock().unwrap();
        *current = version.to_string();
        Ok(current.clone())
    }
}

fn router_with(config: Config, service: StubService) -> axum::Router {
    build_router(GatewayState::new(Arc::new(service), Arc::new(config)))
}

fn router() -> axum::Router {
    router_with(Config::default(), StubService::new())
}

fn json_post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

#[tokio::test]
async fn json_to_png_with_attachment() {
    let response = router()
        .oneshot(json_post("/", r#"{"infile":{"series":[{"data":[1,3,2,4]}]}}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/png"
    );
    assert_eq!(
        response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
        "attachment; filename=\"chart.png\""
    );
    let bytes = body_bytes(response).await;
    assert_eq!(&bytes[..4], &[0x89, 0x50, 0x4E, 0x47]);
}

#[tokio::test]
async fn svg_passthrough_is_byte_for_byte() {
    let svg = "<svg xmlns=\"http://www.w3.org/2000/svg\"><rect width=\"1\" height=\"1\"/></svg>";
    let body = serde_json::json!({ "svg": svg, "type": "svg" }).to_string();

    let response = router().oneshot(json_post("/", &body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/svg+xml"
    );
    let bytes = body_bytes(response).await;
    assert_eq!(bytes, svg.as_bytes());
}

#[tokio::test]
async fn b64_response_decodes_to_jpeg() {
    let body = r#"{"infile":{"series":[{"data":[1,3,2,4]}]},"b64":true,"type":"jpeg"}"#;
    let response = router().oneshot(json_post("/", body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/"));

    let decoded = BASE64.decode(body_bytes(response).await).unwrap();
    assert_eq!(&decoded[..3], &[0xFF, 0xD8, 0xFF]);
}

#[tokio::test]
async fn empty_body_is_rejected() {
    let response = router().oneshot(json_post("/", "{}")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let text = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(text.contains("chart data"), "message mentions missing chart data: {text}");
}

#[tokio::test]
async fn named_route_sets_filename() {
    let response = router()
        .oneshot(json_post("/weekly-report", r#"{"infile":{"a":1}}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
        "attachment; filename=\"weekly-report.png\""
    );
}

#[tokio::test]
async fn urlencoded_body_is_accepted() {
    let body = "infile=%7B%22series%22%3A%5B%5D%7D&type=pdf&noDownload=true";
    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap();

    let response = router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/pdf"
    );
    assert!(response.headers().get(header::CONTENT_DISPOSITION).is_none());
}

#[tokio::test]
async fn second_request_in_window_is_limited() {
    let mut config = Config::default();
    config.server.rate_limiting.enable = true;
    config.server.rate_limiting.max_requests = 1;
    config.server.rate_limiting.window = 1;
    let app = router_with(config, StubService::new());

    let first = app
        .clone()
        .oneshot(json_post("/", r#"{"infile":{"a":1}}"#))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCEPT, "application/json")
        .body(Body::from(r#"{"infile":{"a":1}}"#))
        .unwrap();
    let second = app.oneshot(request).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    let text = String::from_utf8(body_bytes(second).await).unwrap();
    assert!(text.contains("Too many requests"));
}

#[tokio::test]
async fn rate_limit_spares_health() {
    let mut config = Config::default();
    config.server.rate_limiting.enable = true;
    config.server.rate_limiting.max_requests = 1;
    let app = router_with(config, StubService::new());

    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn admin_switch_requires_token_and_updates_health() {
    let mut config = Config::default();
    config.highcharts.admin_token = Some("secret-token".to_string());
    let app = router_with(config, StubService::new());

    // Missing token.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/change-hc-version/10.3.3")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Correct token.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/change-hc-version/10.3.3")
                .header("hc-auth", "secret-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let value: serde_json::Value =
        serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(value["status"], "OK");

    // Health now reports the new version.
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let value: serde_json::Value =
        serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(value["highchartsVersion"], "10.3.3");
}

#[tokio::test]
async fn admin_switch_disabled_without_configured_token() {
    let app = router();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/change-hc-version/10.3.3")
                .header("hc-auth", "anything")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn failed_switch_is_a_server_error() {
    let mut config = Config::default();
    config.highcharts.admin_token = Some("secret-token".to_string());
    let mut service = StubService::new();
    service.fail_switch = true;
    let app = router_with(config, service);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/change-hc-version/9.9.9")
                .header("hc-auth", "secret-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn invalid_type_is_rejected() {
    let response = router()
        .oneshot(json_post("/", r#"{"infile":{"a":1},"type":"gif"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn out_of_range_scale_is_rejected() {
    let response = router()
        .oneshot(json_post("/", r#"{"infile":{"a":1},"scale":9.5}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
