//! End-to-end pipeline runs over the mock engine.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{ChartInput, ExportArtifact, ExportError, ExportJob, JobResources, OutputType};
use hcexport_pipeline::Exporter;
use hcexport_renderer::mock::{MockBehavior, MockEngine};
use hcexport_renderer::{PageFactory, RenderEngine};
use tokio_util::sync::CancellationToken;

struct Harness {
    exporter: Exporter,
    behavior: Arc<MockBehavior>,
    _dir: tempfile::TempDir,
}

async fn harness_with(mut config: common::Config) -> Harness {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("sources.js"),
        "/* 11.4.8 */ window.Highcharts = {};",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("manifest.json"),
        r#"{"version":"11.4.8","modules":{"highcharts":1,"debugger":1}}"#,
    )
    .unwrap();

    config.highcharts.cache_path = dir.path().to_path_buf();
    config.highcharts.core_scripts = vec!["highcharts".to_string()];
    config.highcharts.module_scripts = vec!["debugger".to_string()];
    config.highcharts.indicator_scripts = vec![];
    config.highcharts.version = "11.4.8".to_string();

    let cache = Arc::new(hcexport_cache::AssetCache::new(config.highcharts.clone()));
    cache.ensure().await.unwrap();

    let mock = MockEngine::new();
    let behavior = mock.behavior.clone();
    let engine: Arc<dyn RenderEngine> = Arc::new(mock);

    let factory = Arc::new(PageFactory::new(
        engine,
        cache.clone(),
        config.pool.work_limit,
        false,
    ));
    let pool = hcexport_pool::WorkerPool::new(factory.clone(), config.pool.clone());
    let exporter = Exporter::new(pool, factory, cache, &config);

    Harness {
        exporter,
        behavior,
        _dir: dir,
    }
}

async fn harness() -> Harness {
    let mut config = common::Config::default();
    config.pool.min_workers = 0;
    config.pool.max_workers = 2;
    config.pool.acquire_timeout = 1000;
    harness_with(config).await
}

fn job(input: ChartInput, out_type: OutputType) -> ExportJob {
    ExportJob {
        request_id: "test-req".to_string(),
        input,
        out_type,
        height: 400.0,
        width: 600.0,
        scale: 1.0,
        constr: "chart".to_string(),
        callback: None,
        custom_code: None,
        resources: None,
        global_options: None,
        theme_options: None,
        display_errors: false,
        cancel: CancellationToken::new(),
    }
}

const SVG: &str = "<svg xmlns=\"http://www.w3.org/2000/svg\"><rect width=\"1\" height=\"1\"/></svg>";

#[tokio::test]
async fn svg_to_svg_is_byte_for_byte_passthrough() {
    let h = harness().await;
    let artifact = h
        .exporter
        .export(job(ChartInput::Vector(SVG.to_string()), OutputType::Svg))
        .await
        .unwrap();

    assert_eq!(artifact, ExportArtifact::Text(SVG.to_string()));
    assert_eq!(
        h.behavior.pages_created.load(Ordering::SeqCst),
        0,
        "passthrough must not touch the pool"
    );

    let stats = h.exporter.pool().stats();
    assert_eq!(stats.attempts(), 1);
    assert_eq!(stats.performed(), 1);
}

#[tokio::test]
async fn config_to_png_renders_and_captures() {
    let h = harness().await;
    let input = ChartInput::classify(r#"{"series":[{"data":[1,3,2,4]}]}"#).unwrap();
    let artifact = h.exporter.export(job(input, OutputType::Png)).await.unwrap();

    match artifact {
        ExportArtifact::Binary(bytes) => {
            assert_eq!(&bytes[..4], &[0x89, 0x50, 0x4E, 0x47], "PNG magic");
        }
        other => panic!("expected binary artifact, got {other:?}"),
    }
    assert_eq!(h.behavior.renders.load(Ordering::SeqCst), 1);
    assert!(h.behavior.destroys.load(Ordering::SeqCst) >= 1, "chart destroyed in cleanup");
}

#[tokio::test]
async fn config_to_jpeg_has_jpeg_magic() {
    let h = harness().await;
    let input = ChartInput::classify(r#"{"series":[{"data":[1]}]}"#).unwrap();
    let artifact = h.exporter.export(job(input, OutputType::Jpeg)).await.unwrap();
    match artifact {
        ExportArtifact::Binary(bytes) => assert_eq!(&bytes[..3], &[0xFF, 0xD8, 0xFF]),
        other => panic!("expected binary artifact, got {other:?}"),
    }
}

#[tokio::test]
async fn config_to_pdf_has_pdf_header() {
    let h = harness().await;
    let input = ChartInput::classify(r#"{"series":[{"data":[1]}]}"#).unwrap();
    let artifact = h.exporter.export(job(input, OutputType::Pdf)).await.unwrap();
    match artifact {
        ExportArtifact::Binary(bytes) => assert!(bytes.starts_with(b"%PDF")),
        other => panic!("expected binary artifact, got {other:?}"),
    }
}

#[tokio::test]
async fn config_to_svg_reads_container_markup() {
    let h = harness().await;
    *h.behavior.svg_outer_html.lock() = "<svg data-mock=\"1\"/>".to_string();
    let input = ChartInput::classify(r#"{"series":[]}"#).unwrap();
    let artifact = h.exporter.export(job(input, OutputType::Svg)).await.unwrap();
    assert_eq!(artifact, ExportArtifact::Text("<svg data-mock=\"1\"/>".to_string()));
}

#[tokio::test]
async fn vector_to_png_sets_content_and_captures() {
    let h = harness().await;
    let artifact = h
        .exporter
        .export(job(ChartInput::Vector(SVG.to_string()), OutputType::Png))
        .await
        .unwrap();
    match artifact {
        ExportArtifact::Binary(bytes) => assert_eq!(&bytes[..4], &[0x89, 0x50, 0x4E, 0x47]),
        other => panic!("expected binary artifact, got {other:?}"),
    }
    assert_eq!(h.behavior.renders.load(Ordering::SeqCst), 0, "no render hook for vector input");
}

#[tokio::test]
async fn injected_resources_are_disposed() {
    let h = harness().await;
    let input = ChartInput::classify(r#"{"series":[]}"#).unwrap();
    let mut job = job(input, OutputType::Png);
    job.resources = Some(JobResources {
        js: Some("window.__x = 1;".to_string()),
        css: Some("@import url(\"https://fonts.example/a.css\");\nbody { color: red; }".to_string()),
        files: vec!["https://cdn.example/extra.js".to_string()],
    });

    h.exporter.export(job).await.unwrap();
    assert!(
        h.behavior.injected_live.lock().is_empty(),
        "every injected handle must be removed in cleanup"
    );
}

#[tokio::test]
async fn rasterization_timeout_retires_the_worker() {
    let mut config = common::Config::default();
    config.pool.min_workers = 0;
    config.pool.max_workers = 1;
    config.pool.acquire_timeout = 1000;
    config.export.rasterization_timeout = 50;
    let h = harness_with(config).await;
    h.behavior.rasterize_delay_ms.store(5000, Ordering::SeqCst);

    let input = ChartInput::classify(r#"{"series":[]}"#).unwrap();
    let err = h.exporter.export(job(input.clone(), OutputType::Png)).await.unwrap_err();
    assert!(matches!(err, ExportError::RasterizationTimeout));
    assert_eq!(h.behavior.pages_created.load(Ordering::SeqCst), 1);

    // The poisoned page must not serve the next job.
    h.behavior.rasterize_delay_ms.store(0, Ordering::SeqCst);
    h.exporter.export(job(input, OutputType::Png)).await.unwrap();
    assert_eq!(
        h.behavior.pages_created.load(Ordering::SeqCst),
        2,
        "timeout retires the page; a fresh one serves the next job"
    );

    let stats = h.exporter.pool().stats();
    assert_eq!(stats.dropped(), 1);
    assert_eq!(stats.performed(), 1);
}

#[tokio::test]
async fn cancelled_job_changes_no_completion_counters() {
    let h = harness().await;
    let input = ChartInput::classify(r#"{"series":[]}"#).unwrap();
    let mut cancelled = job(input, OutputType::Png);
    cancelled.cancel.cancel();

    let err = h.exporter.export(cancelled).await.unwrap_err();
    assert!(matches!(err, ExportError::Cancelled));

    let stats = h.exporter.pool().stats();
    assert_eq!(stats.attempts(), 1);
    assert_eq!(stats.performed(), 0);
    assert_eq!(stats.dropped(), 0);

    // The worker that served the cancelled job is back and healthy.
    let input = ChartInput::classify(r#"{"series":[]}"#).unwrap();
    h.exporter.export(job(input, OutputType::Png)).await.unwrap();
}

#[tokio::test]
async fn injection_config_sizes_through_css() {
    let h = harness().await;
    let raw = "{ series: [{ data: [1, 2, 3] }] }".to_string();
    let artifact = h
        .exporter
        .export(job(ChartInput::Injection(raw), OutputType::Png))
        .await
        .unwrap();
    assert!(matches!(artifact, ExportArtifact::Binary(_)));
    assert_eq!(h.behavior.renders.load(Ordering::SeqCst), 1);
    assert!(
        h.behavior.injected_live.lock().is_empty(),
        "the size-only style is disposed with the other handles"
    );
}
