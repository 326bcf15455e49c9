mod support;

use std::sync::Arc;
use std::time::Duration;

use imgharvest_core::{ScrapeOptions, ScrapeRequest, SourceKind, ValidationError};
use imgharvest_engine::{
    EngineConfig, EngineEvent, FetchSettings, ImageCodec, Orchestrator, ReqwestFetcher,
    ScrapeError, Stage,
};
use pretty_assertions::assert_eq;
use tempfile::{tempdir, TempDir};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use support::{FakeBrowser, FakeLauncher, FakePage, TestSink};

fn results_html(server: &MockServer) -> String {
    format!(
        r#"<html><body>
        <a class="iusc" m='{{"murl":"{0}/img/a.jpg"}}'></a>
        <a class="iusc" m='{{"murl":"{0}/img/b.png"}}'></a>
        </body></html>"#,
        server.uri()
    )
}

async fn mount_search(server: &MockServer, status: u16) {
    let template = if status == 200 {
        ResponseTemplate::new(200).set_body_raw(results_html(server), "text/html")
    } else {
        ResponseTemplate::new(status)
    };
    Mock::given(method("GET"))
        .and(path("/images/search"))
        .respond_with(template)
        .mount(server)
        .await;
}

async fn mount_image(server: &MockServer, route: &str, content_type: &str, hits: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![1u8; 16], content_type))
        .expect(hits)
        .mount(server)
        .await;
}

fn orchestrator(server: &MockServer, browser: Option<FakeBrowser>) -> Orchestrator {
    orchestrator_with_codec(server, browser, ImageCodec::detect())
}

fn orchestrator_with_codec(
    server: &MockServer,
    browser: Option<FakeBrowser>,
    codec: ImageCodec,
) -> Orchestrator {
    let mut config = EngineConfig::default();
    config.search_api.endpoint = format!("{}/images/search", server.uri());
    config.crawl.scroll_pause = Duration::ZERO;
    let fetcher = ReqwestFetcher::new(FetchSettings::default()).unwrap();
    Orchestrator::with_components(
        config,
        Arc::new(fetcher),
        Arc::new(FakeLauncher { browser }),
        codec,
    )
}

fn request(query: &str, sources: Vec<SourceKind>, out: &TempDir) -> ScrapeRequest {
    ScrapeRequest::new(
        query,
        sources,
        ScrapeOptions {
            limit: 5,
            output_dir: out.path().to_path_buf(),
            ..ScrapeOptions::default()
        },
    )
}

#[tokio::test]
async fn search_source_saves_then_skips_on_rerun() {
    let server = MockServer::start().await;
    mount_search(&server, 200).await;
    mount_image(&server, "/img/a.jpg", "image/jpeg", 1).await;
    mount_image(&server, "/img/b.png", "image/png", 1).await;
    let out = tempdir().unwrap();
    let engine = orchestrator(&server, None);
    let sink = TestSink::new();
    let cancel = CancellationToken::new();

    let first = engine
        .run(request("Red Fox", vec![SourceKind::SearchApi], &out), &cancel, &sink)
        .await
        .unwrap();
    let destination = out.path().join("bing").join("red-fox");
    assert_eq!(first.results.len(), 1);
    let result = &first.results[0];
    assert_eq!(
        (result.engine.as_str(), result.requested, result.saved, result.skipped),
        ("bing", 5, 2, 0)
    );
    assert_eq!(result.destination, destination);
    assert!(destination.join("bing_0001.jpg").exists());
    assert!(destination.join("bing_0002.png").exists());

    let events = sink.take();
    assert!(matches!(events.first(), Some(EngineEvent::SourceStarted { .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::Progress(p) if p.stage == Stage::Done && p.saved == 2
    )));
    assert!(matches!(events.last(), Some(EngineEvent::SourceFinished(_))));

    let second = engine
        .run(request("Red Fox", vec![SourceKind::SearchApi], &out), &cancel, &sink)
        .await
        .unwrap();
    assert_eq!((second.results[0].saved, second.results[0].skipped), (0, 2));
    assert!(second.results[0].errors.is_empty());
}

#[tokio::test]
async fn setup_failure_keeps_earlier_results_and_stops() {
    let server = MockServer::start().await;
    mount_search(&server, 200).await;
    mount_image(&server, "/img/a.jpg", "image/jpeg", 1).await;
    mount_image(&server, "/img/b.png", "image/png", 1).await;
    let out = tempdir().unwrap();
    let engine = orchestrator(&server, None);

    let report = engine
        .run(
            request(
                "foxes.example",
                vec![SourceKind::SearchApi, SourceKind::Browser, SourceKind::Crawl],
                &out,
            ),
            &CancellationToken::new(),
            &TestSink::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].engine, "bing");
    assert_eq!(
        report.failures,
        vec!["google run failed: setup failed: could not start browser: chrome binary not found"
            .to_string()]
    );
    assert!(report.aborted);
    assert!(!out.path().join("custom_url").exists());
}

#[tokio::test]
async fn discovery_failure_moves_on_to_the_next_source() {
    let server = MockServer::start().await;
    mount_search(&server, 503).await;
    mount_image(&server, "/img/c.png", "image/png", 1).await;
    let site = FakeBrowser::site(vec![(
        "https://gallery.example/",
        FakePage::new().img(&[("src", &format!("{}/img/c.png", server.uri()))]),
    )]);
    let out = tempdir().unwrap();
    let engine = orchestrator(&server, Some(site.clone()));

    let report = engine
        .run(
            request(
                "gallery.example",
                vec![SourceKind::SearchApi, SourceKind::Crawl],
                &out,
            ),
            &CancellationToken::new(),
            &TestSink::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].starts_with("bing run failed: discovery failed:"));
    assert!(!report.aborted);
    assert_eq!(report.results.len(), 1);
    let custom = &report.results[0];
    assert_eq!((custom.engine.as_str(), custom.saved), ("custom", 1));
    assert_eq!(
        custom.destination,
        out.path().join("custom_url").join("galleryexample")
    );
    assert_eq!(site.visits(), vec!["https://gallery.example/".to_string()]);
}

#[tokio::test]
async fn cancelled_runs_start_no_source() {
    let server = MockServer::start().await;
    let out = tempdir().unwrap();
    let engine = orchestrator(&server, None);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = engine
        .run(request("red fox", vec![SourceKind::SearchApi], &out), &cancel, &TestSink::new())
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(report.results.is_empty());
    assert!(report.failures.is_empty());
}

#[tokio::test]
async fn invalid_requests_are_rejected_up_front() {
    let server = MockServer::start().await;
    let out = tempdir().unwrap();
    let engine = orchestrator(&server, None);

    let err = engine
        .run(
            request("   ", vec![SourceKind::SearchApi], &out),
            &CancellationToken::new(),
            &TestSink::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ScrapeError::Validation(ValidationError::EmptyQuery)));
}

#[tokio::test]
async fn missing_codec_support_aborts_before_any_source() {
    let server = MockServer::start().await;
    let out = tempdir().unwrap();
    let codec = ImageCodec {
        webp_decode: false,
        jpeg_encode: false,
    };
    let engine = orchestrator_with_codec(&server, None, codec);
    let mut req = request("red fox", vec![SourceKind::SearchApi], &out);
    req.options.convert_webp = true;

    let report = engine
        .run(req, &CancellationToken::new(), &TestSink::new())
        .await
        .unwrap();

    assert!(report.aborted);
    assert!(report.results.is_empty());
    assert_eq!(report.failures.len(), 1);
    assert!(!out.path().join("bing").exists());
}
