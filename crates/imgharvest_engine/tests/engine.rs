use std::time::Duration;

use imgharvest_core::{RunReport, ScrapeOptions, ScrapeRequest, SourceKind};
use imgharvest_engine::{EngineConfig, EngineEvent, EngineHandle};
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_results(server: &MockServer, delay: Duration) {
    let html = format!(
        r#"<html><body><a class="iusc" m='{{"murl":"{}/img/a.jpg"}}'></a></body></html>"#,
        server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/images/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(html, "text/html")
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

fn engine(server: &MockServer) -> EngineHandle {
    let mut config = EngineConfig::default();
    config.search_api.endpoint = format!("{}/images/search", server.uri());
    EngineHandle::new(config)
}

fn request(out: &std::path::Path) -> ScrapeRequest {
    ScrapeRequest::new(
        "red fox",
        vec![SourceKind::SearchApi],
        ScrapeOptions {
            limit: 3,
            output_dir: out.to_path_buf(),
            ..ScrapeOptions::default()
        },
    )
}

/// Blocks until the run's final report arrives.
fn finished(engine: &EngineHandle) -> RunReport {
    tokio::task::block_in_place(|| loop {
        match engine.recv() {
            Some(EngineEvent::RunFinished(report)) => return report,
            Some(_) => continue,
            None => panic!("engine thread exited without a report"),
        }
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_run_reports_cancellation_and_saves_nothing() {
    let server = MockServer::start().await;
    mount_results(&server, Duration::from_millis(300)).await;
    Mock::given(method("GET"))
        .and(path("/img/a.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![1u8; 8], "image/jpeg"))
        .expect(0)
        .mount(&server)
        .await;
    let out = tempdir().unwrap();
    let engine = engine(&server);

    engine.start(request(out.path()));
    engine.canceller().cancel();
    let report = finished(&engine);

    assert!(report.cancelled);
    assert!(report.failures.is_empty());
    assert!(report.results.iter().all(|result| result.saved == 0));
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelling_one_run_does_not_affect_the_next() {
    let server = MockServer::start().await;
    mount_results(&server, Duration::from_millis(200)).await;
    Mock::given(method("GET"))
        .and(path("/img/a.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![1u8; 8], "image/jpeg"))
        .mount(&server)
        .await;
    let (first_out, second_out) = (tempdir().unwrap(), tempdir().unwrap());
    let engine = engine(&server);

    engine.start(request(first_out.path()));
    engine.cancel();
    assert!(finished(&engine).cancelled);

    engine.start(request(second_out.path()));
    let report = finished(&engine);
    assert!(!report.cancelled);
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].saved, 1);
}
