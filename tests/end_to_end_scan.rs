//! End-to-end coverage of a single target moving through the orchestrator,
//! the http stage, and storage: first-scan/second-scan diff behavior.

use std::sync::Arc;

use httpmock::MockServer;
use reconnoiter::event_bus::EventBus;
use reconnoiter::orchestrator::{Orchestrator, ScanOptions};
use reconnoiter::report::StageStatus;
use reconnoiter::stages::http::HttpStage;
use reconnoiter::storage::{InMemoryStorage, StorageManager};

fn http_only_orchestrator(storage: Arc<InMemoryStorage>) -> Orchestrator {
    let bus = EventBus::default();
    Orchestrator::new(bus.get_emitter())
        .with_pipeline(vec![Box::new(HttpStage::default())])
        .with_storage(storage)
}

#[tokio::test]
async fn first_scan_captures_headers_and_yields_no_diff() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(httpmock::Method::GET).path("/");
        then.status(200)
            .header("server", "nginx")
            .header("strict-transport-security", "max-age=63072000");
    });

    let storage = Arc::new(InMemoryStorage::new());
    let orchestrator = http_only_orchestrator(storage);

    let report = orchestrator.scan(&server.base_url(), ScanOptions::default()).await.unwrap();

    mock.assert();
    let http_result = report.results.get("http").unwrap();
    assert_eq!(http_result.status, Some(StageStatus::Ok));
    assert_eq!(http_result.fields.get("server").unwrap(), "nginx");
    assert_eq!(http_result.fields.get("hsts").unwrap(), true);
    assert_eq!(report.fingerprint.technologies.server.as_deref(), Some("nginx"));
}

#[tokio::test]
async fn second_scan_diffs_server_header_change() {
    let server = MockServer::start();
    let first_mock = server.mock(|when, then| {
        when.method(httpmock::Method::GET).path("/");
        then.status(200).header("server", "nginx");
    });

    let storage = Arc::new(InMemoryStorage::new());
    let orchestrator = http_only_orchestrator(storage.clone());

    orchestrator.scan(&server.base_url(), ScanOptions::default()).await.unwrap();
    first_mock.delete();

    server.mock(|when, then| {
        when.method(httpmock::Method::GET).path("/");
        then.status(200).header("server", "apache");
    });

    let report = orchestrator.scan(&server.base_url(), ScanOptions::default()).await.unwrap();
    assert_eq!(report.fingerprint.technologies.server.as_deref(), Some("apache"));

    let host = report.target.host.clone();
    let summary = storage.get_host_summary(&host).await.unwrap().unwrap();
    assert_eq!(summary.fingerprint.technologies.server.as_deref(), Some("apache"));
}

#[tokio::test]
async fn scan_with_no_storage_still_completes() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(httpmock::Method::GET).path("/");
        then.status(204);
    });

    let bus = EventBus::default();
    let orchestrator = Orchestrator::new(bus.get_emitter())
        .with_pipeline(vec![Box::new(HttpStage::default())]);

    let report = orchestrator.scan(&server.base_url(), ScanOptions::default()).await.unwrap();
    assert_eq!(report.status, "completed");
}
