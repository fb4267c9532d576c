//! End-to-end backfill tests against a mock API
//!
//! Exercise the full orchestration: range planning, the window loop, raw
//! dumps, fetch logging, ingestion, the abort-on-failure policy, and the
//! post-run empty-span guardrail.

use fitsync_core::client::{Credentials, TokenStore, WhoopClient};
use fitsync_core::config::{Config, WhoopConfig};
use fitsync_core::store::Store;
use fitsync_core::{run_backfill, BackfillParams};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct NullTokenStore;

impl TokenStore for NullTokenStore {
    fn persist_refresh_token(&self, _token: &str) -> fitsync_core::Result<()> {
        Ok(())
    }
}

async fn mock_token_endpoint(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-test",
            "expires_in": 3600
        })))
        .mount(server)
        .await;
}

async fn mock_collection(server: &MockServer, api_path: &str, records: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(api_path))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "records": records })))
        .mount(server)
        .await;
}

fn test_client(server: &MockServer) -> WhoopClient {
    let config = WhoopConfig {
        api_base: server.uri(),
        token_url: format!("{}/oauth/oauth2/token", server.uri()),
        ..WhoopConfig::default()
    };
    let mut client = WhoopClient::new(&config).unwrap();
    client.set_retry_pacing(Duration::from_millis(1), Duration::from_millis(4));
    client
}

fn two_day_params() -> BackfillParams {
    BackfillParams {
        since: Some("2025-12-01T00:00:00Z".to_string()),
        until: Some("2025-12-03T00:00:00Z".to_string()),
        chunk_hours: 24,
        ..BackfillParams::default()
    }
}

#[tokio::test]
async fn successful_backfill_persists_every_window() {
    let server = MockServer::start().await;
    mock_token_endpoint(&server).await;
    mock_collection(
        &server,
        "/cycle",
        json!([{"id": 1, "start": "2025-12-01T06:00:00Z", "updated_at": "2025-12-01T10:00:00Z"}]),
    )
    .await;
    mock_collection(&server, "/recovery", json!([{"cycle_id": 1}])).await;
    mock_collection(
        &server,
        "/activity/sleep",
        json!([{"id": "s1", "start": "2025-11-30T22:00:00Z"}]),
    )
    .await;
    mock_collection(&server, "/activity/workout", json!([])).await;

    let dir = tempfile::tempdir().unwrap();
    let config = Config::with_data_dir(dir.path().to_path_buf());
    let store = Store::open_in_memory().unwrap();
    let client = test_client(&server);
    let credentials = Credentials::new("cid", "secret", "rt");

    let report = run_backfill(
        &config,
        &store,
        &client,
        &credentials,
        &NullTokenStore,
        &two_day_params(),
    )
    .await
    .unwrap();

    assert!(report.ok, "error: {:?}", report.error);
    // four endpoints times two 24h windows
    assert_eq!(store.fetch_attempt_count(&report.run_id, false).unwrap(), 8);
    assert_eq!(store.fetch_attempt_count(&report.run_id, true).unwrap(), 0);
    // same record both windows: one identity
    assert_eq!(store.record_count("cycle").unwrap(), 1);
    assert_eq!(report.endpoints["cycle"].records, 2);
    assert_eq!(report.endpoints["workout"].records, 0);

    // raw dumps landed per (endpoint, window)
    let dumps = fitsync_core::rawfile::files_for_endpoint(&config.raw_dir(), "cycle").unwrap();
    assert_eq!(dumps.len(), 2);
}

#[tokio::test]
async fn window_failure_aborts_and_logs_untried_endpoints() {
    let server = MockServer::start().await;
    mock_token_endpoint(&server).await;
    mock_collection(
        &server,
        "/cycle",
        json!([{"id": 1, "start": "2025-12-01T06:00:00Z"}]),
    )
    .await;
    mock_collection(&server, "/recovery", json!([{"cycle_id": 1}])).await;
    // sleep is gone; 404 is non-retryable
    Mock::given(method("GET"))
        .and(path("/activity/sleep"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;
    mock_collection(&server, "/activity/workout", json!([])).await;

    let dir = tempfile::tempdir().unwrap();
    let config = Config::with_data_dir(dir.path().to_path_buf());
    let store = Store::open_in_memory().unwrap();
    let client = test_client(&server);
    let credentials = Credentials::new("cid", "secret", "rt");

    let report = run_backfill(
        &config,
        &store,
        &client,
        &credentials,
        &NullTokenStore,
        &two_day_params(),
    )
    .await
    .unwrap();

    assert!(!report.ok);
    assert!(report.error.as_deref().unwrap().contains("404"));
    // the first window aborted: cycle and recovery succeeded, then the
    // failing sleep plus the never-attempted workout were logged as failures
    assert_eq!(store.fetch_attempt_count(&report.run_id, false).unwrap(), 4);
    assert_eq!(store.fetch_attempt_count(&report.run_id, true).unwrap(), 2);
    // the failing window is the first one, not the whole range
    let (failed_start, _) = report.failed_window.as_ref().unwrap();
    assert!(failed_start.starts_with("2025-12-01T00:00:00"));
}

#[tokio::test]
async fn all_empty_always_populated_endpoints_trip_the_guardrail() {
    let server = MockServer::start().await;
    mock_token_endpoint(&server).await;
    for api_path in ["/cycle", "/recovery", "/activity/sleep", "/activity/workout"] {
        mock_collection(&server, api_path, json!([])).await;
    }

    let dir = tempfile::tempdir().unwrap();
    let config = Config::with_data_dir(dir.path().to_path_buf());
    let store = Store::open_in_memory().unwrap();
    let client = test_client(&server);
    let credentials = Credentials::new("cid", "secret", "rt");

    // eight 1h windows: each far below the 6h threshold, 8h in total
    let params = BackfillParams {
        since: Some("2025-12-01T00:00:00Z".to_string()),
        until: Some("2025-12-01T08:00:00Z".to_string()),
        chunk_hours: 1,
        ..BackfillParams::default()
    };

    let report = run_backfill(
        &config,
        &store,
        &client,
        &credentials,
        &NullTokenStore,
        &params,
    )
    .await
    .unwrap();

    assert!(!report.ok);
    let error = report.error.as_deref().unwrap();
    assert!(error.contains("zero records"), "unexpected error: {error}");
    assert!(error.contains("cycle"));
    assert!(error.contains("sleep"));
    // every window still fetched and logged as ok before the guardrail ran
    assert_eq!(store.fetch_attempt_count(&report.run_id, true).unwrap(), 0);
}

#[tokio::test]
async fn invalid_range_fails_before_any_run_is_recorded() {
    let server = MockServer::start().await;
    mock_token_endpoint(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let config = Config::with_data_dir(dir.path().to_path_buf());
    let store = Store::open_in_memory().unwrap();
    let client = test_client(&server);
    let credentials = Credentials::new("cid", "secret", "rt");

    let params = BackfillParams {
        since: Some("2025-12-05".to_string()),
        until: Some("2025-12-01".to_string()),
        ..BackfillParams::default()
    };

    let error = run_backfill(
        &config,
        &store,
        &client,
        &credentials,
        &NullTokenStore,
        &params,
    )
    .await
    .unwrap_err();
    assert!(matches!(error, fitsync_core::Error::InvalidRange(_)));
}
