//! Historical backfill orchestration
//!
//! Slices the requested range into windows and walks them strictly in
//! chronological order. Each (window, endpoint) fetch persists as a unit:
//! raw dump, fetch-log row, then ingestion. A window failure is recorded
//! for every endpoint of that window, attempted or not, and aborts the
//! remaining windows; prior windows stay durably committed, so rerunning
//! from the failed window's start is safe and produces no duplicates.

use crate::client::{Credentials, TokenStore, Tokens, WhoopClient};
use crate::config::Config;
use crate::endpoints::{EndpointSpec, ENDPOINTS};
use crate::error::Result;
use crate::rawfile;
use crate::report::{RunReport, RunReportBuilder};
use crate::store::{FetchAttempt, Store};
use crate::windows::{compute_backfill_range, iter_windows, Window};
use chrono::Utc;
use serde::Serialize;

/// An endpoint whose windows all came back empty over a span longer than
/// this is treated as a data-quality failure rather than a quiet range.
const SUSPICIOUS_EMPTY_HOURS: f64 = 6.0;

/// Access-token refresh margin before expiry.
const TOKEN_EXPIRY_SKEW_SECS: u64 = 60;

/// Parameters for one backfill run.
#[derive(Debug, Serialize)]
pub struct BackfillParams {
    /// Range start: bare date or full timestamp. Alternative to `days`.
    pub since: Option<String>,
    /// Range start as "this many days back from the end".
    pub days: Option<u32>,
    /// Range end; defaults to now.
    pub until: Option<String>,
    /// Window size in hours.
    pub chunk_hours: u32,
    /// Page size per request, clamped to the vendor ceiling.
    pub limit: u32,
}

impl Default for BackfillParams {
    fn default() -> Self {
        Self {
            since: None,
            days: None,
            until: None,
            chunk_hours: 24,
            limit: 25,
        }
    }
}

/// Run a full backfill.
///
/// Range and auth problems fail fast with `Err` before any window runs.
/// Once the window loop starts, failures land in the returned report
/// (`ok: false` with the failing window) rather than in `Err`; `Err` past
/// that point means the run record itself could not be written.
pub async fn run_backfill(
    config: &Config,
    store: &Store,
    client: &WhoopClient,
    credentials: &Credentials,
    token_store: &dyn TokenStore,
    params: &BackfillParams,
) -> Result<RunReport> {
    let (start, end) = compute_backfill_range(
        params.since.as_deref(),
        params.days,
        params.until.as_deref(),
        Utc::now(),
    )?;
    let windows = iter_windows(start, end, params.chunk_hours)?;

    let mut tokens = client.refresh_access_token(credentials, token_store).await?;

    let run_id = uuid::Uuid::new_v4().to_string();
    let mut builder = RunReportBuilder::new("whoop-backfill", &run_id)
        .since(&start.to_rfc3339())
        .limit(params.limit)
        .chunk_hours(i64::from(params.chunk_hours));

    store.start_run(&run_id, Utc::now(), &serde_json::to_string(params)?)?;
    tracing::info!(run_id, %start, %end, chunk_hours = params.chunk_hours, "Backfill started");

    let mut error: Option<String> = None;

    'windows: for window in windows {
        if tokens.is_expired(TOKEN_EXPIRY_SKEW_SECS) {
            match client.refresh_access_token(credentials, token_store).await {
                Ok(fresh) => tokens = fresh,
                Err(e) => {
                    error = Some(e.to_string());
                    record_window_failure(store, &run_id, &window, &ENDPOINTS, &e.to_string())?;
                    builder.set_failed_window(&window);
                    break 'windows;
                }
            }
        }

        for (i, endpoint) in ENDPOINTS.iter().enumerate() {
            match fetch_and_persist(
                config,
                store,
                client,
                &tokens,
                &run_id,
                endpoint,
                &window,
                params.limit,
            )
            .await
            {
                Ok((records, pages)) => builder.add_endpoint(endpoint.name, records, pages),
                Err(e) => {
                    let message = e.to_string();
                    tracing::error!(
                        endpoint = endpoint.name,
                        window_start = %window.start_iso(),
                        error = %message,
                        "Window fetch failed, aborting backfill"
                    );
                    // The failing endpoint and every endpoint this window
                    // never reached all get a fetch-log row.
                    record_window_failure(store, &run_id, &window, &ENDPOINTS[i..], &message)?;
                    builder.set_failed_window(&window);
                    error = Some(message);
                    break 'windows;
                }
            }
        }
    }

    if error.is_none() {
        if let Some(message) = empty_span_guardrail(store, &run_id)? {
            tracing::error!(run_id, %message, "Post-backfill guardrail tripped");
            error = Some(message);
        }
    }

    store.finish_run(&run_id, Utc::now(), error.is_none(), error.as_deref())?;

    let report = builder.finalize(error);
    tracing::info!(
        run_id = %report.run_id,
        ok = report.ok,
        duration_s = report.duration_s,
        "Backfill finished"
    );
    Ok(report)
}

/// Fetch one (endpoint, window) pair and persist it: raw dump first, then
/// the fetch-log row, then ingestion. Returns (records, pages).
#[allow(clippy::too_many_arguments)]
pub(crate) async fn fetch_and_persist(
    config: &Config,
    store: &Store,
    client: &WhoopClient,
    tokens: &Tokens,
    run_id: &str,
    endpoint: &EndpointSpec,
    window: &Window,
    limit: u32,
) -> Result<(usize, u32)> {
    let outcome = client
        .fetch_collection(
            tokens.access_token_str(),
            endpoint.path,
            Some(&window.start_iso()),
            Some(&window.end_iso()),
            limit,
        )
        .await?;

    let raw_path = rawfile::write_raw_json(
        &config.raw_dir(),
        endpoint.name,
        Utc::now(),
        &outcome.records,
    )?;

    store.log_fetch(&FetchAttempt {
        run_id,
        endpoint: endpoint.name,
        window_start: window.start,
        window_end: window.end,
        status_code: Some(200),
        ok: true,
        record_count: outcome.records.len(),
        raw_path: Some(&raw_path.to_string_lossy()),
        error: None,
    })?;

    store.ingest(endpoint.name, &outcome.records, &endpoint.id, endpoint.updated_at)?;

    tracing::debug!(
        endpoint = endpoint.name,
        window_start = %window.start_iso(),
        records = outcome.records.len(),
        pages = outcome.pages,
        "Window persisted"
    );

    Ok((outcome.records.len(), outcome.pages))
}

/// Log a failed attempt for every endpoint of an aborted window, preserving
/// the forensic record before the failure propagates.
fn record_window_failure(
    store: &Store,
    run_id: &str,
    window: &Window,
    endpoints: &[EndpointSpec],
    message: &str,
) -> Result<()> {
    for endpoint in endpoints {
        store.log_fetch(&FetchAttempt {
            run_id,
            endpoint: endpoint.name,
            window_start: window.start,
            window_end: window.end,
            status_code: None,
            ok: false,
            record_count: 0,
            raw_path: None,
            error: Some(&format!("window aborted: {message}")),
        })?;
    }
    Ok(())
}

/// Treat prolonged silence on the always-populated endpoints as failure: if
/// every successful window of such an endpoint returned zero records and
/// those windows together span more than the threshold, the run is
/// suspicious regardless of chunk size.
fn empty_span_guardrail(store: &Store, run_id: &str) -> Result<Option<String>> {
    let mut suspicious = Vec::new();
    for span in store.zero_record_spans(run_id)? {
        let always_populated = crate::endpoints::endpoint(&span.endpoint)
            .map(|e| e.always_populated)
            .unwrap_or(false);
        if always_populated && span.hours > SUSPICIOUS_EMPTY_HOURS {
            suspicious.push(format!("{} ({:.1}h empty)", span.endpoint, span.hours));
        }
    }
    if suspicious.is_empty() {
        Ok(None)
    } else {
        Ok(Some(
            crate::error::Error::DataQuality(format!(
                "zero records over a suspiciously long span: {}",
                suspicious.join(", ")
            ))
            .to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FetchAttempt;

    fn log_empty_ok_windows(store: &Store, run_id: &str, endpoint: &str, hours_each: i64, n: i64) {
        let start = crate::windows::parse_utc_timestamp("2025-12-01T00:00:00Z").unwrap();
        for i in 0..n {
            store
                .log_fetch(&FetchAttempt {
                    run_id,
                    endpoint,
                    window_start: start + chrono::Duration::hours(hours_each * i),
                    window_end: start + chrono::Duration::hours(hours_each * (i + 1)),
                    status_code: Some(200),
                    ok: true,
                    record_count: 0,
                    raw_path: None,
                    error: None,
                })
                .unwrap();
        }
    }

    #[test]
    fn guardrail_trips_on_small_chunks_summing_past_threshold() {
        let store = Store::open_in_memory().unwrap();
        store
            .start_run("r1", Utc::now(), "{}")
            .unwrap();
        // eight empty 1h windows: each below the threshold, together above it
        log_empty_ok_windows(&store, "r1", "cycle", 1, 8);

        let message = empty_span_guardrail(&store, "r1").unwrap();
        assert!(message.is_some());
        assert!(message.unwrap().contains("cycle"));
    }

    #[test]
    fn guardrail_ignores_optional_endpoints() {
        let store = Store::open_in_memory().unwrap();
        store.start_run("r1", Utc::now(), "{}").unwrap();
        // workouts can legitimately be absent for days
        log_empty_ok_windows(&store, "r1", "workout", 24, 5);

        assert!(empty_span_guardrail(&store, "r1").unwrap().is_none());
    }

    #[test]
    fn guardrail_stays_quiet_below_threshold() {
        let store = Store::open_in_memory().unwrap();
        store.start_run("r1", Utc::now(), "{}").unwrap();
        log_empty_ok_windows(&store, "r1", "cycle", 1, 4);

        assert!(empty_span_guardrail(&store, "r1").unwrap().is_none());
    }
}
