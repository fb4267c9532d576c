//! Incremental pull orchestration
//!
//! The scheduled sibling of the backfill: one window from "now minus N
//! hours" to now, fetched and persisted through the same path, followed by
//! a daily dataset rebuild from the fresh raw dumps.

use crate::client::{Credentials, TokenStore, WhoopClient};
use crate::config::Config;
use crate::endpoints::ENDPOINTS;
use crate::error::Result;
use crate::pipeline;
use crate::report::{RunReport, RunReportBuilder};
use crate::store::{FetchAttempt, Store};
use crate::windows::Window;
use chrono::{Duration, Utc};
use serde::Serialize;

/// Parameters for one incremental pull.
#[derive(Debug, Serialize)]
pub struct PullParams {
    /// How far back to fetch.
    pub since_hours: i64,
    /// Page size per request, clamped to the vendor ceiling.
    pub limit: u32,
}

impl Default for PullParams {
    fn default() -> Self {
        Self {
            since_hours: 24,
            limit: 25,
        }
    }
}

/// Run one incremental pull and rebuild the daily dataset.
///
/// Same failure shape as the backfill: auth problems fail fast with `Err`,
/// fetch and build failures land in the returned report.
pub async fn run_pull(
    config: &Config,
    store: &Store,
    client: &WhoopClient,
    credentials: &Credentials,
    token_store: &dyn TokenStore,
    params: &PullParams,
) -> Result<RunReport> {
    let now = Utc::now();
    let window = Window {
        start: now - Duration::hours(params.since_hours),
        end: now,
    };

    let tokens = client.refresh_access_token(credentials, token_store).await?;

    let run_id = uuid::Uuid::new_v4().to_string();
    let mut builder = RunReportBuilder::new("whoop-pull", &run_id)
        .since_hours(params.since_hours)
        .limit(params.limit);

    store.start_run(&run_id, now, &serde_json::to_string(params)?)?;
    tracing::info!(run_id, since_hours = params.since_hours, "Pull started");

    let mut error: Option<String> = None;

    for (i, endpoint) in ENDPOINTS.iter().enumerate() {
        match crate::backfill::fetch_and_persist(
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
                tracing::error!(endpoint = endpoint.name, error = %message, "Pull fetch failed");
                for remaining in &ENDPOINTS[i..] {
                    store.log_fetch(&FetchAttempt {
                        run_id: &run_id,
                        endpoint: remaining.name,
                        window_start: window.start,
                        window_end: window.end,
                        status_code: None,
                        ok: false,
                        record_count: 0,
                        raw_path: None,
                        error: Some(&format!("pull aborted: {message}")),
                    })?;
                }
                builder.set_failed_window(&window);
                error = Some(message);
                break;
            }
        }
    }

    if error.is_none() {
        match pipeline::build_daily_from_latest_raw(config) {
            Ok(build) => {
                builder.add_output("daily_full", &build.outputs.full_csv);
                builder.add_output("daily_core", &build.outputs.core_csv);
            }
            Err(e) => {
                error = Some(e.to_string());
            }
        }
    }

    store.finish_run(&run_id, Utc::now(), error.is_none(), error.as_deref())?;

    let report = builder.finalize(error);
    tracing::info!(run_id = %report.run_id, ok = report.ok, "Pull finished");
    Ok(report)
}
