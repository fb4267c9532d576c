//! Run reporting and outward plumbing
//!
//! Every run, success or failure, produces one immutable [`RunReport`]. The
//! report feeds three sinks: a JSON metrics file per run, a formatted text
//! summary for the chat webhook, and (on success) the last-success state
//! file that later summaries reference.

use crate::config::NotifyConfig;
use crate::error::Result;
use crate::windows::Window;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Per-endpoint fetch totals for one run.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EndpointStats {
    pub records: usize,
    pub pages: u32,
}

/// Immutable summary of one completed run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub service: String,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_s: f64,
    pub ok: bool,
    pub error: Option<String>,
    pub since: Option<String>,
    pub since_hours: Option<i64>,
    pub limit: Option<u32>,
    pub chunk_hours: Option<i64>,
    pub endpoints: BTreeMap<String, EndpointStats>,
    pub outputs: BTreeMap<String, String>,
    /// The specific window a backfill aborted on, when it did.
    pub failed_window: Option<(String, String)>,
}

/// Accumulates run metadata through the window loop and finalizes once.
#[derive(Debug)]
pub struct RunReportBuilder {
    service: String,
    run_id: String,
    started_at: DateTime<Utc>,
    since: Option<String>,
    since_hours: Option<i64>,
    limit: Option<u32>,
    chunk_hours: Option<i64>,
    endpoints: BTreeMap<String, EndpointStats>,
    outputs: BTreeMap<String, String>,
    failed_window: Option<(String, String)>,
}

impl RunReportBuilder {
    pub fn new(service: &str, run_id: &str) -> Self {
        Self {
            service: service.to_string(),
            run_id: run_id.to_string(),
            started_at: Utc::now(),
            since: None,
            since_hours: None,
            limit: None,
            chunk_hours: None,
            endpoints: BTreeMap::new(),
            outputs: BTreeMap::new(),
            failed_window: None,
        }
    }

    pub fn since(mut self, since: &str) -> Self {
        self.since = Some(since.to_string());
        self
    }

    pub fn since_hours(mut self, hours: i64) -> Self {
        self.since_hours = Some(hours);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn chunk_hours(mut self, hours: i64) -> Self {
        self.chunk_hours = Some(hours);
        self
    }

    /// Accumulate fetch totals for one endpoint across windows.
    pub fn add_endpoint(&mut self, endpoint: &str, records: usize, pages: u32) {
        let stats = self.endpoints.entry(endpoint.to_string()).or_default();
        stats.records += records;
        stats.pages += pages;
    }

    pub fn add_output(&mut self, label: &str, path: &Path) {
        self.outputs
            .insert(label.to_string(), path.display().to_string());
    }

    pub fn set_failed_window(&mut self, window: &Window) {
        self.failed_window = Some((window.start_iso(), window.end_iso()));
    }

    /// Consume the builder; a non-empty `error` marks the run failed.
    pub fn finalize(self, error: Option<String>) -> RunReport {
        let finished_at = Utc::now();
        let duration = finished_at - self.started_at;
        RunReport {
            service: self.service,
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at,
            duration_s: (duration.num_milliseconds() as f64 / 1000.0).max(0.0),
            ok: error.is_none(),
            error,
            since: self.since,
            since_hours: self.since_hours,
            limit: self.limit,
            chunk_hours: self.chunk_hours,
            endpoints: self.endpoints,
            outputs: self.outputs,
            failed_window: self.failed_window,
        }
    }
}

/// Format a run summary for the chat webhook.
pub fn format_summary(report: &RunReport, last_success: Option<&LastSuccess>) -> String {
    let status = if report.ok { "SUCCESS" } else { "FAILURE" };
    let mut lines = vec![
        format!("*fitsync* - *{}* - {}", report.service, status),
        format!("Duration: `{:.1}s`", report.duration_s),
    ];

    if let Some(hours) = report.since_hours {
        lines.push(format!("since_hours: `{hours}`"));
    }
    if let Some(since) = &report.since {
        lines.push(format!("since: `{since}`"));
    }
    if let Some(limit) = report.limit {
        lines.push(format!("limit: `{limit}`"));
    }
    if let Some(hours) = report.chunk_hours {
        lines.push(format!("chunk_hours: `{hours}`"));
    }

    if !report.endpoints.is_empty() {
        lines.push("\n*Endpoints:*".to_string());
        for (name, stats) in &report.endpoints {
            if stats.pages > 0 {
                lines.push(format!(
                    "- `{}` records: `{}` pages: `{}`",
                    name, stats.records, stats.pages
                ));
            } else {
                lines.push(format!("- `{}` records: `{}`", name, stats.records));
            }
        }
    }

    if !report.outputs.is_empty() {
        lines.push("\n*Outputs:*".to_string());
        for (label, path) in &report.outputs {
            lines.push(format!("- `{label}`: `{path}`"));
        }
    }

    if let Some((start, end)) = &report.failed_window {
        lines.push(format!("\nFailed window: `{start}` .. `{end}`"));
    }

    if let Some(error) = &report.error {
        lines.push("\n*Error:*".to_string());
        // full details live in the log file
        let truncated: String = error.chars().take(900).collect();
        lines.push(format!("```{truncated}```"));
    }

    if let Some(last) = last_success {
        lines.push(format!(
            "\nLast success: <t:{}:R> ({})",
            last.ts, last.service
        ));
    }

    lines.join("\n")
}

/// Chat webhook sender. A missing URL means notifications are off; sending
/// then logs and returns instead of failing the run.
pub struct WebhookNotifier {
    url: Option<String>,
    channel: Option<String>,
    username: Option<String>,
    http: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(config: &NotifyConfig) -> Self {
        Self {
            url: config.webhook_url.clone(),
            channel: config.channel.clone(),
            username: config.username.clone(),
            http: reqwest::Client::new(),
        }
    }

    /// Post `text` to the webhook. Never fails the caller: notification
    /// problems are logged and swallowed so they cannot mask a run result.
    pub async fn send(&self, text: &str) {
        let Some(url) = &self.url else {
            tracing::debug!("No webhook URL configured, skipping notification");
            return;
        };

        let mut payload = serde_json::json!({ "text": text });
        if let Some(channel) = &self.channel {
            payload["channel"] = serde_json::json!(channel);
        }
        if let Some(username) = &self.username {
            payload["username"] = serde_json::json!(username);
        }

        match self.http.post(url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!("Notification sent");
            }
            Ok(response) => {
                tracing::warn!(status = %response.status(), "Webhook rejected notification");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to send notification");
            }
        }
    }
}

/// Write one JSON metrics file for the run. Named by service, start time
/// and outcome so a directory listing reads as a run history.
pub fn write_run_metrics(report: &RunReport, metrics_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(metrics_dir)?;
    let stamp = crate::rawfile::utc_stamp(report.started_at);
    let suffix = if report.ok { "ok" } else { "fail" };
    let path = metrics_dir.join(format!("{}_{}_{}.json", report.service, stamp, suffix));
    let body = serde_json::to_string_pretty(report)?;
    std::fs::write(&path, body + "\n")?;
    Ok(path)
}

/// Last successful run, for "last success: 2 hours ago" context lines.
#[derive(Debug, Serialize, Deserialize)]
pub struct LastSuccess {
    pub service: String,
    /// Unix seconds of the success.
    pub ts: i64,
    pub summary: String,
}

/// Read the last-success state. Any problem (missing file, bad JSON) reads
/// as "never succeeded" rather than an error.
pub fn read_last_success(path: &Path) -> Option<LastSuccess> {
    let text = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

pub fn write_last_success(path: &Path, service: &str, summary: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let state = LastSuccess {
        service: service.to_string(),
        ts: Utc::now().timestamp(),
        summary: summary.to_string(),
    };
    let body = serde_json::to_string_pretty(&state)?;
    std::fs::write(path, body + "\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report(ok: bool) -> RunReport {
        let mut builder = RunReportBuilder::new("whoop-backfill", "r1")
            .since("2025-12-01")
            .limit(25)
            .chunk_hours(24);
        builder.add_endpoint("cycle", 10, 2);
        builder.add_endpoint("cycle", 5, 1);
        builder.add_endpoint("sleep", 3, 1);
        builder.finalize(if ok {
            None
        } else {
            Some("remote error (HTTP 500): boom".to_string())
        })
    }

    #[test]
    fn endpoint_stats_accumulate_across_windows() {
        let report = sample_report(true);
        assert_eq!(report.endpoints["cycle"].records, 15);
        assert_eq!(report.endpoints["cycle"].pages, 3);
        assert!(report.ok);
    }

    #[test]
    fn failure_summary_carries_error_and_status() {
        let report = sample_report(false);
        assert!(!report.ok);
        let text = format_summary(&report, None);
        assert!(text.contains("FAILURE"));
        assert!(text.contains("HTTP 500"));
        assert!(text.contains("`cycle` records: `15` pages: `3`"));
    }

    #[test]
    fn summary_mentions_last_success() {
        let report = sample_report(true);
        let last = LastSuccess {
            service: "whoop-pull".to_string(),
            ts: 1_764_500_000,
            summary: String::new(),
        };
        let text = format_summary(&report, Some(&last));
        assert!(text.contains("<t:1764500000:R>"));
    }

    #[test]
    fn metrics_file_named_by_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_run_metrics(&sample_report(false), dir.path()).unwrap();
        let name = path.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("whoop-backfill_"));
        assert!(name.ends_with("_fail.json"));

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["ok"], false);
        assert_eq!(parsed["endpoints"]["sleep"]["records"], 3);
    }

    #[test]
    fn last_success_round_trip_and_corrupt_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_success.json");

        assert!(read_last_success(&path).is_none());
        write_last_success(&path, "whoop-pull", "ok").unwrap();
        let state = read_last_success(&path).unwrap();
        assert_eq!(state.service, "whoop-pull");
        assert!(state.ts > 0);

        std::fs::write(&path, "not json").unwrap();
        assert!(read_last_success(&path).is_none());
    }
}
