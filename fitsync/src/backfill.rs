//! fitsync-backfill - historical WHOOP data backfill
//!
//! Fetches every collection endpoint over an arbitrary past range in
//! chronological windows, persisting raw dumps and the SQLite store as it
//! goes, then reports the run outward.

use anyhow::{bail, Context, Result};
use clap::Parser;
use fitsync_core::report::{self, WebhookNotifier};
use fitsync_core::{BackfillParams, Config, Credentials, EnvFileTokenStore, Store, WhoopClient};

#[derive(Parser, Debug)]
#[command(name = "fitsync-backfill")]
#[command(about = "Backfill historical WHOOP data over a date range")]
struct Args {
    /// Range start: YYYY-MM-DD or a full timestamp (alternative to --days)
    #[arg(long)]
    since: Option<String>,

    /// Range start as days back from the end
    #[arg(long)]
    days: Option<u32>,

    /// Range end (defaults to now)
    #[arg(long)]
    until: Option<String>,

    /// Window size in hours
    #[arg(long, default_value_t = 24)]
    chunk_hours: u32,

    /// Page size per request (vendor caps at 25)
    #[arg(long, default_value_t = 25)]
    limit: u32,

    /// Print the planned windows and exit without fetching
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;
    let _log_guard =
        fitsync_core::logging::init(&config.logging).context("failed to initialize logging")?;
    config.ensure_dirs().context("failed to create data directories")?;

    let params = BackfillParams {
        since: args.since,
        days: args.days,
        until: args.until,
        chunk_hours: args.chunk_hours,
        limit: args.limit,
    };

    if args.dry_run {
        return print_windows(&params);
    }

    let credentials = Credentials::load().context("missing WHOOP credentials")?;
    let token_store = EnvFileTokenStore::at_default_path();
    let store = Store::open(config.database_path()).context("failed to open store")?;
    let client = WhoopClient::new(&config.whoop).context("failed to build API client")?;

    let report = fitsync_core::run_backfill(
        &config,
        &store,
        &client,
        &credentials,
        &token_store,
        &params,
    )
    .await
    .context("backfill run failed to record")?;

    let metrics_path = report::write_run_metrics(&report, &config.metrics_dir())
        .context("failed to write run metrics")?;
    tracing::info!(path = %metrics_path.display(), "Run metrics written");

    let last_success = report::read_last_success(&config.last_success_path());
    let summary = report::format_summary(&report, last_success.as_ref());
    WebhookNotifier::new(&config.notify).send(&summary).await;

    println!("{summary}");

    if report.ok {
        report::write_last_success(&config.last_success_path(), &report.service, &summary)
            .context("failed to record last success")?;
    } else {
        bail!(
            "backfill failed: {}",
            report.error.as_deref().unwrap_or("unknown error")
        );
    }

    Ok(())
}

fn print_windows(params: &BackfillParams) -> Result<()> {
    let (start, end) = fitsync_core::compute_backfill_range(
        params.since.as_deref(),
        params.days,
        params.until.as_deref(),
        chrono::Utc::now(),
    )?;
    let windows: Vec<_> = fitsync_core::iter_windows(start, end, params.chunk_hours)?.collect();

    println!(
        "Would fetch {} windows of {}h over [{}, {}):",
        windows.len(),
        params.chunk_hours,
        start.to_rfc3339(),
        end.to_rfc3339()
    );
    for window in windows {
        println!("  {} .. {}", window.start_iso(), window.end_iso());
    }
    Ok(())
}
