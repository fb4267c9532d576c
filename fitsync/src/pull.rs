//! fitsync-pull - scheduled incremental WHOOP pull
//!
//! Fetches the recent window for every endpoint, rebuilds the daily
//! dataset, and reports the run outward. Designed to run from a timer.

use anyhow::{bail, Context, Result};
use clap::Parser;
use fitsync_core::report::{self, WebhookNotifier};
use fitsync_core::{Config, Credentials, EnvFileTokenStore, PullParams, Store, WhoopClient};

#[derive(Parser, Debug)]
#[command(name = "fitsync-pull")]
#[command(about = "Pull recent WHOOP data and rebuild the daily dataset")]
struct Args {
    /// How many hours back to fetch
    #[arg(long, default_value_t = 24)]
    since_hours: i64,

    /// Page size per request (vendor caps at 25)
    #[arg(long, default_value_t = 25)]
    limit: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;
    let _log_guard =
        fitsync_core::logging::init(&config.logging).context("failed to initialize logging")?;
    config.ensure_dirs().context("failed to create data directories")?;

    let credentials = Credentials::load().context("missing WHOOP credentials")?;
    let token_store = EnvFileTokenStore::at_default_path();
    let store = Store::open(config.database_path()).context("failed to open store")?;
    let client = WhoopClient::new(&config.whoop).context("failed to build API client")?;

    let params = PullParams {
        since_hours: args.since_hours,
        limit: args.limit,
    };

    let report =
        fitsync_core::run_pull(&config, &store, &client, &credentials, &token_store, &params)
            .await
            .context("pull run failed to record")?;

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
            "pull failed: {}",
            report.error.as_deref().unwrap_or("unknown error")
        );
    }

    Ok(())
}
