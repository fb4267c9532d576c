//! fitsync-build - rebuild the daily dataset without fetching
//!
//! Reads raw dumps (or the database) already on disk and regenerates the
//! daily CSVs. Useful after a backfill or for validating historical data.

use anyhow::{Context, Result};
use clap::Parser;
use fitsync_core::pipeline::{self, DatasetBuild};
use fitsync_core::{Config, Store};

#[derive(Parser, Debug)]
#[command(name = "fitsync-build")]
#[command(about = "Rebuild the daily dataset from stored raw data")]
struct Args {
    /// Rebuild from every raw dump instead of just the newest per endpoint
    #[arg(long)]
    all: bool,

    /// Restrict an --all rebuild to records at or after this timestamp
    #[arg(long)]
    start: Option<String>,

    /// Restrict an --all rebuild to records before this timestamp
    #[arg(long)]
    end: Option<String>,

    /// Build from the database's latest-per-identity view instead of raw files
    #[arg(long)]
    from_db: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;
    let _log_guard =
        fitsync_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let build = if args.from_db {
        let store = Store::open(config.database_path()).context("failed to open store")?;
        pipeline::build_daily_from_store(&config, &store)?
    } else if args.all || args.start.is_some() || args.end.is_some() {
        let start = args
            .start
            .as_deref()
            .map(fitsync_core::parse_utc_timestamp)
            .transpose()
            .context("invalid --start")?;
        let end = args
            .end
            .as_deref()
            .map(fitsync_core::parse_utc_timestamp)
            .transpose()
            .context("invalid --end")?;
        pipeline::build_daily_from_all_raw(&config, start, end)?
    } else {
        pipeline::build_daily_from_latest_raw(&config)?
    };

    print_build(&build);
    Ok(())
}

fn print_build(build: &DatasetBuild) {
    println!("Daily dataset built: {} rows", build.row_count);
    if let Some(reason) = build.empty_reason {
        println!("  (empty: {reason:?})");
    }
    println!("  full: {}", build.outputs.full_csv.display());
    println!("  core: {}", build.outputs.core_csv.display());
}
