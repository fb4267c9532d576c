//! Dataset builds
//!
//! Three ways to produce the daily CSVs: from the newest raw dump per
//! endpoint (the normal incremental path), from every raw dump on disk with
//! an optional range restriction (historical rebuilds), or from the
//! database's latest-per-identity view.

use crate::config::Config;
use crate::daily::output::{write_daily_csvs, DailyOutputs};
use crate::daily::{self, EmptyReason};
use crate::error::Result;
use crate::rawfile;
use crate::store::Store;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Result of one dataset build.
#[derive(Debug)]
pub struct DatasetBuild {
    pub outputs: DailyOutputs,
    pub row_count: usize,
    pub empty_reason: Option<EmptyReason>,
}

/// Build the daily dataset from the newest raw dump of each endpoint.
pub fn build_daily_from_latest_raw(config: &Config) -> Result<DatasetBuild> {
    let raw_dir = config.raw_dir();
    let cycles = rawfile::load_latest_raw(&raw_dir, "cycle")?;
    let recoveries = rawfile::load_latest_raw(&raw_dir, "recovery")?;
    let sleeps = rawfile::load_latest_raw(&raw_dir, "sleep")?;
    let workouts = rawfile::load_latest_raw(&raw_dir, "workout")?;

    finish_build(config, &cycles, &recoveries, &sleeps, &workouts)
}

/// Rebuild the daily dataset from every raw dump on disk, optionally
/// restricted to `[start, end)`. Used to validate backfills and rebuild
/// historical periods.
pub fn build_daily_from_all_raw(
    config: &Config,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<DatasetBuild> {
    let raw_dir = config.raw_dir();
    let mut cycles = rawfile::load_all_raw(&raw_dir, "cycle")?;
    let mut recoveries = rawfile::load_all_raw(&raw_dir, "recovery")?;
    let mut sleeps = rawfile::load_all_raw(&raw_dir, "sleep")?;
    let mut workouts = rawfile::load_all_raw(&raw_dir, "workout")?;

    if start.is_some() || end.is_some() {
        filter_by_range(&mut cycles, start, end, &["start", "end"]);
        filter_by_range(&mut sleeps, start, end, &["start", "end"]);
        filter_by_range(&mut workouts, start, end, &["start", "end"]);
        filter_by_range(
            &mut recoveries,
            start,
            end,
            &["created_at", "updated_at", "timestamp"],
        );
    }

    finish_build(config, &cycles, &recoveries, &sleeps, &workouts)
}

/// Build the daily dataset from the database's one-row-per-identity view.
pub fn build_daily_from_store(config: &Config, store: &Store) -> Result<DatasetBuild> {
    let cycles = store.latest_payloads("cycle")?;
    let recoveries = store.latest_payloads("recovery")?;
    let sleeps = store.latest_payloads("sleep")?;
    let workouts = store.latest_payloads("workout")?;

    finish_build(config, &cycles, &recoveries, &sleeps, &workouts)
}

fn finish_build(
    config: &Config,
    cycles: &[Value],
    recoveries: &[Value],
    sleeps: &[Value],
    workouts: &[Value],
) -> Result<DatasetBuild> {
    let table = daily::merge(cycles, recoveries, sleeps, workouts);
    if let Some(reason) = table.empty_reason {
        tracing::warn!(?reason, "Daily build produced no rows");
    }
    let outputs = write_daily_csvs(&table, &config.processed_dir())?;
    Ok(DatasetBuild {
        outputs,
        row_count: table.rows.len(),
        empty_reason: table.empty_reason,
    })
}

/// Keep records whose first present candidate timestamp falls in
/// `[start, end)`. A record with none of the candidate fields is kept; one
/// whose candidate value does not parse is dropped while a filter is active.
fn filter_by_range(
    records: &mut Vec<Value>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    candidates: &[&str],
) {
    records.retain(|record| {
        let field = candidates.iter().find(|f| record.get(**f).is_some());
        let Some(field) = field else { return true };

        let parsed = record
            .get(*field)
            .and_then(Value::as_str)
            .and_then(|s| crate::windows::parse_utc_timestamp(s).ok());
        let Some(ts) = parsed else { return false };

        start.map_or(true, |s| ts >= s) && end.map_or(true, |e| ts < e)
    });
}
