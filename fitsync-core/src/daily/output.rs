//! CSV writers for the merged daily table
//!
//! Two files per build: `daily_full.csv` with every column, and
//! `daily_core.csv` with a fixed metric subset written with `\n` line
//! endings and 6-decimal float formatting so successive builds diff cleanly.

use super::{DailyRow, DailyTable};
use crate::error::Result;
use std::path::{Path, PathBuf};

/// Columns of the core subset, in output order.
pub const CORE_COLUMNS: [&str; 19] = [
    "date",
    "recovery_score",
    "hrv_rmssd_milli",
    "resting_hr",
    "spo2_pct",
    "skin_temp_c",
    "sleep_perf_pct",
    "sleep_eff_pct",
    "sleep_consistency_pct",
    "resp_rate",
    "sleep_asleep_hours_est",
    "cycle_strain",
    "cycle_kilojoule",
    "cycle_avg_hr",
    "cycle_max_hr",
    "workout_count",
    "workout_minutes",
    "workout_strain_sum",
    "workout_kj_sum",
];

const FULL_COLUMNS: [&str; 46] = [
    "date",
    "cycle_id",
    "cycle_start",
    "cycle_end",
    "timezone_offset",
    "cycle_score_state",
    "cycle_strain",
    "cycle_kilojoule",
    "cycle_avg_hr",
    "cycle_max_hr",
    "recovery_score",
    "hrv_rmssd_milli",
    "resting_hr",
    "spo2_pct",
    "skin_temp_c",
    "recovery_calibrating",
    "sleep_id",
    "sleep_start",
    "sleep_end",
    "sleep_nap",
    "sleep_score_state",
    "sleep_perf_pct",
    "sleep_eff_pct",
    "sleep_consistency_pct",
    "resp_rate",
    "sleep_need_baseline_milli",
    "sleep_need_from_debt_milli",
    "sleep_need_from_strain_milli",
    "sleep_need_from_nap_milli",
    "stage_in_bed_milli",
    "stage_awake_milli",
    "stage_light_milli",
    "stage_sws_milli",
    "stage_rem_milli",
    "stage_in_bed_hours",
    "stage_awake_hours",
    "stage_light_hours",
    "stage_sws_hours",
    "stage_rem_hours",
    "sleep_asleep_hours_est",
    "workout_count",
    "workout_minutes",
    "workout_strain_sum",
    "workout_kj_sum",
    "workout_avg_hr_mean",
    "workout_max_hr_max",
];

/// Paths written by one build.
#[derive(Debug)]
pub struct DailyOutputs {
    pub full_csv: PathBuf,
    pub core_csv: PathBuf,
}

/// Write both CSVs. Headers are written even for an empty table so
/// downstream readers always find at least a `date` column.
pub fn write_daily_csvs(table: &DailyTable, out_dir: &Path) -> Result<DailyOutputs> {
    std::fs::create_dir_all(out_dir)?;
    let full_csv = out_dir.join("daily_full.csv");
    let core_csv = out_dir.join("daily_core.csv");

    write_full(table, &full_csv)?;
    write_core(table, &core_csv)?;

    tracing::info!(
        rows = table.rows.len(),
        full = %full_csv.display(),
        core = %core_csv.display(),
        "Daily CSVs written"
    );

    Ok(DailyOutputs { full_csv, core_csv })
}

fn fmt_float(v: Option<f64>) -> String {
    v.map(|v| format!("{:.6}", v)).unwrap_or_default()
}

fn fmt_bool(v: Option<bool>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

fn opt(v: &Option<String>) -> String {
    v.clone().unwrap_or_default()
}

fn write_full(table: &DailyTable, path: &Path) -> Result<()> {
    let mut w = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_path(path)?;
    w.write_record(FULL_COLUMNS)?;
    for row in &table.rows {
        w.write_record(full_record(row))?;
    }
    w.flush()?;
    Ok(())
}

fn write_core(table: &DailyTable, path: &Path) -> Result<()> {
    let mut w = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_path(path)?;
    w.write_record(CORE_COLUMNS)?;
    for row in &table.rows {
        w.write_record(core_record(row))?;
    }
    w.flush()?;
    Ok(())
}

fn full_record(r: &DailyRow) -> Vec<String> {
    vec![
        r.date.to_string(),
        opt(&r.cycle_id),
        opt(&r.cycle_start),
        opt(&r.cycle_end),
        opt(&r.timezone_offset),
        opt(&r.cycle_score_state),
        fmt_float(r.cycle_strain),
        fmt_float(r.cycle_kilojoule),
        fmt_float(r.cycle_avg_hr),
        fmt_float(r.cycle_max_hr),
        fmt_float(r.recovery_score),
        fmt_float(r.hrv_rmssd_milli),
        fmt_float(r.resting_hr),
        fmt_float(r.spo2_pct),
        fmt_float(r.skin_temp_c),
        fmt_bool(r.recovery_calibrating),
        opt(&r.sleep_id),
        opt(&r.sleep_start),
        opt(&r.sleep_end),
        fmt_bool(r.sleep_nap),
        opt(&r.sleep_score_state),
        fmt_float(r.sleep_perf_pct),
        fmt_float(r.sleep_eff_pct),
        fmt_float(r.sleep_consistency_pct),
        fmt_float(r.resp_rate),
        fmt_float(r.sleep_need_baseline_milli),
        fmt_float(r.sleep_need_from_debt_milli),
        fmt_float(r.sleep_need_from_strain_milli),
        fmt_float(r.sleep_need_from_nap_milli),
        fmt_float(r.stage_in_bed_milli),
        fmt_float(r.stage_awake_milli),
        fmt_float(r.stage_light_milli),
        fmt_float(r.stage_sws_milli),
        fmt_float(r.stage_rem_milli),
        fmt_float(r.stage_in_bed_hours),
        fmt_float(r.stage_awake_hours),
        fmt_float(r.stage_light_hours),
        fmt_float(r.stage_sws_hours),
        fmt_float(r.stage_rem_hours),
        fmt_float(r.sleep_asleep_hours_est),
        r.workout_count.to_string(),
        format!("{:.6}", r.workout_minutes),
        format!("{:.6}", r.workout_strain_sum),
        format!("{:.6}", r.workout_kj_sum),
        fmt_float(r.workout_avg_hr_mean),
        fmt_float(r.workout_max_hr_max),
    ]
}

fn core_record(r: &DailyRow) -> Vec<String> {
    vec![
        r.date.to_string(),
        fmt_float(r.recovery_score),
        fmt_float(r.hrv_rmssd_milli),
        fmt_float(r.resting_hr),
        fmt_float(r.spo2_pct),
        fmt_float(r.skin_temp_c),
        fmt_float(r.sleep_perf_pct),
        fmt_float(r.sleep_eff_pct),
        fmt_float(r.sleep_consistency_pct),
        fmt_float(r.resp_rate),
        fmt_float(r.sleep_asleep_hours_est),
        fmt_float(r.cycle_strain),
        fmt_float(r.cycle_kilojoule),
        fmt_float(r.cycle_avg_hr),
        fmt_float(r.cycle_max_hr),
        r.workout_count.to_string(),
        format!("{:.6}", r.workout_minutes),
        format!("{:.6}", r.workout_strain_sum),
        format!("{:.6}", r.workout_kj_sum),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_table() -> DailyTable {
        let row = DailyRow {
            date: NaiveDate::from_ymd_opt(2025, 12, 1).unwrap(),
            cycle_id: Some("1".to_string()),
            cycle_strain: Some(11.4),
            recovery_score: Some(67.0),
            workout_count: 1,
            workout_minutes: 45.0,
            ..Default::default()
        };
        DailyTable {
            rows: vec![row],
            empty_reason: None,
        }
    }

    #[test]
    fn core_csv_has_fixed_columns_and_six_decimals() {
        let dir = tempfile::tempdir().unwrap();
        let outputs = write_daily_csvs(&sample_table(), dir.path()).unwrap();

        let text = std::fs::read_to_string(&outputs.core_csv).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), CORE_COLUMNS.join(","));
        let row = lines.next().unwrap();
        assert!(row.starts_with("2025-12-01,67.000000,"));
        assert!(row.contains("11.400000"));
        assert!(row.ends_with("1,45.000000,0.000000,0.000000"));
    }

    #[test]
    fn empty_table_still_writes_headers() {
        let dir = tempfile::tempdir().unwrap();
        let table = DailyTable {
            rows: Vec::new(),
            empty_reason: Some(crate::daily::EmptyReason::NoCycles),
        };
        let outputs = write_daily_csvs(&table, dir.path()).unwrap();

        let text = std::fs::read_to_string(&outputs.core_csv).unwrap();
        assert_eq!(text, CORE_COLUMNS.join(",") + "\n");
        let full = std::fs::read_to_string(&outputs.full_csv).unwrap();
        assert!(full.starts_with("date,"));
    }

    #[test]
    fn uses_unix_line_endings() {
        let dir = tempfile::tempdir().unwrap();
        let outputs = write_daily_csvs(&sample_table(), dir.path()).unwrap();
        let bytes = std::fs::read(&outputs.core_csv).unwrap();
        assert!(!bytes.windows(2).any(|w| w == b"\r\n"));
    }
}
