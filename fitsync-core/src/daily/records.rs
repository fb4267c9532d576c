//! Lenient typed views over raw vendor payloads
//!
//! Parsing here never fails a batch: a record missing a field just carries
//! `None` for it. The merge layer decides what missing data means. Nested
//! `score` sub-objects (recovery metrics, sleep need, stage summary) are
//! flattened into the views here so the merge works on flat fields.

use super::join_keys::{self, RECOVERY_DATE_FIELDS};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

fn get_str(record: &Value, field: &str) -> Option<String> {
    record.get(field)?.as_str().map(str::to_string)
}

fn get_bool(record: &Value, field: &str) -> Option<bool> {
    record.get(field)?.as_bool()
}

fn score_f64(record: &Value, field: &str) -> Option<f64> {
    record.get("score")?.get(field)?.as_f64()
}

fn parse_ts(record: &Value, field: &str) -> Option<DateTime<Utc>> {
    let s = record.get(field)?.as_str()?;
    crate::windows::parse_utc_timestamp(s).ok()
}

/// One physiological cycle, the spine of the daily table.
#[derive(Debug)]
pub struct Cycle {
    pub id: Option<String>,
    /// UTC calendar date of the cycle start; the daily grain.
    pub date: Option<NaiveDate>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub timezone_offset: Option<String>,
    pub score_state: Option<String>,
    pub strain: Option<f64>,
    pub kilojoule: Option<f64>,
    pub avg_hr: Option<f64>,
    pub max_hr: Option<f64>,
}

impl Cycle {
    pub fn from_value(record: &Value) -> Self {
        let id = record.get("id").and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        Self {
            id,
            date: parse_ts(record, "start").map(|t| t.date_naive()),
            start: get_str(record, "start"),
            end: get_str(record, "end"),
            timezone_offset: get_str(record, "timezone_offset"),
            score_state: get_str(record, "score_state"),
            strain: score_f64(record, "strain"),
            kilojoule: score_f64(record, "kilojoule"),
            avg_hr: score_f64(record, "average_heart_rate"),
            max_hr: score_f64(record, "max_heart_rate"),
        }
    }
}

/// One recovery record, joinable by cycle identity or calendar date.
#[derive(Debug)]
pub struct Recovery {
    pub cycle_key: Option<String>,
    /// Date fallback when no cycle identity exists under any known shape.
    pub date: Option<NaiveDate>,
    /// Timestamp used to keep only the freshest recovery per date.
    pub joined_at: Option<DateTime<Utc>>,
    pub score: Option<f64>,
    pub hrv_rmssd_milli: Option<f64>,
    pub resting_hr: Option<f64>,
    pub spo2_pct: Option<f64>,
    pub skin_temp_c: Option<f64>,
    pub calibrating: Option<bool>,
}

impl Recovery {
    pub fn from_value(record: &Value) -> Self {
        let joined_at = RECOVERY_DATE_FIELDS
            .iter()
            .find_map(|f| parse_ts(record, f));
        Self {
            cycle_key: join_keys::cycle_key(record),
            date: join_keys::fallback_date(record, &RECOVERY_DATE_FIELDS),
            joined_at,
            score: score_f64(record, "recovery_score"),
            hrv_rmssd_milli: score_f64(record, "hrv_rmssd_milli"),
            resting_hr: score_f64(record, "resting_heart_rate"),
            spo2_pct: score_f64(record, "spo2_percentage"),
            skin_temp_c: score_f64(record, "skin_temp_celsius"),
            calibrating: record
                .get("score")
                .and_then(|s| s.get("user_calibrating"))
                .and_then(Value::as_bool),
        }
    }
}

/// One sleep session with the nested need/stage scores flattened.
#[derive(Debug)]
pub struct SleepSession {
    pub id: Option<String>,
    pub cycle_key: Option<String>,
    /// Date fallback, derived from the session start.
    pub date: Option<NaiveDate>,
    /// Parsed start, for the latest-start tie-break.
    pub start_at: Option<DateTime<Utc>>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub nap: Option<bool>,
    pub score_state: Option<String>,
    pub perf_pct: Option<f64>,
    pub eff_pct: Option<f64>,
    pub consistency_pct: Option<f64>,
    pub resp_rate: Option<f64>,
    pub need_baseline_milli: Option<f64>,
    pub need_from_debt_milli: Option<f64>,
    pub need_from_strain_milli: Option<f64>,
    pub need_from_nap_milli: Option<f64>,
    pub stage_in_bed_milli: Option<f64>,
    pub stage_awake_milli: Option<f64>,
    pub stage_light_milli: Option<f64>,
    pub stage_sws_milli: Option<f64>,
    pub stage_rem_milli: Option<f64>,
}

impl SleepSession {
    pub fn from_value(record: &Value) -> Self {
        let need = |f: &str| {
            record
                .get("score")
                .and_then(|s| s.get("sleep_needed"))
                .and_then(|n| n.get(f))
                .and_then(Value::as_f64)
        };
        let stage = |f: &str| {
            record
                .get("score")
                .and_then(|s| s.get("stage_summary"))
                .and_then(|n| n.get(f))
                .and_then(Value::as_f64)
        };
        let start_at = parse_ts(record, "start");
        Self {
            id: get_str(record, "id"),
            cycle_key: join_keys::cycle_key(record),
            date: start_at.map(|t| t.date_naive()),
            start_at,
            start: get_str(record, "start"),
            end: get_str(record, "end"),
            nap: get_bool(record, "nap"),
            score_state: get_str(record, "score_state"),
            perf_pct: score_f64(record, "sleep_performance_percentage"),
            eff_pct: score_f64(record, "sleep_efficiency_percentage"),
            consistency_pct: score_f64(record, "sleep_consistency_percentage"),
            resp_rate: score_f64(record, "respiratory_rate"),
            need_baseline_milli: need("baseline_milli"),
            need_from_debt_milli: need("need_from_sleep_debt_milli"),
            need_from_strain_milli: need("need_from_recent_strain_milli"),
            need_from_nap_milli: need("need_from_recent_nap_milli"),
            stage_in_bed_milli: stage("total_in_bed_time_milli"),
            stage_awake_milli: stage("total_awake_time_milli"),
            stage_light_milli: stage("total_light_sleep_time_milli"),
            stage_sws_milli: stage("total_slow_wave_sleep_time_milli"),
            stage_rem_milli: stage("total_rem_sleep_time_milli"),
        }
    }
}

/// One workout, aggregated by date rather than joined on identity.
#[derive(Debug)]
pub struct Workout {
    pub date: Option<NaiveDate>,
    pub minutes: Option<f64>,
    pub strain: Option<f64>,
    pub kilojoule: Option<f64>,
    pub avg_hr: Option<f64>,
    pub max_hr: Option<f64>,
}

impl Workout {
    pub fn from_value(record: &Value) -> Self {
        let start = parse_ts(record, "start");
        let end = parse_ts(record, "end");
        let minutes = match (start, end) {
            (Some(start), Some(end)) => Some((end - start).num_seconds() as f64 / 60.0),
            _ => None,
        };
        Self {
            date: start.map(|t| t.date_naive()),
            minutes,
            strain: score_f64(record, "strain"),
            kilojoule: score_f64(record, "kilojoule"),
            avg_hr: score_f64(record, "average_heart_rate"),
            max_hr: score_f64(record, "max_heart_rate"),
        }
    }
}
