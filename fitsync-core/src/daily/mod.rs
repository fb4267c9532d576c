//! Daily merge engine
//!
//! Pure transform from raw per-endpoint record batches to one row per
//! calendar date. Cycles are the spine; recovery and sleep left-join on the
//! cycle identity with a calendar-date fallback; workouts aggregate by date.
//! Missing optional inputs degrade to nulls and zeros. The only hard
//! requirement is a usable cycle start, and even that produces an explicitly
//! tagged empty table rather than an error.

mod join_keys;
mod records;
pub mod output;

pub use join_keys::{cycle_key, fallback_date, KeyStrategy, CYCLE_KEY_STRATEGIES};
pub use records::{Cycle, Recovery, SleepSession, Workout};

use chrono::NaiveDate;
use serde_json::Value;
use std::collections::BTreeMap;

const MS_PER_HOUR: f64 = 1000.0 * 60.0 * 60.0;

/// Why a build produced zero rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyReason {
    /// The cycle input was empty; nothing to anchor dates on.
    NoCycles,
    /// Cycles existed but none carried a parseable start timestamp.
    CyclesMissingStart,
}

/// The merged daily table. `empty_reason` is set only when `rows` is empty
/// because of missing required input, never for a legitimately quiet range.
#[derive(Debug)]
pub struct DailyTable {
    pub rows: Vec<DailyRow>,
    pub empty_reason: Option<EmptyReason>,
}

/// One fully merged day.
#[derive(Debug, Default)]
pub struct DailyRow {
    pub date: NaiveDate,

    // cycle
    pub cycle_id: Option<String>,
    pub cycle_start: Option<String>,
    pub cycle_end: Option<String>,
    pub timezone_offset: Option<String>,
    pub cycle_score_state: Option<String>,
    pub cycle_strain: Option<f64>,
    pub cycle_kilojoule: Option<f64>,
    pub cycle_avg_hr: Option<f64>,
    pub cycle_max_hr: Option<f64>,

    // recovery
    pub recovery_score: Option<f64>,
    pub hrv_rmssd_milli: Option<f64>,
    pub resting_hr: Option<f64>,
    pub spo2_pct: Option<f64>,
    pub skin_temp_c: Option<f64>,
    pub recovery_calibrating: Option<bool>,

    // sleep
    pub sleep_id: Option<String>,
    pub sleep_start: Option<String>,
    pub sleep_end: Option<String>,
    pub sleep_nap: Option<bool>,
    pub sleep_score_state: Option<String>,
    pub sleep_perf_pct: Option<f64>,
    pub sleep_eff_pct: Option<f64>,
    pub sleep_consistency_pct: Option<f64>,
    pub resp_rate: Option<f64>,
    pub sleep_need_baseline_milli: Option<f64>,
    pub sleep_need_from_debt_milli: Option<f64>,
    pub sleep_need_from_strain_milli: Option<f64>,
    pub sleep_need_from_nap_milli: Option<f64>,
    pub stage_in_bed_milli: Option<f64>,
    pub stage_awake_milli: Option<f64>,
    pub stage_light_milli: Option<f64>,
    pub stage_sws_milli: Option<f64>,
    pub stage_rem_milli: Option<f64>,
    pub stage_in_bed_hours: Option<f64>,
    pub stage_awake_hours: Option<f64>,
    pub stage_light_hours: Option<f64>,
    pub stage_sws_hours: Option<f64>,
    pub stage_rem_hours: Option<f64>,
    pub sleep_asleep_hours_est: Option<f64>,

    // workout aggregates; count-like fields default to zero, not null
    pub workout_count: u32,
    pub workout_minutes: f64,
    pub workout_strain_sum: f64,
    pub workout_kj_sum: f64,
    pub workout_avg_hr_mean: Option<f64>,
    pub workout_max_hr_max: Option<f64>,
}

#[derive(Debug, Default)]
struct WorkoutDay {
    count: u32,
    minutes: f64,
    strain_sum: f64,
    kj_sum: f64,
    avg_hr_values: Vec<f64>,
    max_hr: Option<f64>,
}

/// Merge raw batches into one row per date.
pub fn merge(
    cycles: &[Value],
    recoveries: &[Value],
    sleeps: &[Value],
    workouts: &[Value],
) -> DailyTable {
    if cycles.is_empty() {
        return DailyTable {
            rows: Vec::new(),
            empty_reason: Some(EmptyReason::NoCycles),
        };
    }

    let cycles: Vec<Cycle> = cycles.iter().map(Cycle::from_value).collect();
    let dated: Vec<&Cycle> = cycles.iter().filter(|c| c.date.is_some()).collect();
    if dated.is_empty() {
        tracing::warn!(
            cycles = cycles.len(),
            "No cycle carries a parseable start; daily table is empty"
        );
        return DailyTable {
            rows: Vec::new(),
            empty_reason: Some(EmptyReason::CyclesMissingStart),
        };
    }

    let recoveries: Vec<Recovery> = recoveries.iter().map(Recovery::from_value).collect();
    let sleeps: Vec<SleepSession> = sleeps.iter().map(SleepSession::from_value).collect();
    let workout_days = aggregate_workouts(workouts);

    // Recovery lookup: by cycle key where available, by date otherwise
    // (keeping the freshest recovery per date).
    let mut recovery_by_key: BTreeMap<&str, &Recovery> = BTreeMap::new();
    let mut recovery_by_date: BTreeMap<NaiveDate, &Recovery> = BTreeMap::new();
    for r in &recoveries {
        if let Some(key) = r.cycle_key.as_deref() {
            recovery_by_key.entry(key).or_insert(r);
        } else if let Some(date) = r.date {
            let slot = recovery_by_date.entry(date).or_insert(r);
            if r.joined_at > (*slot).joined_at {
                *slot = r;
            }
        }
    }

    // Sleep lookup with the same identity-or-date fallback. Multiple
    // sessions per key resolve to the non-nap one, then the latest start.
    let mut sleep_by_key: BTreeMap<&str, &SleepSession> = BTreeMap::new();
    let mut sleep_by_date: BTreeMap<NaiveDate, &SleepSession> = BTreeMap::new();
    for s in &sleeps {
        if let Some(key) = s.cycle_key.as_deref() {
            let slot = sleep_by_key.entry(key).or_insert(s);
            if sleep_outranks(s, slot) {
                *slot = s;
            }
        } else if let Some(date) = s.date {
            let slot = sleep_by_date.entry(date).or_insert(s);
            if sleep_outranks(s, slot) {
                *slot = s;
            }
        }
    }

    let mut rows: Vec<DailyRow> = Vec::with_capacity(dated.len());
    for cycle in dated {
        let date = cycle.date.unwrap_or_default();
        let mut row = DailyRow {
            date,
            cycle_id: cycle.id.clone(),
            cycle_start: cycle.start.clone(),
            cycle_end: cycle.end.clone(),
            timezone_offset: cycle.timezone_offset.clone(),
            cycle_score_state: cycle.score_state.clone(),
            cycle_strain: cycle.strain,
            cycle_kilojoule: cycle.kilojoule,
            cycle_avg_hr: cycle.avg_hr,
            cycle_max_hr: cycle.max_hr,
            ..Default::default()
        };

        let recovery = cycle
            .id
            .as_deref()
            .and_then(|id| recovery_by_key.get(id).copied())
            .or_else(|| recovery_by_date.get(&date).copied());
        if let Some(r) = recovery {
            row.recovery_score = r.score;
            row.hrv_rmssd_milli = r.hrv_rmssd_milli;
            row.resting_hr = r.resting_hr;
            row.spo2_pct = r.spo2_pct;
            row.skin_temp_c = r.skin_temp_c;
            row.recovery_calibrating = r.calibrating;
        }

        let sleep = cycle
            .id
            .as_deref()
            .and_then(|id| sleep_by_key.get(id).copied())
            .or_else(|| sleep_by_date.get(&date).copied());
        if let Some(s) = sleep {
            row.sleep_id = s.id.clone();
            row.sleep_start = s.start.clone();
            row.sleep_end = s.end.clone();
            row.sleep_nap = s.nap;
            row.sleep_score_state = s.score_state.clone();
            row.sleep_perf_pct = s.perf_pct;
            row.sleep_eff_pct = s.eff_pct;
            row.sleep_consistency_pct = s.consistency_pct;
            row.resp_rate = s.resp_rate;
            row.sleep_need_baseline_milli = s.need_baseline_milli;
            row.sleep_need_from_debt_milli = s.need_from_debt_milli;
            row.sleep_need_from_strain_milli = s.need_from_strain_milli;
            row.sleep_need_from_nap_milli = s.need_from_nap_milli;
            row.stage_in_bed_milli = s.stage_in_bed_milli;
            row.stage_awake_milli = s.stage_awake_milli;
            row.stage_light_milli = s.stage_light_milli;
            row.stage_sws_milli = s.stage_sws_milli;
            row.stage_rem_milli = s.stage_rem_milli;
        }

        // Milliseconds convert to hours strictly after the merge.
        row.stage_in_bed_hours = row.stage_in_bed_milli.map(|ms| ms / MS_PER_HOUR);
        row.stage_awake_hours = row.stage_awake_milli.map(|ms| ms / MS_PER_HOUR);
        row.stage_light_hours = row.stage_light_milli.map(|ms| ms / MS_PER_HOUR);
        row.stage_sws_hours = row.stage_sws_milli.map(|ms| ms / MS_PER_HOUR);
        row.stage_rem_hours = row.stage_rem_milli.map(|ms| ms / MS_PER_HOUR);
        if let (Some(in_bed), Some(awake)) = (row.stage_in_bed_hours, row.stage_awake_hours) {
            row.sleep_asleep_hours_est = Some(in_bed - awake);
        }

        if let Some(day) = workout_days.get(&date) {
            row.workout_count = day.count;
            row.workout_minutes = day.minutes;
            row.workout_strain_sum = day.strain_sum;
            row.workout_kj_sum = day.kj_sum;
            row.workout_avg_hr_mean = mean(&day.avg_hr_values);
            row.workout_max_hr_max = day.max_hr;
        }

        rows.push(row);
    }

    DailyTable {
        rows: collapse_by_date(rows),
        empty_reason: None,
    }
}

/// True when `candidate` should replace `current` as a cycle's sleep:
/// non-nap outranks nap (and either outranks unknown), then latest start.
fn sleep_outranks(candidate: &SleepSession, current: &SleepSession) -> bool {
    let rank = |s: &SleepSession| match s.nap {
        Some(false) => 0u8,
        Some(true) => 1,
        None => 2,
    };
    match rank(candidate).cmp(&rank(current)) {
        std::cmp::Ordering::Less => true,
        std::cmp::Ordering::Greater => false,
        std::cmp::Ordering::Equal => candidate.start_at > current.start_at,
    }
}

fn aggregate_workouts(workouts: &[Value]) -> BTreeMap<NaiveDate, WorkoutDay> {
    let mut days: BTreeMap<NaiveDate, WorkoutDay> = BTreeMap::new();
    for w in workouts.iter().map(Workout::from_value) {
        let Some(date) = w.date else { continue };
        let day = days.entry(date).or_default();
        day.count += 1;
        day.minutes += w.minutes.unwrap_or(0.0);
        day.strain_sum += w.strain.unwrap_or(0.0);
        day.kj_sum += w.kilojoule.unwrap_or(0.0);
        if let Some(hr) = w.avg_hr {
            day.avg_hr_values.push(hr);
        }
        if let Some(hr) = w.max_hr {
            day.max_hr = Some(day.max_hr.map_or(hr, |m: f64| m.max(hr)));
        }
    }
    days
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Collapse to exactly one row per date: non-aggregate fields take the first
/// row in stable date order, workout aggregates re-sum across the collapsed
/// rows, mean and max take the first row's values.
fn collapse_by_date(mut rows: Vec<DailyRow>) -> Vec<DailyRow> {
    rows.sort_by_key(|r| r.date);

    let mut collapsed: Vec<DailyRow> = Vec::with_capacity(rows.len());
    for row in rows {
        match collapsed.last_mut() {
            Some(kept) if kept.date == row.date => {
                kept.workout_count += row.workout_count;
                kept.workout_minutes += row.workout_minutes;
                kept.workout_strain_sum += row.workout_strain_sum;
                kept.workout_kj_sum += row.workout_kj_sum;
            }
            _ => collapsed.push(row),
        }
    }
    collapsed
}
