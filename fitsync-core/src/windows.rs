//! Backfill range resolution and window slicing
//!
//! A backfill covers a `[start, end)` interval in UTC, sliced into contiguous
//! fixed-size windows sized to what the vendor API can serve per request.
//! All boundaries live in UTC so daylight-saving transitions never shift a
//! window edge.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

/// A bounded `[start, end)` time slice of a backfill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    /// Window span in fractional hours.
    pub fn hours(&self) -> f64 {
        (self.end - self.start).num_seconds() as f64 / 3600.0
    }

    /// ISO-8601 start bound, as sent to the vendor API.
    pub fn start_iso(&self) -> String {
        self.start.to_rfc3339()
    }

    /// ISO-8601 end bound, as sent to the vendor API.
    pub fn end_iso(&self) -> String {
        self.end.to_rfc3339()
    }
}

/// Parse a user-supplied timestamp into UTC.
///
/// Accepts:
/// - `YYYY-MM-DD` (treated as UTC midnight)
/// - RFC 3339 timestamps (converted to UTC)
/// - naive `YYYY-MM-DDTHH:MM:SS` / `YYYY-MM-DD HH:MM:SS` (assumed UTC)
pub fn parse_utc_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    Err(Error::InvalidRange(format!("unparseable timestamp: {s:?}")))
}

/// Resolve the `[start, end)` interval for a backfill.
///
/// - `since` provided: start = since
/// - else `days` provided: start = end - days
/// - end = `until` if provided, else `now`
///
/// Fails with [`Error::InvalidRange`] when neither start source is given or
/// the resolved start is not strictly before the end.
pub fn compute_backfill_range(
    since: Option<&str>,
    days: Option<u32>,
    until: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let end = match until {
        Some(u) => parse_utc_timestamp(u)?,
        None => now,
    };

    let start = match (since, days) {
        (Some(s), _) => parse_utc_timestamp(s)?,
        (None, Some(d)) => end - Duration::days(i64::from(d)),
        (None, None) => {
            return Err(Error::InvalidRange(
                "either a start timestamp or a day count must be provided".to_string(),
            ))
        }
    };

    if start >= end {
        return Err(Error::InvalidRange(format!(
            "start >= end (start={start}, end={end})"
        )));
    }

    Ok((start, end))
}

/// Lazy iterator over contiguous windows covering `[start, end)`.
///
/// The final window is clipped to `end` and may be shorter than `chunk_hours`.
#[derive(Debug, Clone)]
pub struct Windows {
    cursor: DateTime<Utc>,
    end: DateTime<Utc>,
    step: Duration,
}

impl Iterator for Windows {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        if self.cursor >= self.end {
            return None;
        }
        let next = std::cmp::min(self.cursor + self.step, self.end);
        let window = Window {
            start: self.cursor,
            end: next,
        };
        self.cursor = next;
        Some(window)
    }
}

/// Slice `[start, end)` into contiguous windows of `chunk_hours`.
pub fn iter_windows(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    chunk_hours: u32,
) -> Result<Windows> {
    if chunk_hours == 0 {
        return Err(Error::InvalidRange("chunk_hours must be > 0".to_string()));
    }
    Ok(Windows {
        cursor: start,
        end,
        step: Duration::hours(i64::from(chunk_hours)),
    })
}
