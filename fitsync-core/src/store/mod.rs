//! SQLite-backed raw store
//!
//! Holds the run log, the per-window fetch log, and the append-only
//! `raw_records` table that keeps exactly one row per (endpoint, record_id)
//! identity. Ingestion is insert-or-update-if-newer: replaying an old raw
//! dump never clobbers a fresher version of the same record.

mod schema;

pub use schema::SCHEMA_VERSION;

use crate::endpoints::IdField;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// One fetch attempt to record in the fetch log.
#[derive(Debug)]
pub struct FetchAttempt<'a> {
    pub run_id: &'a str,
    pub endpoint: &'a str,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub status_code: Option<u16>,
    pub ok: bool,
    pub record_count: usize,
    pub raw_path: Option<&'a str>,
    pub error: Option<&'a str>,
}

/// One stored record, as read back from `raw_records`.
#[derive(Debug)]
pub struct RawRecord {
    pub record_id: String,
    pub updated_at: Option<DateTime<Utc>>,
    pub ingested_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Total hours of ok windows that returned zero records, per endpoint.
#[derive(Debug)]
pub struct ZeroSpan {
    pub endpoint: String,
    pub hours: f64,
}

/// Thread-safe handle to the database.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at the given path and run migrations.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::run_migrations(&conn)?;
        tracing::debug!(path = %path.display(), "Database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ---- run log ----

    pub fn start_run(&self, run_id: &str, started_at: DateTime<Utc>, params_json: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO run_log (run_id, started_at, params_json) VALUES (?1, ?2, ?3)",
            params![run_id, started_at.to_rfc3339(), params_json],
        )?;
        Ok(())
    }

    pub fn finish_run(
        &self,
        run_id: &str,
        finished_at: DateTime<Utc>,
        ok: bool,
        notes: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE run_log SET finished_at = ?2, ok = ?3, notes = ?4 WHERE run_id = ?1",
            params![run_id, finished_at.to_rfc3339(), ok as i64, notes],
        )?;
        Ok(())
    }

    // ---- fetch log ----

    /// Record one fetch attempt. Every (endpoint, window) pair a run touches
    /// gets a row, including failures and never-attempted pairs of an
    /// aborted window.
    pub fn log_fetch(&self, attempt: &FetchAttempt<'_>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO fetch_log
             (run_id, endpoint, window_start, window_end, fetched_at,
              status_code, ok, record_count, raw_path, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                attempt.run_id,
                attempt.endpoint,
                attempt.window_start.to_rfc3339(),
                attempt.window_end.to_rfc3339(),
                Utc::now().to_rfc3339(),
                attempt.status_code,
                attempt.ok as i64,
                attempt.record_count as i64,
                attempt.raw_path,
                attempt.error,
            ],
        )?;
        Ok(())
    }

    /// Number of fetch-log rows for a run, optionally filtered to failures.
    pub fn fetch_attempt_count(&self, run_id: &str, failed_only: bool) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let sql = if failed_only {
            "SELECT count(*) FROM fetch_log WHERE run_id = ?1 AND ok = 0"
        } else {
            "SELECT count(*) FROM fetch_log WHERE run_id = ?1"
        };
        let count: i64 = conn.query_row(sql, [run_id], |r| r.get(0))?;
        Ok(count as usize)
    }

    // ---- raw records ----

    /// Ingest a batch of records for one endpoint. Returns the number of
    /// newly inserted identities (updates and skips do not count).
    ///
    /// A record missing its identity field is skipped with a debug log, not
    /// an error. An existing row is overwritten only when the incoming
    /// version is at least as new, where "newness" compares `updated_at`
    /// timestamps and a missing timestamp on either side always lets the
    /// incoming record win.
    pub fn ingest(
        &self,
        endpoint: &str,
        records: &[serde_json::Value],
        id: &IdField,
        updated_at_field: Option<&str>,
    ) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut inserted = 0usize;

        for record in records {
            let Some(record_id) = id.extract(record) else {
                tracing::debug!(endpoint, "Skipping record with no identity");
                continue;
            };

            let incoming_updated = updated_at_field
                .and_then(|f| record.get(f))
                .and_then(|v| v.as_str())
                .and_then(|s| crate::windows::parse_utc_timestamp(s).ok());

            let stored_updated: Option<Option<String>> = tx
                .query_row(
                    "SELECT updated_at FROM raw_records WHERE endpoint = ?1 AND record_id = ?2",
                    params![endpoint, record_id],
                    |r| r.get(0),
                )
                .optional()?;

            match stored_updated {
                None => {
                    tx.execute(
                        "INSERT INTO raw_records
                         (endpoint, record_id, updated_at, ingested_at, payload_json)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![
                            endpoint,
                            record_id,
                            incoming_updated.map(|t| t.to_rfc3339()),
                            now,
                            record.to_string(),
                        ],
                    )?;
                    inserted += 1;
                }
                Some(stored) => {
                    let stored_parsed = stored
                        .as_deref()
                        .and_then(|s| crate::windows::parse_utc_timestamp(s).ok());
                    let overwrite = match (incoming_updated, stored_parsed) {
                        (Some(incoming), Some(stored)) => incoming >= stored,
                        // missing timestamp on either side: take the incoming
                        _ => true,
                    };
                    if overwrite {
                        tx.execute(
                            "UPDATE raw_records
                             SET updated_at = COALESCE(?3, updated_at),
                                 ingested_at = ?4,
                                 payload_json = ?5
                             WHERE endpoint = ?1 AND record_id = ?2",
                            params![
                                endpoint,
                                record_id,
                                incoming_updated.map(|t| t.to_rfc3339()),
                                now,
                                record.to_string(),
                            ],
                        )?;
                    }
                }
            }
        }

        tx.commit()?;
        tracing::debug!(endpoint, total = records.len(), inserted, "Batch ingested");
        Ok(inserted)
    }

    /// All stored records for an endpoint, freshest first.
    pub fn latest_records(&self, endpoint: &str) -> Result<Vec<RawRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT record_id, updated_at, ingested_at, payload_json
             FROM raw_records WHERE endpoint = ?1
             ORDER BY CASE WHEN updated_at IS NULL THEN 1 ELSE 0 END,
                      updated_at DESC, ingested_at DESC",
        )?;
        let rows = stmt.query_map([endpoint], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, Option<String>>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (record_id, updated_at, ingested_at, payload_json) = row?;
            let payload: serde_json::Value = serde_json::from_str(&payload_json)?;
            let ingested_at = crate::windows::parse_utc_timestamp(&ingested_at)
                .map_err(|e| Error::Config(format!("corrupt ingested_at: {e}")))?;
            records.push(RawRecord {
                record_id,
                updated_at: updated_at
                    .as_deref()
                    .and_then(|s| crate::windows::parse_utc_timestamp(s).ok()),
                ingested_at,
                payload,
            });
        }
        Ok(records)
    }

    /// Just the payloads for an endpoint, freshest first.
    pub fn latest_payloads(&self, endpoint: &str) -> Result<Vec<serde_json::Value>> {
        Ok(self
            .latest_records(endpoint)?
            .into_iter()
            .map(|r| r.payload)
            .collect())
    }

    pub fn record_count(&self, endpoint: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT count(*) FROM raw_records WHERE endpoint = ?1",
            [endpoint],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    // ---- data-quality queries ----

    /// For each endpoint where every successful window of a run came back
    /// empty, the total span of those windows in hours. Endpoints with at
    /// least one non-empty window do not appear.
    pub fn zero_record_spans(&self, run_id: &str) -> Result<Vec<ZeroSpan>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT endpoint,
                    SUM((julianday(window_end) - julianday(window_start)) * 24.0)
             FROM fetch_log
             WHERE run_id = ?1 AND ok = 1
             GROUP BY endpoint
             HAVING MAX(record_count) = 0",
        )?;
        let rows = stmt.query_map([run_id], |r| {
            Ok(ZeroSpan {
                endpoint: r.get(0)?,
                hours: r.get(1)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn insert_then_replay_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let batch = vec![
            json!({"id": "c1", "updated_at": "2025-12-01T10:00:00Z", "score": 1}),
            json!({"id": "c2", "updated_at": "2025-12-01T11:00:00Z", "score": 2}),
        ];
        let inserted = store
            .ingest("cycle", &batch, &IdField::Plain("id"), Some("updated_at"))
            .unwrap();
        assert_eq!(inserted, 2);

        let inserted = store
            .ingest("cycle", &batch, &IdField::Plain("id"), Some("updated_at"))
            .unwrap();
        assert_eq!(inserted, 0);
        assert_eq!(store.record_count("cycle").unwrap(), 2);
    }

    #[test]
    fn older_version_never_clobbers_newer() {
        let store = Store::open_in_memory().unwrap();
        let newer = vec![json!({"id": "c1", "updated_at": "2025-12-02T00:00:00Z", "v": "new"})];
        let older = vec![json!({"id": "c1", "updated_at": "2025-12-01T00:00:00Z", "v": "old"})];

        store
            .ingest("cycle", &newer, &IdField::Plain("id"), Some("updated_at"))
            .unwrap();
        store
            .ingest("cycle", &older, &IdField::Plain("id"), Some("updated_at"))
            .unwrap();

        let records = store.latest_records("cycle").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload["v"], "new");
    }

    #[test]
    fn equal_timestamp_takes_the_incoming_payload() {
        let store = Store::open_in_memory().unwrap();
        let first = vec![json!({"id": "c1", "updated_at": "2025-12-01T00:00:00Z", "v": 1})];
        let second = vec![json!({"id": "c1", "updated_at": "2025-12-01T00:00:00Z", "v": 2})];

        store
            .ingest("cycle", &first, &IdField::Plain("id"), Some("updated_at"))
            .unwrap();
        store
            .ingest("cycle", &second, &IdField::Plain("id"), Some("updated_at"))
            .unwrap();

        let records = store.latest_records("cycle").unwrap();
        assert_eq!(records[0].payload["v"], 2);
    }

    #[test]
    fn missing_timestamp_on_either_side_lets_incoming_win() {
        let store = Store::open_in_memory().unwrap();
        let stamped = vec![json!({"id": "c1", "updated_at": "2025-12-02T00:00:00Z", "v": "a"})];
        let unstamped = vec![json!({"id": "c1", "v": "b"})];

        store
            .ingest("cycle", &stamped, &IdField::Plain("id"), Some("updated_at"))
            .unwrap();
        store
            .ingest("cycle", &unstamped, &IdField::Plain("id"), Some("updated_at"))
            .unwrap();

        let records = store.latest_records("cycle").unwrap();
        assert_eq!(records[0].payload["v"], "b");
        // updated_at survives via COALESCE when the incoming record has none
        assert!(records[0].updated_at.is_some());
    }

    #[test]
    fn records_without_identity_are_skipped() {
        let store = Store::open_in_memory().unwrap();
        let batch = vec![
            json!({"id": "c1"}),
            json!({"no_id_here": true}),
            json!({"id": ""}),
        ];
        let inserted = store
            .ingest("cycle", &batch, &IdField::Plain("id"), Some("updated_at"))
            .unwrap();
        assert_eq!(inserted, 1);
    }

    #[test]
    fn recovery_uses_composite_identity() {
        let store = Store::open_in_memory().unwrap();
        let batch = vec![
            json!({"cycle_id": 1, "sleep_id": "s1"}),
            json!({"cycle_id": 1, "sleep_id": "s2"}),
            json!({"cycle_id": 2}),
        ];
        let inserted = store
            .ingest("recovery", &batch, &IdField::CycleSleep, Some("updated_at"))
            .unwrap();
        assert_eq!(inserted, 3);
    }

    #[test]
    fn latest_records_orders_fresh_first_and_null_last() {
        let store = Store::open_in_memory().unwrap();
        let batch = vec![
            json!({"id": "old", "updated_at": "2025-12-01T00:00:00Z"}),
            json!({"id": "new", "updated_at": "2025-12-03T00:00:00Z"}),
            json!({"id": "unstamped"}),
        ];
        store
            .ingest("cycle", &batch, &IdField::Plain("id"), Some("updated_at"))
            .unwrap();

        let ids: Vec<String> = store
            .latest_records("cycle")
            .unwrap()
            .into_iter()
            .map(|r| r.record_id)
            .collect();
        assert_eq!(ids, vec!["new", "old", "unstamped"]);
    }

    #[test]
    fn run_and_fetch_log_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        store.start_run("r1", now, "{}").unwrap();
        store
            .log_fetch(&FetchAttempt {
                run_id: "r1",
                endpoint: "cycle",
                window_start: now,
                window_end: now,
                status_code: Some(200),
                ok: true,
                record_count: 3,
                raw_path: Some("/tmp/x.json"),
                error: None,
            })
            .unwrap();
        store
            .log_fetch(&FetchAttempt {
                run_id: "r1",
                endpoint: "sleep",
                window_start: now,
                window_end: now,
                status_code: Some(500),
                ok: false,
                record_count: 0,
                raw_path: None,
                error: Some("server error"),
            })
            .unwrap();
        store.finish_run("r1", now, false, Some("aborted")).unwrap();

        assert_eq!(store.fetch_attempt_count("r1", false).unwrap(), 2);
        assert_eq!(store.fetch_attempt_count("r1", true).unwrap(), 1);
    }

    #[test]
    fn zero_spans_sum_only_all_empty_endpoints() {
        let store = Store::open_in_memory().unwrap();
        let start = crate::windows::parse_utc_timestamp("2025-12-01T00:00:00Z").unwrap();
        store.start_run("r1", start, "{}").unwrap();

        // cycle: two empty 4h windows -> 8h total
        for i in 0..2 {
            store
                .log_fetch(&FetchAttempt {
                    run_id: "r1",
                    endpoint: "cycle",
                    window_start: start + chrono::Duration::hours(4 * i),
                    window_end: start + chrono::Duration::hours(4 * (i + 1)),
                    status_code: Some(200),
                    ok: true,
                    record_count: 0,
                    raw_path: None,
                    error: None,
                })
                .unwrap();
        }
        // sleep: one empty, one populated -> excluded
        for (i, count) in [(0, 0usize), (1, 5)] {
            store
                .log_fetch(&FetchAttempt {
                    run_id: "r1",
                    endpoint: "sleep",
                    window_start: start + chrono::Duration::hours(4 * i),
                    window_end: start + chrono::Duration::hours(4 * (i + 1)),
                    status_code: Some(200),
                    ok: true,
                    record_count: count,
                    raw_path: None,
                    error: None,
                })
                .unwrap();
        }

        let spans = store.zero_record_spans("r1").unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].endpoint, "cycle");
        assert!((spans[0].hours - 8.0).abs() < 1e-6);
    }
}
