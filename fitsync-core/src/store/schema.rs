//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: run log, fetch-attempt log, append-only raw records
    r#"
    CREATE TABLE IF NOT EXISTS run_log (
        run_id       TEXT PRIMARY KEY,
        started_at   TEXT NOT NULL,
        finished_at  TEXT,
        ok           INTEGER,
        params_json  TEXT NOT NULL,
        notes        TEXT
    );

    -- One row per (run, endpoint, window) attempt, failures included.
    -- Immutable once written; the forensic record of what each historical
    -- window returned.
    CREATE TABLE IF NOT EXISTS fetch_log (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id        TEXT NOT NULL,
        endpoint      TEXT NOT NULL,
        window_start  TEXT NOT NULL,
        window_end    TEXT NOT NULL,
        fetched_at    TEXT NOT NULL,
        status_code   INTEGER,
        ok            INTEGER NOT NULL,
        record_count  INTEGER NOT NULL,
        raw_path      TEXT,
        error         TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_fetch_log_run ON fetch_log(run_id, endpoint);

    -- Append-only store of vendor records, one row per identity. Rows are
    -- inserted on first sight and overwritten in place only by newer
    -- versions; never deleted.
    CREATE TABLE IF NOT EXISTS raw_records (
        endpoint      TEXT NOT NULL,
        record_id     TEXT NOT NULL,
        updated_at    TEXT,
        ingested_at   TEXT NOT NULL,
        payload_json  TEXT NOT NULL,
        UNIQUE(endpoint, record_id)
    );

    CREATE VIEW IF NOT EXISTS cycle_latest    AS SELECT * FROM raw_records WHERE endpoint = 'cycle';
    CREATE VIEW IF NOT EXISTS recovery_latest AS SELECT * FROM raw_records WHERE endpoint = 'recovery';
    CREATE VIEW IF NOT EXISTS sleep_latest    AS SELECT * FROM raw_records WHERE endpoint = 'sleep';
    CREATE VIEW IF NOT EXISTS workout_latest  AS SELECT * FROM raw_records WHERE endpoint = 'workout';
    "#,
];

/// Run any pending migrations.
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::debug!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for table in ["run_log", "fetch_log", "raw_records"] {
            let count: i64 = conn
                .query_row(
                    "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }

        let views: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'view' AND name LIKE '%_latest'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(views, 4);
    }

    #[test]
    fn raw_records_identity_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO raw_records (endpoint, record_id, ingested_at, payload_json) VALUES ('cycle', 'c1', 't', '{}')",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO raw_records (endpoint, record_id, ingested_at, payload_json) VALUES ('cycle', 'c1', 't', '{}')",
            [],
        );
        assert!(dup.is_err());
    }
}
