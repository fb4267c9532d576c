//! Raw JSON dump files
//!
//! Every fetch writes its records verbatim to a timestamped file under the
//! raw directory before any parsing happens, so a bad merge can always be
//! re-run from disk. Filenames are `<endpoint>_<UTC stamp>.json` and sort
//! chronologically.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Filename-safe UTC stamp, second resolution.
pub fn utc_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H-%M-%SZ").to_string()
}

/// Write one raw dump for an endpoint. Returns the path written.
pub fn write_raw_json(
    raw_dir: &Path,
    endpoint: &str,
    at: DateTime<Utc>,
    records: &[serde_json::Value],
) -> Result<PathBuf> {
    std::fs::create_dir_all(raw_dir)?;
    let stamp = utc_stamp(at);
    let mut path = raw_dir.join(format!("{endpoint}_{stamp}.json"));
    // Second-resolution stamps can collide when windows persist quickly;
    // a numbered suffix keeps every dump and preserves sort order.
    let mut n = 1;
    while path.exists() {
        n += 1;
        path = raw_dir.join(format!("{endpoint}_{stamp}_{n}.json"));
    }
    let body = serde_json::to_string_pretty(records)?;
    std::fs::write(&path, body)?;
    tracing::debug!(path = %path.display(), records = records.len(), "Raw dump written");
    Ok(path)
}

/// All dump files for an endpoint, sorted ascending by name (and therefore
/// by capture time).
pub fn files_for_endpoint(raw_dir: &Path, endpoint: &str) -> Result<Vec<PathBuf>> {
    let pattern = raw_dir.join(format!("{endpoint}_*.json"));
    let pattern = pattern
        .to_str()
        .ok_or_else(|| Error::Config(format!("non-UTF-8 raw dir: {}", raw_dir.display())))?;

    let mut files: Vec<PathBuf> = glob::glob(pattern)
        .map_err(|e| Error::Config(format!("bad glob pattern: {e}")))?
        .filter_map(|entry| entry.ok())
        .collect();
    files.sort();
    Ok(files)
}

/// Load the newest dump for an endpoint. Erroring when none exists keeps a
/// misconfigured raw directory from silently producing an empty dataset.
pub fn load_latest_raw(raw_dir: &Path, endpoint: &str) -> Result<Vec<serde_json::Value>> {
    let files = files_for_endpoint(raw_dir, endpoint)?;
    match files.last() {
        Some(path) => read_records(path),
        None => Err(Error::Config(format!(
            "no raw files for endpoint '{}' under {}",
            endpoint,
            raw_dir.display()
        ))),
    }
}

/// Load and concatenate every dump for an endpoint, oldest first. An
/// endpoint with no dumps yields an empty batch.
pub fn load_all_raw(raw_dir: &Path, endpoint: &str) -> Result<Vec<serde_json::Value>> {
    let mut records = Vec::new();
    for path in files_for_endpoint(raw_dir, endpoint)? {
        records.extend(read_records(&path)?);
    }
    Ok(records)
}

fn read_records(path: &Path) -> Result<Vec<serde_json::Value>> {
    let text = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| Error::Config(format!("bad raw file {}: {e}", path.display())))?;
    match value {
        serde_json::Value::Array(records) => Ok(records),
        _ => Err(Error::Config(format!(
            "raw file {} is not a JSON array",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ts(s: &str) -> DateTime<Utc> {
        crate::windows::parse_utc_timestamp(s).unwrap()
    }

    #[test]
    fn write_then_load_latest_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let older = vec![json!({"id": "a"})];
        let newer = vec![json!({"id": "b"})];
        write_raw_json(dir.path(), "cycle", ts("2025-12-01T00:00:00Z"), &older).unwrap();
        write_raw_json(dir.path(), "cycle", ts("2025-12-02T00:00:00Z"), &newer).unwrap();

        let loaded = load_latest_raw(dir.path(), "cycle").unwrap();
        assert_eq!(loaded, newer);
    }

    #[test]
    fn load_all_concatenates_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        write_raw_json(
            dir.path(),
            "sleep",
            ts("2025-12-02T00:00:00Z"),
            &[json!({"id": "b"})],
        )
        .unwrap();
        write_raw_json(
            dir.path(),
            "sleep",
            ts("2025-12-01T00:00:00Z"),
            &[json!({"id": "a"})],
        )
        .unwrap();

        let all = load_all_raw(dir.path(), "sleep").unwrap();
        assert_eq!(all, vec![json!({"id": "a"}), json!({"id": "b"})]);
    }

    #[test]
    fn latest_errors_when_endpoint_has_no_dumps() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_latest_raw(dir.path(), "workout").is_err());
        // all-raw is lenient by contrast
        assert!(load_all_raw(dir.path(), "workout").unwrap().is_empty());
    }

    #[test]
    fn stamp_is_filename_safe() {
        let stamp = utc_stamp(ts("2025-12-01T06:30:09Z"));
        assert_eq!(stamp, "2025-12-01T06-30-09Z");
        assert!(!stamp.contains(':'));
    }

    #[test]
    fn same_second_dumps_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let at = ts("2025-12-01T00:00:00Z");
        write_raw_json(dir.path(), "cycle", at, &[json!({"id": "a"})]).unwrap();
        write_raw_json(dir.path(), "cycle", at, &[json!({"id": "b"})]).unwrap();

        assert_eq!(files_for_endpoint(dir.path(), "cycle").unwrap().len(), 2);
        assert_eq!(
            load_latest_raw(dir.path(), "cycle").unwrap(),
            vec![json!({"id": "b"})]
        );
    }

    #[test]
    fn rejects_non_array_payload() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cycle_2025-12-01T00-00-00Z.json"), "{}").unwrap();
        assert!(load_latest_raw(dir.path(), "cycle").is_err());
    }
}
