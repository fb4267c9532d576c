//! Join-key extraction for recovery and sleep records
//!
//! The vendor has shipped the cycle identity under several shapes over the
//! years. Instead of ad-hoc branching, extraction is an ordered table of
//! named strategies tried in sequence; the first hit wins. A record with no
//! cycle identity under any shape falls back to a calendar-date join.

use chrono::NaiveDate;
use serde_json::Value;

/// One way of pulling a cycle identity out of a record.
pub struct KeyStrategy {
    pub name: &'static str,
    pub extract: fn(&Value) -> Option<String>,
}

fn scalar_key(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn direct(record: &Value) -> Option<String> {
    scalar_key(record.get("cycle_id")?)
}

fn camel_case(record: &Value) -> Option<String> {
    scalar_key(record.get("cycleId")?)
}

fn nested_object(record: &Value) -> Option<String> {
    scalar_key(record.get("cycle")?.get("id")?)
}

fn dotted_path(record: &Value) -> Option<String> {
    scalar_key(record.get("cycle.id")?)
}

/// All recognized shapes, in priority order.
pub const CYCLE_KEY_STRATEGIES: [KeyStrategy; 4] = [
    KeyStrategy {
        name: "cycle_id",
        extract: direct,
    },
    KeyStrategy {
        name: "cycleId",
        extract: camel_case,
    },
    KeyStrategy {
        name: "cycle.id (nested)",
        extract: nested_object,
    },
    KeyStrategy {
        name: "cycle.id (dotted)",
        extract: dotted_path,
    },
];

/// Extract the cycle identity from a record, trying each strategy in order.
pub fn cycle_key(record: &Value) -> Option<String> {
    CYCLE_KEY_STRATEGIES
        .iter()
        .find_map(|s| (s.extract)(record))
}

/// Candidate timestamp fields for the date-fallback join on recovery
/// records, in priority order.
pub const RECOVERY_DATE_FIELDS: [&str; 3] = ["created_at", "updated_at", "timestamp"];

/// Calendar date from the first parseable candidate field.
pub fn fallback_date(record: &Value, fields: &[&str]) -> Option<NaiveDate> {
    fields.iter().find_map(|f| {
        let s = record.get(*f)?.as_str()?;
        crate::windows::parse_utc_timestamp(s)
            .ok()
            .map(|t| t.date_naive())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strategies_try_every_shape_in_order() {
        assert_eq!(cycle_key(&json!({"cycle_id": 7})), Some("7".to_string()));
        assert_eq!(
            cycle_key(&json!({"cycleId": "c9"})),
            Some("c9".to_string())
        );
        assert_eq!(
            cycle_key(&json!({"cycle": {"id": 3}})),
            Some("3".to_string())
        );
        assert_eq!(
            cycle_key(&json!({"cycle.id": "c4"})),
            Some("c4".to_string())
        );
        assert_eq!(cycle_key(&json!({"other": 1})), None);
    }

    #[test]
    fn direct_field_beats_nested() {
        let record = json!({"cycle_id": "direct", "cycle": {"id": "nested"}});
        assert_eq!(cycle_key(&record), Some("direct".to_string()));
    }

    #[test]
    fn fallback_date_walks_the_priority_list() {
        let record = json!({"updated_at": "2025-12-03T04:00:00Z"});
        assert_eq!(
            fallback_date(&record, &RECOVERY_DATE_FIELDS),
            Some(NaiveDate::from_ymd_opt(2025, 12, 3).unwrap())
        );

        let record = json!({
            "created_at": "2025-12-01T23:00:00Z",
            "updated_at": "2025-12-05T00:00:00Z"
        });
        // created_at outranks updated_at
        assert_eq!(
            fallback_date(&record, &RECOVERY_DATE_FIELDS),
            Some(NaiveDate::from_ymd_opt(2025, 12, 1).unwrap())
        );

        assert_eq!(fallback_date(&json!({}), &RECOVERY_DATE_FIELDS), None);
    }
}
