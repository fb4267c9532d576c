//! Static descriptor table for the vendor collection endpoints
//!
//! Each endpoint carries its API path, the raw-dump filename prefix, how a
//! record's identity is derived, and which field carries the vendor's
//! last-modified timestamp. The backfill loop and the raw store both drive
//! off this table instead of hardcoding endpoint knowledge.

use serde_json::Value;

/// How a record's identity is derived from its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdField {
    /// Identity is a single top-level field.
    Plain(&'static str),
    /// Recovery records have no natural id; identity is synthesized from
    /// `cycle_id` plus `sleep_id` (or `cycle_id` alone when no sleep exists).
    CycleSleep,
}

impl IdField {
    /// Extract the identity for a record, or `None` when the id is missing.
    pub fn extract(&self, record: &Value) -> Option<String> {
        match self {
            IdField::Plain(field) => value_as_key(record.get(*field)?),
            IdField::CycleSleep => {
                let cycle = value_as_key(record.get("cycle_id")?)?;
                match record.get("sleep_id").and_then(value_as_key) {
                    Some(sleep) => Some(format!("{cycle}:{sleep}")),
                    None => Some(cycle),
                }
            }
        }
    }
}

/// Render a JSON scalar as a join/identity key.
fn value_as_key(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// One vendor collection endpoint.
#[derive(Debug, Clone, Copy)]
pub struct EndpointSpec {
    /// Short name; doubles as the raw-dump filename prefix and the
    /// `raw_records.endpoint` value.
    pub name: &'static str,
    /// API path under the collection base URL.
    pub path: &'static str,
    /// Identity derivation.
    pub id: IdField,
    /// Field carrying the vendor's last-modified timestamp.
    pub updated_at: Option<&'static str>,
    /// Whether a healthy account always produces records for this endpoint
    /// (cycles and sleeps happen daily; recoveries and workouts can be absent).
    pub always_populated: bool,
}

/// All collection endpoints, in fetch order.
pub const ENDPOINTS: [EndpointSpec; 4] = [
    EndpointSpec {
        name: "cycle",
        path: "/cycle",
        id: IdField::Plain("id"),
        updated_at: Some("updated_at"),
        always_populated: true,
    },
    EndpointSpec {
        name: "recovery",
        path: "/recovery",
        id: IdField::CycleSleep,
        updated_at: Some("updated_at"),
        always_populated: false,
    },
    EndpointSpec {
        name: "sleep",
        path: "/activity/sleep",
        id: IdField::Plain("id"),
        updated_at: Some("updated_at"),
        always_populated: true,
    },
    EndpointSpec {
        name: "workout",
        path: "/activity/workout",
        id: IdField::Plain("id"),
        updated_at: Some("updated_at"),
        always_populated: false,
    },
];

/// Look up an endpoint by name.
pub fn endpoint(name: &str) -> Option<&'static EndpointSpec> {
    ENDPOINTS.iter().find(|e| e.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_id_reads_strings_and_numbers() {
        let id = IdField::Plain("id");
        assert_eq!(id.extract(&json!({"id": "abc"})), Some("abc".to_string()));
        assert_eq!(id.extract(&json!({"id": 42})), Some("42".to_string()));
        assert_eq!(id.extract(&json!({"other": "x"})), None);
        assert_eq!(id.extract(&json!({"id": ""})), None);
    }

    #[test]
    fn recovery_identity_combines_cycle_and_sleep() {
        let id = IdField::CycleSleep;
        assert_eq!(
            id.extract(&json!({"cycle_id": "c1", "sleep_id": "s1"})),
            Some("c1:s1".to_string())
        );
        assert_eq!(
            id.extract(&json!({"cycle_id": 7})),
            Some("7".to_string())
        );
        assert_eq!(id.extract(&json!({"sleep_id": "s1"})), None);
    }

    #[test]
    fn endpoint_lookup() {
        assert_eq!(endpoint("sleep").unwrap().path, "/activity/sleep");
        assert!(endpoint("nope").is_none());
    }
}
