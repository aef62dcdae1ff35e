//! Record canonicalization and content hashing.
//!
//! The transactional and analytical engines represent the same logical
//! record with different native types: one hands back naive datetime text,
//! the other RFC 3339 or epoch seconds; identifiers may be typed UUIDs or
//! plain strings. Hash comparison is only meaningful if both sides
//! normalize identically, so every value funnels through the same coercion
//! before serialization. This is the load-bearing correctness property of
//! the hash validator: drift in the coercion produces false positives on
//! every record.
//!
//! Canonical form: column -> string value map, serialized as compact JSON
//! with keys in lexicographic order, hashed with SHA-256.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::time;
use crate::types::Record;

/// Canonicalize a record into its column -> string form.
///
/// Coercions, applied in order per value:
/// - strings that parse as a timestamp normalize to RFC 3339 UTC
/// - strings that parse as a UUID normalize to lowercase hyphenated form
/// - other strings pass through unchanged
/// - numbers in `timestamp_columns` are treated as epoch seconds and
///   normalized like timestamp strings
/// - other numbers and booleans use their display form
/// - null becomes `"null"`, nested arrays/objects their compact JSON
pub fn canonicalize(record: &Record, timestamp_columns: &[&str]) -> BTreeMap<String, String> {
    record
        .iter()
        .map(|(column, value)| {
            let is_ts_column = timestamp_columns.contains(&column.as_str());
            (column.clone(), canonical_value(value, is_ts_column))
        })
        .collect()
}

/// Serialize the canonical form of a record as compact JSON.
///
/// `BTreeMap` iteration order gives the lexicographic key ordering.
pub fn canonical_json(record: &Record, timestamp_columns: &[&str]) -> String {
    let canonical = canonicalize(record, timestamp_columns);
    // String-keyed, string-valued map cannot fail to serialize.
    serde_json::to_string(&canonical).unwrap_or_default()
}

/// SHA-256 hex digest of a record's canonical JSON.
pub fn content_hash(record: &Record, timestamp_columns: &[&str]) -> String {
    let json = canonical_json(record, timestamp_columns);
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn canonical_value(value: &serde_json::Value, is_timestamp_column: bool) -> String {
    match value {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => {
            if is_timestamp_column {
                if let Some(dt) = n.as_f64().and_then(time::from_epoch_seconds) {
                    return time::to_canonical(dt);
                }
            }
            n.to_string()
        }
        serde_json::Value::String(s) => {
            if let Some(dt) = time::parse_timestamp(s) {
                return time::to_canonical(dt);
            }
            if let Ok(id) = Uuid::parse_str(s) {
                return id.to_string();
            }
            s.clone()
        }
        // Nested structures are rare in mirrored rows; compact JSON keeps
        // them deterministic without flattening.
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(pairs: &[(&str, serde_json::Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_equal_records_hash_equal() {
        let a = record(&[("id", json!("u-1")), ("name", json!("Ada"))]);
        let b = record(&[("name", json!("Ada")), ("id", json!("u-1"))]);
        assert_eq!(content_hash(&a, &[]), content_hash(&b, &[]));
    }

    #[test]
    fn test_single_field_difference_changes_hash() {
        let a = record(&[("id", json!("u-1")), ("name", json!("Ada"))]);
        let b = record(&[("id", json!("u-1")), ("name", json!("Ada L"))]);
        assert_ne!(content_hash(&a, &[]), content_hash(&b, &[]));
    }

    #[test]
    fn test_hash_is_idempotent() {
        let a = record(&[("id", json!(7)), ("score", json!(0.5))]);
        assert_eq!(content_hash(&a, &[]), content_hash(&a, &[]));
    }

    #[test]
    fn test_timestamp_shapes_normalize_equal() {
        // Naive SQL text on one side, RFC 3339 with offset on the other.
        let oltp = record(&[("updated_at", json!("2024-03-01 10:15:30"))]);
        let olap = record(&[("updated_at", json!("2024-03-01T12:15:30+02:00"))]);
        assert_eq!(content_hash(&oltp, &[]), content_hash(&olap, &[]));
    }

    #[test]
    fn test_epoch_timestamp_column_normalizes() {
        let oltp = record(&[("updated_at", json!("2024-03-01T10:00:00Z"))]);
        let olap = record(&[("updated_at", json!(1_709_287_200))]);
        assert_eq!(
            content_hash(&oltp, &["updated_at"]),
            content_hash(&olap, &["updated_at"])
        );
        // Without the column hint the epoch number stays a plain number.
        assert_ne!(content_hash(&oltp, &[]), content_hash(&olap, &[]));
    }

    #[test]
    fn test_uuid_case_normalizes() {
        let a = record(&[("id", json!("6FA459EA-EE8A-3CA4-894E-DB77E160355E"))]);
        let b = record(&[("id", json!("6fa459ea-ee8a-3ca4-894e-db77e160355e"))]);
        assert_eq!(content_hash(&a, &[]), content_hash(&b, &[]));
    }

    #[test]
    fn test_all_values_coerced_to_strings() {
        let rec = record(&[
            ("active", json!(true)),
            ("count", json!(3)),
            ("note", json!(null)),
        ]);
        let canonical = canonicalize(&rec, &[]);
        assert_eq!(canonical["active"], "true");
        assert_eq!(canonical["count"], "3");
        assert_eq!(canonical["note"], "null");
    }

    #[test]
    fn test_canonical_json_sorted_keys() {
        let rec = record(&[("b", json!("2")), ("a", json!("1")), ("c", json!("3"))]);
        let json = canonical_json(&rec, &[]);
        let a = json.find("\"a\"").unwrap();
        let b = json.find("\"b\"").unwrap();
        let c = json.find("\"c\"").unwrap();
        assert!(a < b && b < c);
    }
}
