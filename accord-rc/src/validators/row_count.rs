//! Coarse-grained drift detection by table row count.

use std::sync::Arc;

use accord_common::types::{CheckType, Severity, ValidationResult};
use accord_common::Result;
use async_trait::async_trait;

use super::{Validator, ValidatorInfo};
use crate::stores::RecordStore;

/// Compares record counts per table between the two stores.
///
/// Cheap enough to run on every table every time; it cannot say *which*
/// records drifted, only that the totals disagree.
pub struct RowCountValidator {
    source: Arc<dyn RecordStore>,
    derived: Arc<dyn RecordStore>,
    /// Percent-of-source divergence separating Warning from Error.
    warn_percent: f64,
}

impl RowCountValidator {
    pub fn new(source: Arc<dyn RecordStore>, derived: Arc<dyn RecordStore>) -> Self {
        Self {
            source,
            derived,
            warn_percent: 10.0,
        }
    }

    pub fn with_warn_percent(mut self, warn_percent: f64) -> Self {
        self.warn_percent = warn_percent;
        self
    }

    async fn compare(&self, table: &str) -> Result<ValidationResult> {
        let source_count = self.source.count(table).await?;
        let derived_count = self.derived.count(table).await?;

        let difference = source_count - derived_count;
        // Signed percent of the source count; max(source, 1) avoids a zero
        // divisor on empty source tables.
        let difference_percent =
            difference as f64 / std::cmp::max(source_count, 1) as f64 * 100.0;

        let result = if source_count == derived_count {
            ValidationResult::passed(
                CheckType::RowCount,
                table,
                format!("Row counts match ({source_count} records)"),
            )
        } else {
            let severity = if difference_percent.abs() <= self.warn_percent {
                Severity::Warning
            } else {
                Severity::Error
            };
            ValidationResult::failed(
                CheckType::RowCount,
                table,
                severity,
                format!(
                    "Row count mismatch: source={source_count}, derived={derived_count} \
                     ({difference_percent:+.1}%)"
                ),
            )
        };

        Ok(result
            .with_detail("source_count", source_count)
            .with_detail("derived_count", derived_count)
            .with_detail("difference", difference.abs())
            .with_detail("difference_percent", difference_percent))
    }
}

#[async_trait]
impl Validator for RowCountValidator {
    fn info(&self) -> ValidatorInfo {
        ValidatorInfo {
            check_type: CheckType::RowCount,
            name: "row_count",
            description: "Compares record counts per table between stores",
        }
    }

    async fn validate(&self, table: &str, _primary_key: Option<&str>) -> Vec<ValidationResult> {
        // The count is table-scoped; a supplied primary key is ignored.
        match self.compare(table).await {
            Ok(result) => vec![result],
            Err(e) => {
                tracing::warn!(table = %table, error = %e, "Row count check failed");
                vec![ValidationResult::failed(
                    CheckType::RowCount,
                    table,
                    Severity::Critical,
                    format!("Row count check failed: {e}"),
                )]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStore;
    use accord_common::types::Record;
    use serde_json::json;

    fn seeded(source_rows: usize, derived_rows: usize) -> RowCountValidator {
        let source = Arc::new(MemoryStore::new("transactional"));
        let derived = Arc::new(MemoryStore::new("analytical"));
        for i in 0..source_rows {
            source.insert("users", &format!("u-{i}"), Record::new());
        }
        for i in 0..derived_rows {
            derived.insert("users", &format!("u-{i}"), Record::new());
        }
        RowCountValidator::new(source, derived)
    }

    #[tokio::test]
    async fn test_equal_counts_pass_as_info() {
        let results = seeded(10, 10).validate("users", None).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_consistent);
        assert_eq!(results[0].severity, Severity::Info);
        assert_eq!(results[0].details["source_count"], json!(10));
    }

    #[tokio::test]
    async fn test_small_divergence_is_warning() {
        // 100 vs 95: 5% divergence, inside the 10% band.
        let results = seeded(100, 95).validate("users", None).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].is_consistent);
        assert_eq!(results[0].severity, Severity::Warning);
        assert_eq!(results[0].details["difference_percent"], json!(5.0));
    }

    #[tokio::test]
    async fn test_large_divergence_is_error() {
        // 100 vs 85: 15% divergence.
        let results = seeded(100, 85).validate("users", None).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].severity, Severity::Error);
        assert_eq!(results[0].details["difference_percent"], json!(15.0));
    }

    #[tokio::test]
    async fn test_derived_ahead_uses_signed_percent() {
        let results = seeded(95, 100).validate("users", None).await;
        assert!(!results[0].is_consistent);
        assert_eq!(results[0].severity, Severity::Warning);
        let pct = results[0].details["difference_percent"].as_f64().unwrap();
        assert!(pct < 0.0);
    }

    #[tokio::test]
    async fn test_store_failure_becomes_critical_result() {
        let source = Arc::new(MemoryStore::new("transactional"));
        let derived = Arc::new(MemoryStore::new("analytical"));
        source.set_failing("users", true);
        let validator = RowCountValidator::new(source, derived);

        let results = validator.validate("users", None).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].is_consistent);
        assert_eq!(results[0].severity, Severity::Critical);
        assert!(results[0].message.contains("simulated outage"));
    }

    #[tokio::test]
    async fn test_detection_is_idempotent() {
        let validator = seeded(100, 95);
        let first = validator.validate("users", None).await;
        let second = validator.validate("users", None).await;
        assert_eq!(first[0].is_consistent, second[0].is_consistent);
        assert_eq!(first[0].severity, second[0].severity);
        assert_eq!(first[0].details, second[0].details);
    }
}
