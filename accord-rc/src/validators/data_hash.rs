//! Fine-grained drift detection by canonical content hash.

use std::sync::Arc;

use accord_common::canonical;
use accord_common::config::TableCatalog;
use accord_common::types::{CheckType, Severity, ValidationResult};
use accord_common::Result;
use async_trait::async_trait;

use super::{Validator, ValidatorInfo};
use crate::stores::RecordStore;

/// Compares canonical SHA-256 content hashes per record.
///
/// With a primary key, checks that single record; without one, draws a
/// random sample of keys from the source store and checks each. Hashing
/// both sides through the same canonicalization is what makes the
/// comparison meaningful across engines with different type systems.
pub struct DataHashValidator {
    source: Arc<dyn RecordStore>,
    derived: Arc<dyn RecordStore>,
    catalog: Arc<TableCatalog>,
    sample_size: u32,
    full_scan: bool,
}

impl DataHashValidator {
    pub fn new(
        source: Arc<dyn RecordStore>,
        derived: Arc<dyn RecordStore>,
        catalog: Arc<TableCatalog>,
    ) -> Self {
        Self {
            source,
            derived,
            catalog,
            sample_size: 100,
            full_scan: false,
        }
    }

    pub fn with_sample_size(mut self, sample_size: u32) -> Self {
        self.sample_size = sample_size;
        self
    }

    /// Hash every row instead of sampling. Expensive on large tables.
    pub fn with_full_scan(mut self, full_scan: bool) -> Self {
        self.full_scan = full_scan;
        self
    }

    /// Compare one record across both stores.
    async fn check_record(&self, table: &str, primary_key: &str) -> Result<ValidationResult> {
        let spec = self.catalog.spec(table)?;
        let ts_columns = spec.timestamp_columns();

        let source_record = self.source.fetch(table, primary_key).await?;
        let derived_record = self.derived.fetch(table, primary_key).await?;

        let result = match (source_record, derived_record) {
            (None, None) => ValidationResult::failed(
                CheckType::DataHash,
                table,
                Severity::Error,
                format!("Record '{primary_key}' missing from both stores"),
            ),
            (Some(_), None) => ValidationResult::failed(
                CheckType::DataHash,
                table,
                Severity::Error,
                format!("Record '{primary_key}' missing from analytical store"),
            )
            .with_detail("missing_in", "analytical"),
            (None, Some(_)) => ValidationResult::failed(
                CheckType::DataHash,
                table,
                Severity::Error,
                format!("Record '{primary_key}' missing from transactional store"),
            )
            .with_detail("missing_in", "transactional"),
            (Some(source), Some(derived)) => {
                let source_hash = canonical::content_hash(&source, &ts_columns);
                let derived_hash = canonical::content_hash(&derived, &ts_columns);

                if source_hash == derived_hash {
                    ValidationResult::passed(
                        CheckType::DataHash,
                        table,
                        format!("Record '{primary_key}' content hashes match"),
                    )
                    .with_detail("source_hash", source_hash)
                    .with_detail("derived_hash", derived_hash)
                } else {
                    // Snapshots let a resolver act without re-fetching.
                    ValidationResult::failed(
                        CheckType::DataHash,
                        table,
                        Severity::Error,
                        format!("Record '{primary_key}' content differs between stores"),
                    )
                    .with_detail("source_hash", source_hash)
                    .with_detail("derived_hash", derived_hash)
                    .with_snapshots(source, derived)
                }
            }
        };

        Ok(result.with_primary_key(primary_key))
    }

    /// Sample-mode validation: draw keys from the source store and check
    /// each one.
    async fn check_sample(&self, table: &str) -> Result<Vec<ValidationResult>> {
        let limit = if self.full_scan {
            u32::MAX
        } else {
            self.sample_size
        };
        let keys = self.source.sample_keys(table, limit).await?;
        tracing::debug!(table = %table, sampled = keys.len(), "Hash-validating sampled records");

        let mut results = Vec::with_capacity(keys.len());
        for key in &keys {
            results.push(self.check_record(table, key).await?);
        }
        Ok(results)
    }
}

#[async_trait]
impl Validator for DataHashValidator {
    fn info(&self) -> ValidatorInfo {
        ValidatorInfo {
            check_type: CheckType::DataHash,
            name: "data_hash",
            description: "Compares canonical content hashes per record",
        }
    }

    async fn validate(&self, table: &str, primary_key: Option<&str>) -> Vec<ValidationResult> {
        let outcome = match primary_key {
            Some(key) => self.check_record(table, key).await.map(|r| vec![r]),
            None => self.check_sample(table).await,
        };
        match outcome {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(table = %table, error = %e, "Data hash check failed");
                vec![ValidationResult::failed(
                    CheckType::DataHash,
                    table,
                    Severity::Critical,
                    format!("Data hash check failed: {e}"),
                )]
            }
        }
    }
}
