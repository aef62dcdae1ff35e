//! Consistency validators.
//!
//! Each validator answers one question about one table (optionally one
//! record) and never lets a store failure escape: unreachable stores and
//! rule-evaluation errors come back as critical findings so the rest of a
//! run keeps going.

use accord_common::types::{CheckType, ValidationResult};
use async_trait::async_trait;

mod business_rules;
mod data_hash;
mod row_count;

pub use business_rules::BusinessRuleValidator;
pub use data_hash::DataHashValidator;
pub use row_count::RowCountValidator;

/// Static description of a validator, used by the status boundary and the
/// orchestrator registry.
#[derive(Debug, Clone, Copy)]
pub struct ValidatorInfo {
    pub check_type: CheckType,
    pub name: &'static str,
    pub description: &'static str,
}

#[async_trait]
pub trait Validator: Send + Sync {
    fn info(&self) -> ValidatorInfo;

    /// Run the check against one table, optionally scoped to one record.
    ///
    /// Never fails: store and rule errors are reported as findings.
    async fn validate(&self, table: &str, primary_key: Option<&str>) -> Vec<ValidationResult>;
}
