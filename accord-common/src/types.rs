//! Consistency check data model shared across Accord crates.
//!
//! Everything here crosses the trigger boundary as JSON, so all types carry
//! serde derives with snake_case wire names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// A full record captured from either store, keyed by column name.
///
/// `BTreeMap` keeps columns sorted, which canonical hashing relies on.
pub type Record = BTreeMap<String, serde_json::Value>;

/// Kind of consistency check a validator performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    RowCount,
    DataHash,
    BusinessRules,
    SchemaValidation,
    ReferentialIntegrity,
    TemporalConsistency,
}

impl CheckType {
    pub const ALL: [CheckType; 6] = [
        CheckType::RowCount,
        CheckType::DataHash,
        CheckType::BusinessRules,
        CheckType::SchemaValidation,
        CheckType::ReferentialIntegrity,
        CheckType::TemporalConsistency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckType::RowCount => "row_count",
            CheckType::DataHash => "data_hash",
            CheckType::BusinessRules => "business_rules",
            CheckType::SchemaValidation => "schema_validation",
            CheckType::ReferentialIntegrity => "referential_integrity",
            CheckType::TemporalConsistency => "temporal_consistency",
        }
    }
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "row_count" => Ok(CheckType::RowCount),
            "data_hash" => Ok(CheckType::DataHash),
            "business_rules" => Ok(CheckType::BusinessRules),
            "schema_validation" => Ok(CheckType::SchemaValidation),
            "referential_integrity" => Ok(CheckType::ReferentialIntegrity),
            "temporal_consistency" => Ok(CheckType::TemporalConsistency),
            other => Err(Error::InvalidInput(format!("unknown check type: {other}"))),
        }
    }
}

/// Severity of a single validation finding.
///
/// Variant order matters: derived `Ord` ranks `Info < Warning < Error <
/// Critical`, which report tallying and recommendation logic rely on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Strategy the conflict resolver applies to an inconsistent result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    LastWriteWins,
    FirstWriteWins,
    SourceWins,
    DerivedWins,
    Merge,
    BusinessRules,
}

impl ResolutionStrategy {
    pub const ALL: [ResolutionStrategy; 6] = [
        ResolutionStrategy::LastWriteWins,
        ResolutionStrategy::FirstWriteWins,
        ResolutionStrategy::SourceWins,
        ResolutionStrategy::DerivedWins,
        ResolutionStrategy::Merge,
        ResolutionStrategy::BusinessRules,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::LastWriteWins => "last_write_wins",
            ResolutionStrategy::FirstWriteWins => "first_write_wins",
            ResolutionStrategy::SourceWins => "source_wins",
            ResolutionStrategy::DerivedWins => "derived_wins",
            ResolutionStrategy::Merge => "merge",
            ResolutionStrategy::BusinessRules => "business_rules",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "last_write_wins" => Ok(ResolutionStrategy::LastWriteWins),
            "first_write_wins" => Ok(ResolutionStrategy::FirstWriteWins),
            "source_wins" => Ok(ResolutionStrategy::SourceWins),
            "derived_wins" => Ok(ResolutionStrategy::DerivedWins),
            "merge" => Ok(ResolutionStrategy::Merge),
            "business_rules" => Ok(ResolutionStrategy::BusinessRules),
            other => Err(Error::InvalidInput(format!(
                "unknown resolution strategy: {other}"
            ))),
        }
    }
}

/// Outcome status of one resolution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    /// The result was already consistent; nothing was done.
    NoConflict,
    /// The authoritative record was written back through the pipeline.
    Resolved,
    /// The derived store held the authoritative record; writing it back into
    /// the transactional store needs that store's own write path.
    ManualInterventionRequired,
    /// The attempt failed (missing snapshots, unknown strategy, write error).
    Error,
}

/// One outcome of one check against one (table, optional primary key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub check_id: Uuid,
    pub check_type: CheckType,
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,
    pub is_consistent: bool,
    pub severity: Severity,
    pub message: String,
    /// Structured key/value diagnostics (counts, hashes, offending fields).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, serde_json::Value>,
    /// Full record from the transactional store, present only when a
    /// per-record comparison was performed. Required input for resolution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_snapshot: Option<Record>,
    /// Full record from the analytical store; see `source_snapshot`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derived_snapshot: Option<Record>,
    pub checked_at: DateTime<Utc>,
    /// Set only when resolution is attempted on an inconsistent result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_strategy: Option<ResolutionStrategy>,
    pub resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_details: Option<BTreeMap<String, serde_json::Value>>,
}

impl ValidationResult {
    /// A consistent (passing) result.
    pub fn passed(check_type: CheckType, table: &str, message: impl Into<String>) -> Self {
        Self::build(check_type, table, true, Severity::Info, message)
    }

    /// An inconsistent (failing) result at the given severity.
    pub fn failed(
        check_type: CheckType,
        table: &str,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self::build(check_type, table, false, severity, message)
    }

    fn build(
        check_type: CheckType,
        table: &str,
        is_consistent: bool,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            check_id: Uuid::new_v4(),
            check_type,
            table: table.to_string(),
            primary_key: None,
            is_consistent,
            severity,
            message: message.into(),
            details: BTreeMap::new(),
            source_snapshot: None,
            derived_snapshot: None,
            checked_at: Utc::now(),
            resolution_strategy: None,
            resolved: false,
            resolution_details: None,
        }
    }

    pub fn with_primary_key(mut self, key: impl Into<String>) -> Self {
        self.primary_key = Some(key.into());
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn with_snapshots(mut self, source: Record, derived: Record) -> Self {
        self.source_snapshot = Some(source);
        self.derived_snapshot = Some(derived);
        self
    }
}

/// Wall-clock metrics for one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub duration_seconds: f64,
    pub checks_per_second: f64,
    pub tables_checked: usize,
    pub check_types_run: usize,
}

/// One orchestrator run's aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub report_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub total_checks: usize,
    pub passed_checks: usize,
    pub failed_checks: usize,
    pub warnings: usize,
    pub errors: usize,
    pub critical_issues: usize,
    /// `passed / total * 100`; 100.0 when no checks ran.
    pub consistency_score: f64,
    pub results: Vec<ValidationResult>,
    pub recommendations: Vec<String>,
    pub performance: PerformanceMetrics,
}

impl ConsistencyReport {
    /// Compile a report from collected results.
    ///
    /// Tallies pass/fail by `is_consistent` and severity counts over all
    /// results. The score is pinned to 100.0 for an empty run so "nothing
    /// matched" never reads as drift.
    pub fn compile(
        results: Vec<ValidationResult>,
        recommendations: Vec<String>,
        performance: PerformanceMetrics,
    ) -> Self {
        let total_checks = results.len();
        let passed_checks = results.iter().filter(|r| r.is_consistent).count();
        let failed_checks = total_checks - passed_checks;
        let warnings = results
            .iter()
            .filter(|r| r.severity == Severity::Warning)
            .count();
        let errors = results
            .iter()
            .filter(|r| r.severity == Severity::Error)
            .count();
        let critical_issues = results
            .iter()
            .filter(|r| r.severity == Severity::Critical)
            .count();
        let consistency_score = if total_checks == 0 {
            100.0
        } else {
            passed_checks as f64 / total_checks as f64 * 100.0
        };

        Self {
            report_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            total_checks,
            passed_checks,
            failed_checks,
            warnings,
            errors,
            critical_issues,
            consistency_score,
            results,
            recommendations,
            performance,
        }
    }

    /// Compact summary for the history boundary.
    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            report_id: self.report_id,
            generated_at: self.generated_at,
            total_checks: self.total_checks,
            consistency_score: self.consistency_score,
            failed_checks: self.failed_checks,
            critical_issues: self.critical_issues,
            duration_seconds: self.performance.duration_seconds,
        }
    }
}

/// Compact view of a retained report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSummary {
    pub report_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub total_checks: usize,
    pub consistency_score: f64,
    pub failed_checks: usize,
    pub critical_issues: usize,
    pub duration_seconds: f64,
}

/// Rolling service status over retained history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub available_validators: Vec<CheckType>,
    pub history_count: usize,
    pub average_consistency_score: f64,
    pub total_checks_run: u64,
    pub total_failures: u64,
    pub failure_rate_percent: f64,
    pub supported_strategies: Vec<ResolutionStrategy>,
}

/// Result of one resolution attempt, returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionOutcome {
    pub check_id: Uuid,
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,
    pub status: ResolutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ResolutionStrategy>,
    pub message: String,
    /// Operation identifier returned by the dual-write pipeline on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
}
