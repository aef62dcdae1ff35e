//! Domain-invariant checks, independent of cross-store comparison.
//!
//! Rules are grouped into per-table families held in a closed registry
//! (the table catalog names the family; unknown tables produce no results
//! rather than an error). Each rule is additive: one record can emit
//! several findings.

use std::str::FromStr;
use std::sync::Arc;

use accord_common::config::{TableCatalog, TableSpec};
use accord_common::time;
use accord_common::types::{CheckType, Record, Severity, ValidationResult};
use accord_common::{Error, Result};
use async_trait::async_trait;

use super::{Validator, ValidatorInfo};
use crate::stores::RecordStore;

/// Rule family applied to one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleSet {
    Users,
    Projects,
    Content,
    Junction,
}

impl FromStr for RuleSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "users" => Ok(RuleSet::Users),
            "projects" => Ok(RuleSet::Projects),
            "content" => Ok(RuleSet::Content),
            "junction" => Ok(RuleSet::Junction),
            other => Err(Error::Config(format!("unknown rule family: {other}"))),
        }
    }
}

/// Evaluates per-table business rules over source-store records.
pub struct BusinessRuleValidator {
    source: Arc<dyn RecordStore>,
    derived: Arc<dyn RecordStore>,
    catalog: Arc<TableCatalog>,
    scan_limit: u32,
}

impl BusinessRuleValidator {
    pub fn new(
        source: Arc<dyn RecordStore>,
        derived: Arc<dyn RecordStore>,
        catalog: Arc<TableCatalog>,
    ) -> Self {
        Self {
            source,
            derived,
            catalog,
            scan_limit: 500,
        }
    }

    pub fn with_scan_limit(mut self, scan_limit: u32) -> Self {
        self.scan_limit = scan_limit;
        self
    }

    async fn run_rules(
        &self,
        table: &str,
        primary_key: Option<&str>,
    ) -> Result<Vec<ValidationResult>> {
        // Unknown tables and tables without a rule family are "not checked",
        // which callers must be able to distinguish from "checked, clean":
        // empty list here, explicit Info result below.
        let Ok(spec) = self.catalog.spec(table) else {
            return Ok(Vec::new());
        };
        let Some(rules) = spec.rules.as_deref() else {
            return Ok(Vec::new());
        };
        let rules = RuleSet::from_str(rules)?;

        let records = match primary_key {
            Some(key) => match self.source.fetch(table, key).await? {
                Some(record) => vec![record],
                None => Vec::new(),
            },
            None => self.source.scan(table, self.scan_limit).await?,
        };
        let scanned = records.len();

        let mut findings = Vec::new();
        for record in &records {
            let key = record_key(record, spec);
            let per_record = match rules {
                RuleSet::Users => check_user(record),
                RuleSet::Projects => self.check_project(record, spec, &key).await?,
                RuleSet::Content => check_content(record, spec),
                RuleSet::Junction => self.check_junction(record, spec).await?,
            };
            findings.extend(per_record.into_iter().map(|hit| {
                ValidationResult::failed(CheckType::BusinessRules, table, hit.severity, hit.message)
                    .with_primary_key(key.clone())
                    .with_detail("rule", hit.rule)
            }));
        }

        if findings.is_empty() {
            // "Checked and found nothing" is a result, not an empty list.
            return Ok(vec![ValidationResult::passed(
                CheckType::BusinessRules,
                table,
                format!("All business rules satisfied ({scanned} records checked)"),
            )
            .with_detail("records_checked", scanned)]);
        }
        Ok(findings)
    }

    async fn check_project(
        &self,
        record: &Record,
        spec: &TableSpec,
        key: &str,
    ) -> Result<Vec<RuleHit>> {
        let mut hits = Vec::new();

        let paused = field_str(record, "status").as_deref() == Some("paused");
        if !paused {
            if let Some(child) = &spec.child {
                let children = self
                    .source
                    .count_by(&child.table, &child.column, key)
                    .await?;
                if children == 0 {
                    hits.push(RuleHit::new(
                        "project_owns_domains",
                        Severity::Warning,
                        "Active project owns no child domains",
                    ));
                }
            }
        }

        let start = field_timestamp(record, "start_date");
        let end = field_timestamp(record, "end_date");
        if let (Some(start), Some(end)) = (start, end) {
            if end < start {
                hits.push(RuleHit::new(
                    "project_date_order",
                    Severity::Error,
                    "Project end date is earlier than its start date",
                ));
            }
        }

        Ok(hits)
    }

    async fn check_junction(&self, record: &Record, spec: &TableSpec) -> Result<Vec<RuleHit>> {
        let mut hits = Vec::new();
        for fk in &spec.references {
            let Some(value) = field_str(record, &fk.column) else {
                hits.push(RuleHit::new(
                    "junction_reference_resolves",
                    Severity::Error,
                    format!("Reference column '{}' is empty", fk.column),
                ));
                continue;
            };
            for store in [&self.source, &self.derived] {
                if store.fetch(&fk.parent_table, &value).await?.is_none() {
                    hits.push(RuleHit::new(
                        "junction_reference_resolves",
                        Severity::Error,
                        format!(
                            "Dangling reference: {}='{}' has no parent in '{}' ({} store)",
                            fk.column,
                            value,
                            fk.parent_table,
                            store.name()
                        ),
                    ));
                }
            }
        }
        Ok(hits)
    }
}

fn check_user(record: &Record) -> Vec<RuleHit> {
    let mut hits = Vec::new();

    let verified = field_bool(record, "is_verified").unwrap_or(false);
    let approval = field_str(record, "approval_status");
    if verified && approval.is_none() {
        hits.push(RuleHit::new(
            "verified_user_has_approval",
            Severity::Warning,
            "Verified account carries no approval status",
        ));
    }

    let superuser = field_bool(record, "is_superuser").unwrap_or(false);
    let approved = approval.as_deref() == Some("approved");
    if superuser && !(verified && approved) {
        hits.push(RuleHit::new(
            "superuser_verified_and_approved",
            Severity::Critical,
            "Superuser account must be both verified and approved",
        ));
    }

    let research = field_str(record, "purpose")
        .map(|p| p.to_lowercase().contains("research"))
        .unwrap_or(false);
    if research && field_str(record, "institution").is_none() {
        hits.push(RuleHit::new(
            "research_user_has_institution",
            Severity::Info,
            "Research-purpose account declares no institution",
        ));
    }

    hits
}

fn check_content(record: &Record, spec: &TableSpec) -> Vec<RuleHit> {
    let mut hits = Vec::new();

    let has_content = field_str(record, "content").is_some();
    let word_count_missing = matches!(
        record.get("word_count"),
        None | Some(serde_json::Value::Null)
    );
    if has_content && word_count_missing {
        hits.push(RuleHit::new(
            "content_has_word_count",
            Severity::Info,
            "Content present without a derived word count",
        ));
    }

    for column in spec.timestamp_columns() {
        if let Some(n) = record.get(column).and_then(|v| v.as_f64()) {
            if n <= 0.0 {
                hits.push(RuleHit::new(
                    "content_timestamp_positive",
                    Severity::Error,
                    format!("Non-positive timestamp in '{column}'"),
                ));
            }
        }
    }

    if let Some(score) = record.get("relevance_score").and_then(|v| v.as_f64()) {
        if !(0.0..=1.0).contains(&score) {
            hits.push(RuleHit::new(
                "content_score_bounds",
                Severity::Warning,
                format!("Relevance score {score} outside [0, 1]"),
            ));
        }
    }

    hits
}

#[async_trait]
impl Validator for BusinessRuleValidator {
    fn info(&self) -> ValidatorInfo {
        ValidatorInfo {
            check_type: CheckType::BusinessRules,
            name: "business_rules",
            description: "Evaluates per-table domain invariants",
        }
    }

    async fn validate(&self, table: &str, primary_key: Option<&str>) -> Vec<ValidationResult> {
        match self.run_rules(table, primary_key).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(table = %table, error = %e, "Business rule evaluation failed");
                vec![ValidationResult::failed(
                    CheckType::BusinessRules,
                    table,
                    Severity::Critical,
                    format!("Business rule evaluation failed: {e}"),
                )]
            }
        }
    }
}

/// One rule violation before it is shaped into a `ValidationResult`.
struct RuleHit {
    rule: &'static str,
    severity: Severity,
    message: String,
}

impl RuleHit {
    fn new(rule: &'static str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            rule,
            severity,
            message: message.into(),
        }
    }
}

fn record_key(record: &Record, spec: &TableSpec) -> String {
    match record.get(&spec.primary_key) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "unknown".to_string(),
    }
}

fn field_bool(record: &Record, column: &str) -> Option<bool> {
    match record.get(column)? {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::Number(n) => n.as_i64().map(|i| i != 0),
        serde_json::Value::String(s) => match s.as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Non-empty text value of a column.
fn field_str(record: &Record, column: &str) -> Option<String> {
    match record.get(column)? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn field_timestamp(record: &Record, column: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    match record.get(column)? {
        serde_json::Value::String(s) => time::parse_timestamp(s),
        serde_json::Value::Number(n) => n.as_f64().and_then(time::from_epoch_seconds),
        _ => None,
    }
}
