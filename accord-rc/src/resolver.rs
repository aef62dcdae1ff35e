//! Conflict resolution strategies and the write-back funnel.
//!
//! The resolver decides *who wins* after a validator has decided *that* the
//! stores diverged. Strategy planning is a pure function of the snapshots,
//! so given the same inputs it always proposes the same write; only the
//! pipeline call at the end is effectful.
//!
//! Repairs flow one way: the pipeline's entry point is the transactional
//! side, so a plan whose authoritative record comes from the derived store
//! is never applied automatically. It is surfaced as
//! `manual_intervention_required` for the transactional store's own write
//! path.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use accord_common::config::{TableCatalog, TableSpec};
use accord_common::time;
use accord_common::types::{
    Record, ResolutionOutcome, ResolutionStatus, ResolutionStrategy, ValidationResult,
};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::dual_write::{ConsistencyLevel, DualWriteClient};

/// Applies a resolution strategy to one inconsistent result and issues the
/// write-back through the dual-write pipeline.
pub struct ConflictResolver {
    dual_write: Arc<dyn DualWriteClient>,
    catalog: Arc<TableCatalog>,
    default_strategy: ResolutionStrategy,
    /// Serializes concurrent resolutions of the same (table, primary key).
    /// Entries are never evicted; the map is bounded by the set of keys
    /// actually contested.
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConflictResolver {
    pub fn new(dual_write: Arc<dyn DualWriteClient>, catalog: Arc<TableCatalog>) -> Self {
        Self {
            dual_write,
            catalog,
            default_strategy: ResolutionStrategy::LastWriteWins,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_default_strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    pub fn supported_strategies(&self) -> Vec<ResolutionStrategy> {
        ResolutionStrategy::ALL.to_vec()
    }

    async fn key_lock(&self, table: &str, primary_key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        locks
            .entry(format!("{table}:{primary_key}"))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Resolve one inconsistent result.
    ///
    /// On a successful write the result is mutated: `resolved` is set and
    /// `resolution_details` records the strategy and pipeline operation id.
    /// On any failure `resolved` stays false so the next run re-detects the
    /// drift.
    pub async fn resolve(&self, result: &mut ValidationResult) -> ResolutionOutcome {
        if result.is_consistent {
            return self.outcome(
                result,
                ResolutionStatus::NoConflict,
                None,
                "Result is consistent; nothing to resolve",
                None,
            );
        }

        let strategy = result.resolution_strategy.unwrap_or(self.default_strategy);
        let Some(primary_key) = result.primary_key.clone() else {
            return self.outcome(
                result,
                ResolutionStatus::Error,
                Some(strategy),
                "Result carries no primary key; row-level resolution impossible",
                None,
            );
        };

        let spec = match self.catalog.spec(&result.table) {
            Ok(spec) => spec,
            Err(e) => {
                return self.outcome(
                    result,
                    ResolutionStatus::Error,
                    Some(strategy),
                    format!("Cannot resolve: {e}"),
                    None,
                );
            }
        };

        // One writer per (table, primary key); distinct keys proceed in
        // parallel.
        let lock = self.key_lock(&result.table, &primary_key).await;
        let _guard = lock.lock().await;

        result.resolution_strategy = Some(strategy);
        let plan = match plan_resolution(result, strategy, spec) {
            Ok(plan) => plan,
            Err(reason) => {
                return self.outcome(result, ResolutionStatus::Error, Some(strategy), reason, None);
            }
        };

        match plan {
            Plan::Manual { reason } => {
                tracing::info!(
                    table = %result.table,
                    primary_key = %primary_key,
                    strategy = %strategy,
                    "Resolution needs manual intervention"
                );
                self.outcome(
                    result,
                    ResolutionStatus::ManualInterventionRequired,
                    Some(strategy),
                    reason,
                    None,
                )
            }
            Plan::Write { record, winner } => {
                match self
                    .dual_write
                    .dual_write_update(
                        &result.table,
                        &primary_key,
                        &record,
                        ConsistencyLevel::Strong,
                    )
                    .await
                {
                    Ok(ack) if ack.success => {
                        result.resolved = true;
                        let mut details = BTreeMap::new();
                        details.insert("strategy".to_string(), strategy.as_str().into());
                        details.insert("winner".to_string(), winner.into());
                        details.insert(
                            "operation_id".to_string(),
                            ack.operation_id.clone().into(),
                        );
                        details.insert(
                            "resolved_at".to_string(),
                            time::to_canonical(time::now()).into(),
                        );
                        result.resolution_details = Some(details);
                        tracing::info!(
                            table = %result.table,
                            primary_key = %primary_key,
                            strategy = %strategy,
                            operation_id = %ack.operation_id,
                            "Conflict resolved"
                        );
                        self.outcome(
                            result,
                            ResolutionStatus::Resolved,
                            Some(strategy),
                            format!("Resolved via {strategy} ({winner} record written)"),
                            Some(ack.operation_id),
                        )
                    }
                    Ok(ack) => self.outcome(
                        result,
                        ResolutionStatus::Error,
                        Some(strategy),
                        format!("Pipeline rejected write (operation {})", ack.operation_id),
                        None,
                    ),
                    Err(e) => {
                        tracing::warn!(
                            table = %result.table,
                            primary_key = %primary_key,
                            error = %e,
                            "Write-back failed"
                        );
                        self.outcome(
                            result,
                            ResolutionStatus::Error,
                            Some(strategy),
                            format!("Write-back failed: {e}"),
                            None,
                        )
                    }
                }
            }
        }
    }

    fn outcome(
        &self,
        result: &ValidationResult,
        status: ResolutionStatus,
        strategy: Option<ResolutionStrategy>,
        message: impl Into<String>,
        operation_id: Option<String>,
    ) -> ResolutionOutcome {
        ResolutionOutcome {
            check_id: result.check_id,
            table: result.table.clone(),
            primary_key: result.primary_key.clone(),
            status,
            strategy,
            message: message.into(),
            operation_id,
        }
    }
}

/// Planned action for one conflict.
#[derive(Debug, Clone, PartialEq)]
enum Plan {
    /// Write this record through the pipeline.
    Write { record: Record, winner: &'static str },
    /// The derived side is authoritative; no automatic path exists.
    Manual { reason: String },
}

/// Pure strategy planning: same snapshots + same strategy -> same plan.
fn plan_resolution(
    result: &ValidationResult,
    strategy: ResolutionStrategy,
    spec: &TableSpec,
) -> Result<Plan, String> {
    match strategy {
        ResolutionStrategy::LastWriteWins => {
            let (source, derived) = both_snapshots(result)?;
            if source_wins_last(source, derived, &spec.updated_at) {
                Ok(Plan::Write {
                    record: source.clone(),
                    winner: "source",
                })
            } else {
                Ok(Plan::Manual {
                    reason: derived_manual_reason(&spec.updated_at, "newer"),
                })
            }
        }
        ResolutionStrategy::FirstWriteWins => {
            let (source, derived) = both_snapshots(result)?;
            if source_wins_first(source, derived, &spec.created_at) {
                Ok(Plan::Write {
                    record: source.clone(),
                    winner: "source",
                })
            } else {
                Ok(Plan::Manual {
                    reason: derived_manual_reason(&spec.created_at, "older"),
                })
            }
        }
        ResolutionStrategy::SourceWins => {
            let source = result
                .source_snapshot
                .as_ref()
                .ok_or("Source snapshot missing; validator produced aggregate evidence only")?;
            Ok(Plan::Write {
                record: source.clone(),
                winner: "source",
            })
        }
        ResolutionStrategy::DerivedWins => {
            result
                .derived_snapshot
                .as_ref()
                .ok_or("Derived snapshot missing; validator produced aggregate evidence only")?;
            Ok(Plan::Manual {
                reason: "Derived record is authoritative; apply it through the \
                         transactional store's own write path"
                    .to_string(),
            })
        }
        ResolutionStrategy::Merge => {
            let (source, derived) = both_snapshots(result)?;
            let mut merged = source.clone();
            for (column, value) in derived {
                let missing = matches!(
                    merged.get(column),
                    None | Some(serde_json::Value::Null)
                );
                if missing && !value.is_null() {
                    merged.insert(column.clone(), value.clone());
                }
            }
            Ok(Plan::Write {
                record: merged,
                winner: "merged",
            })
        }
        ResolutionStrategy::BusinessRules => plan_business_rules(result, spec),
    }
}

/// Table-specific precedence; tables without a rule fall back to
/// last-write-wins.
fn plan_business_rules(result: &ValidationResult, spec: &TableSpec) -> Result<Plan, String> {
    let protected: &[&str] = match result.table.as_str() {
        // Verification state lives in the transactional store, whatever the
        // timestamps say.
        "users" => &["is_verified", "approval_status"],
        // Textual fields are authored transactionally; derived metrics
        // follow last-write-wins with the rest of the record.
        "pages_v2" => &["title", "content"],
        _ => {
            return plan_resolution(result, ResolutionStrategy::LastWriteWins, spec);
        }
    };

    let (source, derived) = both_snapshots(result)?;
    let mut record = if source_wins_last(source, derived, &spec.updated_at) {
        source.clone()
    } else {
        derived.clone()
    };
    for column in protected {
        if let Some(value) = source.get(*column) {
            record.insert((*column).to_string(), value.clone());
        }
    }
    Ok(Plan::Write {
        record,
        winner: "business_rules",
    })
}

fn both_snapshots(result: &ValidationResult) -> Result<(&Record, &Record), String> {
    match (&result.source_snapshot, &result.derived_snapshot) {
        (Some(source), Some(derived)) => Ok((source, derived)),
        _ => Err(
            "Snapshots missing; validator produced aggregate evidence only".to_string(),
        ),
    }
}

fn snapshot_timestamp(record: &Record, column: &str) -> Option<DateTime<Utc>> {
    match record.get(column)? {
        serde_json::Value::String(s) => time::parse_timestamp(s),
        serde_json::Value::Number(n) => n.as_f64().and_then(time::from_epoch_seconds),
        _ => None,
    }
}

/// Newer `updated_at` wins; missing timestamps or a tie keep the source
/// authoritative.
fn source_wins_last(source: &Record, derived: &Record, column: &str) -> bool {
    match (
        snapshot_timestamp(source, column),
        snapshot_timestamp(derived, column),
    ) {
        (Some(s), Some(d)) => s >= d,
        _ => true,
    }
}

/// Older `created_at` wins; missing timestamps or a tie keep the source
/// authoritative.
fn source_wins_first(source: &Record, derived: &Record, column: &str) -> bool {
    match (
        snapshot_timestamp(source, column),
        snapshot_timestamp(derived, column),
    ) {
        (Some(s), Some(d)) => s <= d,
        _ => true,
    }
}

fn derived_manual_reason(column: &str, relation: &str) -> String {
    format!(
        "Derived record has the {relation} '{column}'; apply it through the \
         transactional store's own write path"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dual_write::RecordingDualWriteClient;
    use accord_common::config::default_tables;
    use accord_common::types::{CheckType, Severity};
    use serde_json::json;

    fn record(pairs: &[(&str, serde_json::Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn conflict(table: &str, source: Record, derived: Record) -> ValidationResult {
        ValidationResult::failed(
            CheckType::DataHash,
            table,
            Severity::Error,
            "content differs",
        )
        .with_primary_key("k-1")
        .with_snapshots(source, derived)
    }

    fn resolver() -> (Arc<RecordingDualWriteClient>, ConflictResolver) {
        let client = Arc::new(RecordingDualWriteClient::new());
        let catalog = Arc::new(TableCatalog::new(default_tables()).unwrap());
        let resolver = ConflictResolver::new(client.clone(), catalog);
        (client, resolver)
    }

    #[tokio::test]
    async fn test_consistent_result_is_no_conflict() {
        let (client, resolver) = resolver();
        let mut result = ValidationResult::passed(CheckType::RowCount, "users", "ok");
        let before = result.clone();

        let outcome = resolver.resolve(&mut result).await;
        assert_eq!(outcome.status, ResolutionStatus::NoConflict);
        assert!(client.writes().is_empty());
        // Nothing mutated.
        assert_eq!(result.resolved, before.resolved);
        assert!(result.resolution_strategy.is_none());
        assert!(result.resolution_details.is_none());
    }

    #[tokio::test]
    async fn test_last_write_wins_newer_source_is_written() {
        let (client, resolver) = resolver();
        let source = record(&[
            ("id", json!("k-1")),
            ("email", json!("new@example.org")),
            ("updated_at", json!("2024-03-01 10:00:01")),
        ]);
        let derived = record(&[
            ("id", json!("k-1")),
            ("email", json!("old@example.org")),
            ("updated_at", json!("2024-03-01 10:00:00")),
        ]);
        let mut result = conflict("users", source.clone(), derived);

        let outcome = resolver.resolve(&mut result).await;
        assert_eq!(outcome.status, ResolutionStatus::Resolved);
        assert!(result.resolved);
        assert_eq!(
            result.resolution_strategy,
            Some(ResolutionStrategy::LastWriteWins)
        );
        let details = result.resolution_details.as_ref().unwrap();
        assert_eq!(details["operation_id"], json!("dw-1"));

        let writes = client.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].data, source);
        assert_eq!(outcome.operation_id.as_deref(), Some("dw-1"));
    }

    #[tokio::test]
    async fn test_last_write_wins_newer_derived_needs_manual_intervention() {
        let (client, resolver) = resolver();
        let source = record(&[("id", json!("k-1")), ("updated_at", json!("2024-03-01 10:00:00"))]);
        let derived = record(&[("id", json!("k-1")), ("updated_at", json!("2024-03-01 10:00:01"))]);
        let mut result = conflict("users", source, derived);

        let outcome = resolver.resolve(&mut result).await;
        assert_eq!(outcome.status, ResolutionStatus::ManualInterventionRequired);
        assert!(!result.resolved);
        assert!(client.writes().is_empty());
    }

    #[tokio::test]
    async fn test_missing_timestamps_default_to_source() {
        let (client, resolver) = resolver();
        let source = record(&[("id", json!("k-1")), ("email", json!("src@example.org"))]);
        let derived = record(&[("id", json!("k-1")), ("email", json!("drv@example.org"))]);
        let mut result = conflict("users", source.clone(), derived);

        let outcome = resolver.resolve(&mut result).await;
        assert_eq!(outcome.status, ResolutionStatus::Resolved);
        assert_eq!(client.writes()[0].data, source);
    }

    #[tokio::test]
    async fn test_first_write_wins_older_source_is_written() {
        let (client, resolver) = resolver();
        let source = record(&[("id", json!("k-1")), ("created_at", json!("2024-01-01 00:00:00"))]);
        let derived = record(&[("id", json!("k-1")), ("created_at", json!("2024-02-01 00:00:00"))]);
        let mut result = conflict("users", source.clone(), derived);
        result.resolution_strategy = Some(ResolutionStrategy::FirstWriteWins);

        let outcome = resolver.resolve(&mut result).await;
        assert_eq!(outcome.status, ResolutionStatus::Resolved);
        assert_eq!(client.writes()[0].data, source);
    }

    #[tokio::test]
    async fn test_first_write_wins_older_derived_needs_manual_intervention() {
        let (_client, resolver) = resolver();
        let source = record(&[("id", json!("k-1")), ("created_at", json!("2024-02-01 00:00:00"))]);
        let derived = record(&[("id", json!("k-1")), ("created_at", json!("2024-01-01 00:00:00"))]);
        let mut result = conflict("users", source, derived);
        result.resolution_strategy = Some(ResolutionStrategy::FirstWriteWins);

        let outcome = resolver.resolve(&mut result).await;
        assert_eq!(outcome.status, ResolutionStatus::ManualInterventionRequired);
    }

    #[tokio::test]
    async fn test_merge_fills_source_nulls_from_derived() {
        let (client, resolver) = resolver();
        let source = record(&[
            ("id", json!("k-1")),
            ("email", json!("src@example.org")),
            ("institution", json!(null)),
        ]);
        let derived = record(&[
            ("id", json!("k-1")),
            ("email", json!("drv@example.org")),
            ("institution", json!("Example University")),
            ("extra_metric", json!(7)),
        ]);
        let mut result = conflict("users", source, derived);
        result.resolution_strategy = Some(ResolutionStrategy::Merge);

        let outcome = resolver.resolve(&mut result).await;
        assert_eq!(outcome.status, ResolutionStatus::Resolved);

        let written = &client.writes()[0].data;
        // Source value kept where present, null filled, absent field added.
        assert_eq!(written["email"], json!("src@example.org"));
        assert_eq!(written["institution"], json!("Example University"));
        assert_eq!(written["extra_metric"], json!(7));
    }

    #[tokio::test]
    async fn test_business_rules_protects_user_verification_fields() {
        let (client, resolver) = resolver();
        // Derived is newer, so it is the LWW base; verification fields must
        // still come from the source.
        let source = record(&[
            ("id", json!("k-1")),
            ("is_verified", json!(true)),
            ("approval_status", json!("approved")),
            ("email", json!("src@example.org")),
            ("updated_at", json!("2024-03-01 10:00:00")),
        ]);
        let derived = record(&[
            ("id", json!("k-1")),
            ("is_verified", json!(false)),
            ("approval_status", json!("pending")),
            ("email", json!("drv@example.org")),
            ("updated_at", json!("2024-03-02 10:00:00")),
        ]);
        let mut result = conflict("users", source, derived);
        result.resolution_strategy = Some(ResolutionStrategy::BusinessRules);

        let outcome = resolver.resolve(&mut result).await;
        assert_eq!(outcome.status, ResolutionStatus::Resolved);

        let written = &client.writes()[0].data;
        assert_eq!(written["is_verified"], json!(true));
        assert_eq!(written["approval_status"], json!("approved"));
        // Non-protected field follows the newer (derived) record.
        assert_eq!(written["email"], json!("drv@example.org"));
    }

    #[tokio::test]
    async fn test_business_rules_unknown_table_falls_back_to_lww() {
        let (client, resolver) = resolver();
        let source = record(&[("id", json!("k-1")), ("updated_at", json!("2024-03-01 10:00:01"))]);
        let derived = record(&[("id", json!("k-1")), ("updated_at", json!("2024-03-01 10:00:00"))]);
        let mut result = conflict("project_pages", source.clone(), derived);
        result.resolution_strategy = Some(ResolutionStrategy::BusinessRules);

        let outcome = resolver.resolve(&mut result).await;
        assert_eq!(outcome.status, ResolutionStatus::Resolved);
        assert_eq!(client.writes()[0].data, source);
    }

    #[tokio::test]
    async fn test_missing_snapshots_is_explicit_error() {
        let (client, resolver) = resolver();
        // Row-count style result: aggregate evidence only.
        let mut result = ValidationResult::failed(
            CheckType::RowCount,
            "users",
            Severity::Warning,
            "count drift",
        )
        .with_primary_key("k-1");

        let outcome = resolver.resolve(&mut result).await;
        assert_eq!(outcome.status, ResolutionStatus::Error);
        assert!(outcome.message.contains("Snapshots missing"));
        assert!(!result.resolved);
        assert!(client.writes().is_empty());
    }

    #[tokio::test]
    async fn test_missing_primary_key_is_explicit_error() {
        let (_client, resolver) = resolver();
        let mut result = ValidationResult::failed(
            CheckType::RowCount,
            "users",
            Severity::Warning,
            "count drift",
        );

        let outcome = resolver.resolve(&mut result).await;
        assert_eq!(outcome.status, ResolutionStatus::Error);
        assert!(outcome.message.contains("no primary key"));
    }

    #[tokio::test]
    async fn test_write_failure_leaves_result_unresolved() {
        let (client, resolver) = resolver();
        client.set_failing(true);
        let source = record(&[("id", json!("k-1")), ("updated_at", json!("2024-03-01 10:00:01"))]);
        let derived = record(&[("id", json!("k-1")), ("updated_at", json!("2024-03-01 10:00:00"))]);
        let mut result = conflict("users", source, derived);

        let outcome = resolver.resolve(&mut result).await;
        assert_eq!(outcome.status, ResolutionStatus::Error);
        assert!(!result.resolved);
        assert!(result.resolution_details.is_none());
    }

    #[test]
    fn test_planning_is_deterministic() {
        let spec = TableSpec::new("users");
        let source = record(&[("id", json!("k-1")), ("updated_at", json!("2024-03-01 10:00:01"))]);
        let derived = record(&[("id", json!("k-1")), ("updated_at", json!("2024-03-01 10:00:00"))]);
        let result = conflict("users", source, derived);

        let first = plan_resolution(&result, ResolutionStrategy::LastWriteWins, &spec).unwrap();
        let second = plan_resolution(&result, ResolutionStrategy::LastWriteWins, &spec).unwrap();
        assert_eq!(first, second);
    }
}
