//! Consistency check orchestration.
//!
//! The orchestrator is the only component with a public "run a check" /
//! "resolve these results" entry point. It fans (table x check-type) pairs
//! out over a bounded worker pool, contains every per-pair failure
//! (store outage, rule error, panic, timeout) as a critical finding, and
//! compiles the survivors into one report per run.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use accord_common::config::TableCatalog;
use accord_common::types::{
    CheckType, ConsistencyReport, PerformanceMetrics, ReportSummary, ResolutionOutcome,
    ServiceStatus, Severity, ValidationResult,
};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::resolver::ConflictResolver;
use crate::stores::RecordStore;
use crate::validators::Validator;

/// Check types run when a caller names none.
const DEFAULT_CHECKS: [CheckType; 3] = [
    CheckType::RowCount,
    CheckType::DataHash,
    CheckType::BusinessRules,
];

/// Run duration beyond which the report recommends tuning the run itself.
const LONG_RUN_WARNING: Duration = Duration::from_secs(300);

/// Phase of the current (or most recent) run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Running,
    Compiling,
    Done,
}

/// Orchestrator tuning knobs.
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Concurrent (table x check-type) pairs in flight.
    pub worker_concurrency: usize,
    /// Budget per pair; a slower check becomes a critical finding.
    pub check_timeout: Duration,
    /// Reports retained in memory.
    pub history_limit: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            worker_concurrency: 4,
            check_timeout: Duration::from_secs(30),
            history_limit: 50,
        }
    }
}

#[derive(Default)]
struct RunTotals {
    checks: u64,
    failures: u64,
}

/// Runs validators over tables, aggregates results into reports, and keeps
/// bounded history. Explicitly constructed with its stores, resolver, and
/// validator registry; no process-wide instance exists.
pub struct ConsistencyOrchestrator {
    validators: HashMap<CheckType, Arc<dyn Validator>>,
    resolver: ConflictResolver,
    source: Arc<dyn RecordStore>,
    derived: Arc<dyn RecordStore>,
    catalog: Arc<TableCatalog>,
    settings: RunSettings,
    history: Mutex<VecDeque<ConsistencyReport>>,
    totals: Mutex<RunTotals>,
    phase: Mutex<RunPhase>,
}

impl ConsistencyOrchestrator {
    pub fn new(
        source: Arc<dyn RecordStore>,
        derived: Arc<dyn RecordStore>,
        resolver: ConflictResolver,
        catalog: Arc<TableCatalog>,
        validators: Vec<Arc<dyn Validator>>,
        settings: RunSettings,
    ) -> Self {
        let mut registry: HashMap<CheckType, Arc<dyn Validator>> = HashMap::new();
        for validator in validators {
            let info = validator.info();
            registry.insert(info.check_type, validator);
        }
        Self {
            validators: registry,
            resolver,
            source,
            derived,
            catalog,
            settings,
            history: Mutex::new(VecDeque::new()),
            totals: Mutex::new(RunTotals::default()),
            phase: Mutex::new(RunPhase::Idle),
        }
    }

    /// Replace or add a validator in the registry.
    pub fn register(&mut self, validator: Arc<dyn Validator>) {
        self.validators.insert(validator.info().check_type, validator);
    }

    pub fn current_phase(&self) -> RunPhase {
        *self.phase.lock().expect("phase lock")
    }

    fn set_phase(&self, phase: RunPhase) {
        *self.phase.lock().expect("phase lock") = phase;
        tracing::debug!(phase = ?phase, "Run phase transition");
    }

    /// Run the selected check types over the selected tables.
    ///
    /// Empty `tables` defaults to the configured platform table list; empty
    /// `check_types` defaults to the three core validators. Always returns
    /// a report; per-pair failures surface inside it, never as an error.
    pub async fn run_check(
        &self,
        tables: &[String],
        check_types: &[CheckType],
        primary_key: Option<&str>,
    ) -> ConsistencyReport {
        let started = std::time::Instant::now();
        self.set_phase(RunPhase::Running);

        let tables: Vec<String> = if tables.is_empty() {
            self.catalog.table_names()
        } else {
            tables.to_vec()
        };
        let check_types: Vec<CheckType> = if check_types.is_empty() {
            DEFAULT_CHECKS
                .iter()
                .copied()
                .filter(|ct| self.validators.contains_key(ct))
                .collect()
        } else {
            check_types.to_vec()
        };

        tracing::info!(
            tables = tables.len(),
            check_types = check_types.len(),
            primary_key = ?primary_key,
            "Starting consistency check run"
        );

        let semaphore = Arc::new(Semaphore::new(self.settings.worker_concurrency.max(1)));
        let mut unmatched: HashSet<CheckType> = HashSet::new();
        let mut handles: Vec<(String, CheckType, JoinHandle<_>)> = Vec::new();

        for table in &tables {
            for check_type in &check_types {
                let Some(validator) = self.validators.get(check_type) else {
                    tracing::warn!(check_type = %check_type, "No validator registered");
                    unmatched.insert(*check_type);
                    continue;
                };
                let validator = validator.clone();
                let semaphore = semaphore.clone();
                let task_table = table.clone();
                let key = primary_key.map(|k| k.to_string());
                let check_timeout = self.settings.check_timeout;

                let handle = tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .expect("semaphore never closed");
                    timeout(check_timeout, validator.validate(&task_table, key.as_deref())).await
                });
                handles.push((table.clone(), *check_type, handle));
            }
        }

        let mut results: Vec<ValidationResult> = Vec::new();
        for (table, check_type, handle) in handles {
            match handle.await {
                Ok(Ok(mut pair_results)) => results.append(&mut pair_results),
                Ok(Err(_elapsed)) => {
                    tracing::warn!(table = %table, check_type = %check_type, "Check timed out");
                    results.push(ValidationResult::failed(
                        check_type,
                        &table,
                        Severity::Critical,
                        format!(
                            "Check timed out after {}s",
                            self.settings.check_timeout.as_secs()
                        ),
                    ));
                }
                Err(join_error) => {
                    // A panicking validator is a programming error, but it
                    // must not take the rest of the run with it.
                    tracing::error!(
                        table = %table,
                        check_type = %check_type,
                        error = %join_error,
                        "Validator task failed"
                    );
                    results.push(ValidationResult::failed(
                        check_type,
                        &table,
                        Severity::Critical,
                        format!("Validator task failed: {join_error}"),
                    ));
                }
            }
        }

        self.set_phase(RunPhase::Compiling);
        let duration = started.elapsed();
        let mut recommendations = generate_recommendations(&results, duration);
        if !unmatched.is_empty() && results.is_empty() {
            recommendations.push("Request matched no registered validators".to_string());
        }

        let total = results.len();
        let performance = PerformanceMetrics {
            duration_seconds: duration.as_secs_f64(),
            checks_per_second: if duration.as_secs_f64() > 0.0 {
                total as f64 / duration.as_secs_f64()
            } else {
                0.0
            },
            tables_checked: tables.len(),
            check_types_run: check_types.len(),
        };

        let report = ConsistencyReport::compile(results, recommendations, performance);

        {
            let mut totals = self.totals.lock().expect("totals lock");
            totals.checks += report.total_checks as u64;
            totals.failures += report.failed_checks as u64;
        }
        {
            let mut history = self.history.lock().expect("history lock");
            history.push_back(report.clone());
            while history.len() > self.settings.history_limit {
                history.pop_front();
            }
        }

        tracing::info!(
            report_id = %report.report_id,
            total_checks = report.total_checks,
            failed_checks = report.failed_checks,
            consistency_score = report.consistency_score,
            duration_seconds = report.performance.duration_seconds,
            "Consistency check run complete"
        );
        self.set_phase(RunPhase::Done);
        report
    }

    /// Resolve every inconsistent result in place, collecting one outcome
    /// per attempt. One failed resolution never blocks the rest.
    pub async fn resolve_conflicts(
        &self,
        results: &mut [ValidationResult],
    ) -> Vec<ResolutionOutcome> {
        let mut outcomes = Vec::new();
        for result in results.iter_mut().filter(|r| !r.is_consistent) {
            outcomes.push(self.resolver.resolve(result).await);
        }
        tracing::info!(
            attempted = outcomes.len(),
            resolved = outcomes
                .iter()
                .filter(|o| o.status == accord_common::types::ResolutionStatus::Resolved)
                .count(),
            "Conflict resolution pass complete"
        );
        outcomes
    }

    /// Most recent report summaries, newest first.
    pub fn get_history(&self, limit: usize) -> Vec<ReportSummary> {
        let history = self.history.lock().expect("history lock");
        history.iter().rev().take(limit).map(|r| r.summary()).collect()
    }

    /// Rolling service status over retained history.
    pub fn get_status(&self) -> ServiceStatus {
        let history = self.history.lock().expect("history lock");
        let totals = self.totals.lock().expect("totals lock");

        let average_consistency_score = if history.is_empty() {
            100.0
        } else {
            history.iter().map(|r| r.consistency_score).sum::<f64>() / history.len() as f64
        };
        let failure_rate_percent = if totals.checks == 0 {
            0.0
        } else {
            totals.failures as f64 / totals.checks as f64 * 100.0
        };

        let mut available_validators: Vec<CheckType> =
            self.validators.keys().copied().collect();
        available_validators.sort_by_key(|ct| ct.as_str());

        ServiceStatus {
            available_validators,
            history_count: history.len(),
            average_consistency_score,
            total_checks_run: totals.checks,
            total_failures: totals.failures,
            failure_rate_percent,
            supported_strategies: self.resolver.supported_strategies(),
        }
    }

    /// Close both store handles. The orchestrator is unusable afterwards.
    pub async fn shutdown(&self) {
        self.source.close().await;
        self.derived.close().await;
        tracing::info!("Orchestrator shut down");
    }
}

/// Deterministic recommendations for one run's results.
///
/// Table names iterate sorted and check types in declaration order, so the
/// same results always produce the same lines in the same order.
fn generate_recommendations(results: &[ValidationResult], duration: Duration) -> Vec<String> {
    let mut recommendations = Vec::new();

    let mut per_table: HashMap<&str, usize> = HashMap::new();
    let mut per_check: HashMap<CheckType, usize> = HashMap::new();
    for result in results.iter().filter(|r| !r.is_consistent) {
        *per_table.entry(result.table.as_str()).or_default() += 1;
        *per_check.entry(result.check_type).or_default() += 1;
    }

    let mut tables: Vec<_> = per_table.iter().collect();
    tables.sort();
    for (table, failures) in tables {
        if *failures >= 5 {
            recommendations.push(format!(
                "Resynchronize table '{table}': {failures} failing checks"
            ));
        } else if *failures >= 2 {
            recommendations.push(format!(
                "Monitor table '{table}': {failures} failing checks"
            ));
        }
    }

    for check_type in CheckType::ALL {
        let Some(failures) = per_check.get(&check_type) else {
            continue;
        };
        let hint = match check_type {
            CheckType::RowCount => {
                "Row counts diverge: check dual-write sync lag and \
                 retention/TTL skew between stores"
            }
            CheckType::DataHash => {
                "Content hashes diverge: investigate data corruption or \
                 transform fidelity in the sync pipeline"
            }
            CheckType::BusinessRules => {
                "Business rule violations found: review data-quality \
                 processes upstream"
            }
            _ => continue,
        };
        recommendations.push(format!("{hint} ({failures} findings)"));
    }

    if !results.is_empty() && results.iter().any(|r| r.severity == Severity::Critical) {
        recommendations
            .push("Critical inconsistencies present: immediate attention required".to_string());
    }

    if duration > LONG_RUN_WARNING {
        recommendations.push(format!(
            "Run took {:.0}s: consider sampling or narrowing the table set",
            duration.as_secs_f64()
        ));
    }

    let total = results.len();
    if total > 0 {
        let passed = results.iter().filter(|r| r.is_consistent).count();
        let score = passed as f64 / total as f64 * 100.0;
        if score < 95.0 {
            recommendations.push(
                "Consistency below 95%: schedule a full resynchronization".to_string(),
            );
        } else if score < 99.0 {
            recommendations.push(
                "Consistency between 95% and 99%: tune the dual-write pipeline".to_string(),
            );
        }
    }

    recommendations
}
