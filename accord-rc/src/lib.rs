//! accord-rc (Reconciler) - OLTP/OLAP consistency checking service
//!
//! Detects drift between the transactional store and its derived
//! analytical mirror, classifies severity, and (where configured) repairs
//! conflicts through the dual-write pipeline's write-back interface.
//!
//! Detection and repair run after the fact; continuous propagation is the
//! dual-write pipeline's job, and this service never writes to either
//! store directly.

use std::sync::Arc;
use std::time::Duration;

use accord_common::config::{ServiceConfig, TableCatalog};
use accord_common::Result;

pub mod dual_write;
pub mod orchestrator;
pub mod resolver;
pub mod stores;
pub mod validators;

use dual_write::{DisabledDualWriteClient, DualWriteClient, HttpDualWriteClient};
use orchestrator::{ConsistencyOrchestrator, RunSettings};
use resolver::ConflictResolver;
use stores::{AnalyticalStore, RecordStore, TransactionalStore};
use validators::{BusinessRuleValidator, DataHashValidator, RowCountValidator, Validator};

/// Build a fully wired orchestrator from service configuration: sqlite
/// store handles, dual-write client, validators, and resolver.
pub async fn build_orchestrator(config: &ServiceConfig) -> Result<ConsistencyOrchestrator> {
    let catalog = Arc::new(TableCatalog::new(config.tables.clone())?);

    let source: Arc<dyn RecordStore> = Arc::new(
        TransactionalStore::connect(&config.transactional_url, catalog.clone()).await?,
    );
    let derived: Arc<dyn RecordStore> =
        Arc::new(AnalyticalStore::new(&config.analytical_url, catalog.clone()));

    let dual_write: Arc<dyn DualWriteClient> = match &config.dual_write_endpoint {
        Some(endpoint) => Arc::new(HttpDualWriteClient::new(endpoint)?),
        None => Arc::new(DisabledDualWriteClient),
    };

    Ok(assemble(
        source,
        derived,
        dual_write,
        catalog,
        config,
    ))
}

/// Wire an orchestrator over already-constructed stores and dual-write
/// client. Used by `build_orchestrator` and by tests driving memory
/// stores.
pub fn assemble(
    source: Arc<dyn RecordStore>,
    derived: Arc<dyn RecordStore>,
    dual_write: Arc<dyn DualWriteClient>,
    catalog: Arc<TableCatalog>,
    config: &ServiceConfig,
) -> ConsistencyOrchestrator {
    let validators: Vec<Arc<dyn Validator>> = vec![
        Arc::new(
            RowCountValidator::new(source.clone(), derived.clone())
                .with_warn_percent(config.row_count_warn_percent),
        ),
        Arc::new(
            DataHashValidator::new(source.clone(), derived.clone(), catalog.clone())
                .with_sample_size(config.sample_size)
                .with_full_scan(config.hash_full_scan),
        ),
        Arc::new(
            BusinessRuleValidator::new(source.clone(), derived.clone(), catalog.clone())
                .with_scan_limit(config.scan_limit),
        ),
    ];

    let resolver = ConflictResolver::new(dual_write, catalog.clone());
    let settings = RunSettings {
        worker_concurrency: config.worker_concurrency,
        check_timeout: Duration::from_secs(config.check_timeout_secs),
        history_limit: config.history_limit,
    };

    ConsistencyOrchestrator::new(source, derived, resolver, catalog, validators, settings)
}
