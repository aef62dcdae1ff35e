//! Store boundary: uniform async access to the transactional and analytical
//! stores.
//!
//! Validators and the resolver only ever see `dyn RecordStore`; which engine
//! sits behind it (pooled sqlite for the transactional side, a single cached
//! connection for the analytical side, or the in-memory backend used by the
//! test suite) is a construction-time decision.

use accord_common::types::Record;
use accord_common::Result;
use async_trait::async_trait;

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{AnalyticalStore, TransactionalStore};

/// Read access to one store. Repair writes never go through this trait; the
/// only write path is the dual-write pipeline interface.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Short store name used in findings and error messages
    /// ("transactional" / "analytical").
    fn name(&self) -> &str;

    /// Row count for a registered table.
    async fn count(&self, table: &str) -> Result<i64>;

    /// Row count for rows whose `column` equals `value`.
    async fn count_by(&self, table: &str, column: &str, value: &str) -> Result<i64>;

    /// Fetch one record by primary key; `None` when the row is absent.
    async fn fetch(&self, table: &str, primary_key: &str) -> Result<Option<Record>>;

    /// Draw up to `limit` primary keys at random.
    async fn sample_keys(&self, table: &str, limit: u32) -> Result<Vec<String>>;

    /// Read up to `limit` full records, primary-key ordered.
    async fn scan(&self, table: &str, limit: u32) -> Result<Vec<Record>>;

    /// Release any held connections. Safe to call more than once.
    async fn close(&self);
}
