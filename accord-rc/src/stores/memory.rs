//! In-memory store backend.
//!
//! Backs the test suite and local development runs: seed both sides,
//! inject drift or store failures, and drive the full pipeline without an
//! external engine.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use accord_common::types::Record;
use accord_common::{Error, Result};
use async_trait::async_trait;

use super::RecordStore;

pub struct MemoryStore {
    name: String,
    /// table -> primary key -> record
    tables: RwLock<HashMap<String, BTreeMap<String, Record>>>,
    /// Tables whose queries fail with `StoreUnavailable`.
    failing: RwLock<HashSet<String>>,
}

impl MemoryStore {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tables: RwLock::new(HashMap::new()),
            failing: RwLock::new(HashSet::new()),
        }
    }

    pub fn insert(&self, table: &str, primary_key: &str, record: Record) {
        self.tables
            .write()
            .expect("memory store lock")
            .entry(table.to_string())
            .or_default()
            .insert(primary_key.to_string(), record);
    }

    pub fn remove(&self, table: &str, primary_key: &str) {
        if let Some(rows) = self
            .tables
            .write()
            .expect("memory store lock")
            .get_mut(table)
        {
            rows.remove(primary_key);
        }
    }

    /// Make every query against `table` fail, simulating an unreachable
    /// store scoped to one table.
    pub fn set_failing(&self, table: &str, failing: bool) {
        let mut set = self.failing.write().expect("memory store lock");
        if failing {
            set.insert(table.to_string());
        } else {
            set.remove(table);
        }
    }

    fn check_available(&self, table: &str) -> Result<()> {
        if self.failing.read().expect("memory store lock").contains(table) {
            return Err(Error::store(
                &self.name,
                format!("simulated outage for table '{table}'"),
            ));
        }
        Ok(())
    }

    fn rows(&self, table: &str) -> BTreeMap<String, Record> {
        self.tables
            .read()
            .expect("memory store lock")
            .get(table)
            .cloned()
            .unwrap_or_default()
    }
}

/// Text form used for key/value comparisons, matching how the sqlite
/// backend casts keys to text.
fn as_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn count(&self, table: &str) -> Result<i64> {
        self.check_available(table)?;
        Ok(self.rows(table).len() as i64)
    }

    async fn count_by(&self, table: &str, column: &str, value: &str) -> Result<i64> {
        self.check_available(table)?;
        let n = self
            .rows(table)
            .values()
            .filter(|r| r.get(column).map(as_text).as_deref() == Some(value))
            .count();
        Ok(n as i64)
    }

    async fn fetch(&self, table: &str, primary_key: &str) -> Result<Option<Record>> {
        self.check_available(table)?;
        Ok(self.rows(table).get(primary_key).cloned())
    }

    async fn sample_keys(&self, table: &str, limit: u32) -> Result<Vec<String>> {
        self.check_available(table)?;
        // Key order instead of a random draw keeps tests deterministic.
        Ok(self
            .rows(table)
            .keys()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn scan(&self, table: &str, limit: u32) -> Result<Vec<Record>> {
        self.check_available(table)?;
        Ok(self
            .rows(table)
            .values()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn close(&self) {}
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

    #[tokio::test]
    async fn test_crud_and_counts() {
        let store = MemoryStore::new("transactional");
        store.insert("users", "u-1", record(&[("id", json!("u-1"))]));
        store.insert(
            "users",
            "u-2",
            record(&[("id", json!("u-2")), ("role", json!("admin"))]),
        );

        assert_eq!(store.count("users").await.unwrap(), 2);
        assert_eq!(store.count_by("users", "role", "admin").await.unwrap(), 1);
        assert!(store.fetch("users", "u-1").await.unwrap().is_some());
        assert!(store.fetch("users", "u-9").await.unwrap().is_none());
        assert_eq!(store.count("empty_table").await.unwrap(), 0);

        store.remove("users", "u-2");
        assert_eq!(store.count("users").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failure_injection_is_table_scoped() {
        let store = MemoryStore::new("analytical");
        store.insert("users", "u-1", record(&[("id", json!("u-1"))]));
        store.insert("projects", "p-1", record(&[("id", json!("p-1"))]));
        store.set_failing("users", true);

        assert!(store.count("users").await.is_err());
        assert_eq!(store.count("projects").await.unwrap(), 1);

        store.set_failing("users", false);
        assert_eq!(store.count("users").await.unwrap(), 1);
    }
}
