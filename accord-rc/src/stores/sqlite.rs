//! sqlx-backed store implementations.
//!
//! Two access disciplines, deliberately different:
//! - `TransactionalStore` runs against the OLTP engine through a pool with
//!   short-lived scoped acquisition; the connection is released on every
//!   exit path by RAII.
//! - `AnalyticalStore` holds the OLAP engine's single lazily-created cached
//!   connection behind an async mutex. `SqliteConnection` requires `&mut`
//!   for every query, so one outstanding use at a time is enforced by the
//!   type system, not by convention.
//!
//! Identifiers cannot be bound as SQL parameters, so every table/column
//! name is checked against the table catalog before it is interpolated.

use std::sync::Arc;

use accord_common::config::{is_valid_identifier, TableCatalog};
use accord_common::types::Record;
use accord_common::{Error, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Connection, Row, SqliteConnection, SqlitePool, TypeInfo, ValueRef};
use tokio::sync::Mutex;

use super::RecordStore;

/// Pooled access to the transactional (OLTP) store.
pub struct TransactionalStore {
    pool: SqlitePool,
    catalog: Arc<TableCatalog>,
}

impl TransactionalStore {
    /// Connect to the transactional store.
    pub async fn connect(url: &str, catalog: Arc<TableCatalog>) -> Result<Self> {
        let pool = SqlitePool::connect(url)
            .await
            .map_err(|e| Error::store("transactional", e.to_string()))?;
        tracing::info!(url = %url, "Connected to transactional store");
        Ok(Self { pool, catalog })
    }

    fn store_err(&self, e: sqlx::Error) -> Error {
        Error::store(self.name(), e.to_string())
    }
}

#[async_trait]
impl RecordStore for TransactionalStore {
    fn name(&self) -> &str {
        "transactional"
    }

    async fn count(&self, table: &str) -> Result<i64> {
        let sql = count_sql(&self.catalog, table)?;
        let mut conn = self.pool.acquire().await.map_err(|e| self.store_err(e))?;
        sqlx::query_scalar(&sql)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| self.store_err(e))
    }

    async fn count_by(&self, table: &str, column: &str, value: &str) -> Result<i64> {
        let sql = count_by_sql(&self.catalog, table, column)?;
        let mut conn = self.pool.acquire().await.map_err(|e| self.store_err(e))?;
        sqlx::query_scalar(&sql)
            .bind(value)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| self.store_err(e))
    }

    async fn fetch(&self, table: &str, primary_key: &str) -> Result<Option<Record>> {
        let sql = fetch_sql(&self.catalog, table)?;
        let mut conn = self.pool.acquire().await.map_err(|e| self.store_err(e))?;
        let row = sqlx::query(&sql)
            .bind(primary_key)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| self.store_err(e))?;
        row.map(|r| row_to_record(&r)).transpose()
    }

    async fn sample_keys(&self, table: &str, limit: u32) -> Result<Vec<String>> {
        let sql = sample_keys_sql(&self.catalog, table)?;
        let mut conn = self.pool.acquire().await.map_err(|e| self.store_err(e))?;
        sqlx::query_scalar(&sql)
            .bind(limit as i64)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| self.store_err(e))
    }

    async fn scan(&self, table: &str, limit: u32) -> Result<Vec<Record>> {
        let sql = scan_sql(&self.catalog, table)?;
        let mut conn = self.pool.acquire().await.map_err(|e| self.store_err(e))?;
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| self.store_err(e))?;
        rows.iter().map(row_to_record).collect()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Single cached connection to the analytical (OLAP) store.
///
/// The connection is created on first use and kept for the store's
/// lifetime. All access is serialized through the mutex.
pub struct AnalyticalStore {
    url: String,
    catalog: Arc<TableCatalog>,
    conn: Mutex<Option<SqliteConnection>>,
}

impl AnalyticalStore {
    /// Prepare a handle without connecting; the connection is established
    /// by the first query.
    pub fn new(url: &str, catalog: Arc<TableCatalog>) -> Self {
        Self {
            url: url.to_string(),
            catalog,
            conn: Mutex::new(None),
        }
    }

    fn store_err(&self, e: sqlx::Error) -> Error {
        Error::store(self.name(), e.to_string())
    }
}

// Locks the cached connection, establishing it on first use. Yields an
// exclusive `&mut SqliteConnection` for the duration of the guard.
macro_rules! analytical_conn {
    ($self:ident, $guard:ident, $conn:ident) => {
        let mut $guard = $self.conn.lock().await;
        let $conn = match &mut *$guard {
            Some(conn) => conn,
            slot @ None => {
                let conn = SqliteConnection::connect(&$self.url)
                    .await
                    .map_err(|e| $self.store_err(e))?;
                tracing::info!(url = %$self.url, "Connected to analytical store");
                slot.insert(conn)
            }
        };
    };
}

#[async_trait]
impl RecordStore for AnalyticalStore {
    fn name(&self) -> &str {
        "analytical"
    }

    async fn count(&self, table: &str) -> Result<i64> {
        let sql = count_sql(&self.catalog, table)?;
        analytical_conn!(self, guard, conn);
        sqlx::query_scalar(&sql)
            .fetch_one(conn)
            .await
            .map_err(|e| self.store_err(e))
    }

    async fn count_by(&self, table: &str, column: &str, value: &str) -> Result<i64> {
        let sql = count_by_sql(&self.catalog, table, column)?;
        analytical_conn!(self, guard, conn);
        sqlx::query_scalar(&sql)
            .bind(value)
            .fetch_one(conn)
            .await
            .map_err(|e| self.store_err(e))
    }

    async fn fetch(&self, table: &str, primary_key: &str) -> Result<Option<Record>> {
        let sql = fetch_sql(&self.catalog, table)?;
        analytical_conn!(self, guard, conn);
        let row = sqlx::query(&sql)
            .bind(primary_key)
            .fetch_optional(conn)
            .await
            .map_err(|e| self.store_err(e))?;
        row.map(|r| row_to_record(&r)).transpose()
    }

    async fn sample_keys(&self, table: &str, limit: u32) -> Result<Vec<String>> {
        let sql = sample_keys_sql(&self.catalog, table)?;
        analytical_conn!(self, guard, conn);
        sqlx::query_scalar(&sql)
            .bind(limit as i64)
            .fetch_all(conn)
            .await
            .map_err(|e| self.store_err(e))
    }

    async fn scan(&self, table: &str, limit: u32) -> Result<Vec<Record>> {
        let sql = scan_sql(&self.catalog, table)?;
        analytical_conn!(self, guard, conn);
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(conn)
            .await
            .map_err(|e| self.store_err(e))?;
        rows.iter().map(row_to_record).collect()
    }

    async fn close(&self) {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.take() {
            if let Err(e) = conn.close().await {
                tracing::warn!(error = %e, "Error closing analytical connection");
            }
        }
    }
}

fn count_sql(catalog: &TableCatalog, table: &str) -> Result<String> {
    let spec = catalog.spec(table)?;
    Ok(format!("SELECT COUNT(*) FROM {}", spec.name))
}

fn count_by_sql(catalog: &TableCatalog, table: &str, column: &str) -> Result<String> {
    let spec = catalog.spec(table)?;
    if !is_valid_identifier(column) {
        return Err(Error::InvalidInput(format!("invalid column name: {column}")));
    }
    Ok(format!(
        "SELECT COUNT(*) FROM {} WHERE {} = ?",
        spec.name, column
    ))
}

fn fetch_sql(catalog: &TableCatalog, table: &str) -> Result<String> {
    let spec = catalog.spec(table)?;
    Ok(format!(
        "SELECT * FROM {} WHERE {} = ? LIMIT 1",
        spec.name, spec.primary_key
    ))
}

fn sample_keys_sql(catalog: &TableCatalog, table: &str) -> Result<String> {
    let spec = catalog.spec(table)?;
    // CAST keeps integer keys comparable with text bindings downstream.
    Ok(format!(
        "SELECT CAST({} AS TEXT) FROM {} ORDER BY RANDOM() LIMIT ?",
        spec.primary_key, spec.name
    ))
}

fn scan_sql(catalog: &TableCatalog, table: &str) -> Result<String> {
    let spec = catalog.spec(table)?;
    Ok(format!(
        "SELECT * FROM {} ORDER BY {} LIMIT ?",
        spec.name, spec.primary_key
    ))
}

/// Decode a dynamically-shaped row into a column -> JSON value map.
fn row_to_record(row: &SqliteRow) -> Result<Record> {
    let mut record = Record::new();
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            serde_json::Value::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" => serde_json::Value::from(row.try_get::<i64, _>(i)?),
                "REAL" => serde_json::Value::from(row.try_get::<f64, _>(i)?),
                "BLOB" => {
                    let bytes: Vec<u8> = row.try_get(i)?;
                    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
                    serde_json::Value::from(hex)
                }
                _ => serde_json::Value::from(row.try_get::<String, _>(i)?),
            }
        };
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_common::config::TableSpec;
    use tempfile::TempDir;

    async fn fixture() -> (TempDir, TransactionalStore) {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("t.db").display());
        let pool = SqlitePool::connect(&url).await.unwrap();
        sqlx::query(
            "CREATE TABLE users (id TEXT PRIMARY KEY, email TEXT, age INTEGER, \
             score REAL, avatar BLOB, created_at TEXT, updated_at TEXT)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO users (id, email, age, score, avatar, created_at, updated_at) \
             VALUES ('u-1', 'ada@example.org', 36, 0.5, X'CAFE', \
             '2024-01-01 10:00:00', '2024-01-02 10:00:00')",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;

        let catalog = Arc::new(TableCatalog::new(vec![TableSpec::new("users")]).unwrap());
        let store = TransactionalStore::connect(&url, catalog).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_count_and_fetch_decode_native_types() {
        let (_dir, store) = fixture().await;

        assert_eq!(store.count("users").await.unwrap(), 1);

        let record = store.fetch("users", "u-1").await.unwrap().unwrap();
        assert_eq!(record["email"], serde_json::json!("ada@example.org"));
        assert_eq!(record["age"], serde_json::json!(36));
        assert_eq!(record["score"], serde_json::json!(0.5));
        assert_eq!(record["avatar"], serde_json::json!("cafe"));

        assert!(store.fetch("users", "u-404").await.unwrap().is_none());
        store.close().await;
    }

    #[tokio::test]
    async fn test_unknown_table_is_rejected_before_sql() {
        let (_dir, store) = fixture().await;
        let err = store.count("users2").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        store.close().await;
    }

    #[tokio::test]
    async fn test_analytical_store_connects_lazily() {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("a.db").display());
        let pool = SqlitePool::connect(&url).await.unwrap();
        sqlx::query("CREATE TABLE users (id TEXT PRIMARY KEY, email TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO users (id, email) VALUES ('u-1', 'ada@example.org')")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        let catalog = Arc::new(TableCatalog::new(vec![TableSpec::new("users")]).unwrap());
        let store = AnalyticalStore::new(&url, catalog);

        // No connection yet; first query creates it.
        assert!(store.conn.lock().await.is_none());
        assert_eq!(store.count("users").await.unwrap(), 1);
        assert!(store.conn.lock().await.is_some());

        let keys = store.sample_keys("users", 10).await.unwrap();
        assert_eq!(keys, vec!["u-1".to_string()]);

        store.close().await;
        assert!(store.conn.lock().await.is_none());
    }
}
