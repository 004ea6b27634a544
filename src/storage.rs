use crate::error::Result;
use crate::types::{Row, TableId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Storage trait for committed table state. One implementation per backend;
/// the handle is passed explicitly to every caller, never held in a global.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Create the table with its fixed column specification if absent.
    async fn ensure_schema(&self, table: TableId) -> Result<()>;

    /// Upsert a batch of rows by natural key; new values overwrite old.
    /// A successful commit bumps the table's data version.
    async fn upsert_batch(&self, table: TableId, rows: &[Row]) -> Result<()>;

    /// All rows of a table, ordered by natural key ascending.
    async fn fetch_all(&self, table: TableId) -> Result<Vec<Row>>;

    async fn row_count(&self, table: TableId) -> Result<usize>;

    /// Monotonic per-table version; changes whenever a batch commits.
    async fn data_version(&self, table: TableId) -> Result<u64>;

    /// Cheap connectivity probe, fatal at startup when it fails.
    async fn healthcheck(&self) -> Result<()>;
}

/// In-memory storage implementation for development and testing.
#[derive(Default)]
pub struct InMemoryStorage {
    tables: Arc<Mutex<HashMap<TableId, HashMap<String, Row>>>>,
    versions: Arc<Mutex<HashMap<TableId, u64>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn ensure_schema(&self, table: TableId) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        tables.entry(table).or_default();
        debug!("Ensured schema for table {}", table);
        Ok(())
    }

    async fn upsert_batch(&self, table: TableId, rows: &[Row]) -> Result<()> {
        {
            let mut tables = self.tables.lock().unwrap();
            let entries = tables.entry(table).or_default();
            for row in rows {
                entries.insert(row.natural_key(), row.clone());
            }
        }
        let mut versions = self.versions.lock().unwrap();
        *versions.entry(table).or_insert(0) += 1;
        debug!("Upserted {} rows into {}", rows.len(), table);
        Ok(())
    }

    async fn fetch_all(&self, table: TableId) -> Result<Vec<Row>> {
        let tables = self.tables.lock().unwrap();
        let mut rows: Vec<(String, Row)> = tables
            .get(&table)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }

    async fn row_count(&self, table: TableId) -> Result<usize> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.get(&table).map(|t| t.len()).unwrap_or(0))
    }

    async fn data_version(&self, table: TableId) -> Result<u64> {
        let versions = self.versions.lock().unwrap();
        Ok(versions.get(&table).copied().unwrap_or(0))
    }

    async fn healthcheck(&self) -> Result<()> {
        Ok(())
    }
}
