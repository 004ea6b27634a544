use crate::error::{AtlasError, Result};
use crate::storage::Storage;
use crate::types::{Row, TableId};
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// Outcome of loading one table: committed batches stand even when later
/// batches fail, so a partial load is reported rather than rolled back.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub table: TableId,
    pub loaded_rows: usize,
    pub failed_batches: Vec<String>,
    pub cancelled: bool,
}

/// Persistence loader: batches normalized rows and upserts them by natural
/// key. A failed batch is retried once, then reported as a partial-load error.
pub struct Loader {
    storage: Arc<dyn Storage>,
    batch_size: usize,
}

impl Loader {
    pub fn new(storage: Arc<dyn Storage>, batch_size: usize) -> Self {
        Self {
            storage,
            batch_size: batch_size.max(1),
        }
    }

    #[instrument(skip(self, rows, stop), fields(table = %table))]
    pub async fn load_table(
        &self,
        table: TableId,
        rows: &[Row],
        stop: &watch::Receiver<bool>,
    ) -> Result<LoadReport> {
        self.storage.ensure_schema(table).await?;

        let mut report = LoadReport {
            table,
            loaded_rows: 0,
            failed_batches: Vec::new(),
            cancelled: false,
        };

        for (batch_idx, batch) in rows.chunks(self.batch_size).enumerate() {
            // Cooperative cancellation: checked between batches so an
            // in-flight batch always finishes.
            if *stop.borrow() {
                info!(table = %table, "stop requested, finishing load early");
                report.cancelled = true;
                break;
            }

            match self.commit_batch(table, batch).await {
                Ok(()) => {
                    report.loaded_rows += batch.len();
                    counter!("atlas_rows_loaded_total", "table" => table.as_str())
                        .increment(batch.len() as u64);
                }
                Err(AtlasError::StorageUnreachable(message)) => {
                    // Unreachable storage aborts the whole run
                    return Err(AtlasError::StorageUnreachable(message));
                }
                Err(e) => {
                    warn!(table = %table, batch = batch_idx, "batch failed after retry: {}", e);
                    counter!("atlas_batch_failures_total", "table" => table.as_str()).increment(1);
                    report
                        .failed_batches
                        .push(format!("batch {batch_idx} ({} rows): {e}", batch.len()));
                }
            }
        }

        info!(
            table = %table,
            loaded = report.loaded_rows,
            failed_batches = report.failed_batches.len(),
            "load complete"
        );
        Ok(report)
    }

    async fn commit_batch(&self, table: TableId, batch: &[Row]) -> Result<()> {
        match self.storage.upsert_batch(table, batch).await {
            Ok(()) => Ok(()),
            Err(AtlasError::StorageUnreachable(m)) => Err(AtlasError::StorageUnreachable(m)),
            Err(first) => {
                debug!(table = %table, "batch write failed, retrying once: {}", first);
                self.storage.upsert_batch(table, batch).await
            }
        }
    }
}
