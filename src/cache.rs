use crate::aggregate::{AggSpec, AggregateResult, AggregationEngine};
use crate::error::Result;
use crate::types::TableId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    table: TableId,
    spec: AggSpec,
    version: u64,
}

struct CacheEntry {
    cell: tokio::sync::OnceCell<Arc<AggregateResult>>,
    inserted_at: Instant,
}

/// Get-or-compute cache for aggregation results, keyed by (table, spec,
/// data-version). Entries expire after the TTL; a new data version makes the
/// old key unreachable, so loader commits invalidate implicitly.
///
/// Single-flight: the registry lock is only held to look up or insert the
/// per-key cell, never across the computation, so unrelated queries are not
/// serialized. Concurrent callers for one key all await the same cell and
/// exactly one of them runs the computation.
pub struct QueryCache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, Arc<CacheEntry>>>,
}

impl QueryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Drop every cached entry, forcing recomputation on next access.
    pub fn refresh(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub async fn get_or_compute<F, Fut>(
        &self,
        table: TableId,
        spec: &AggSpec,
        version: u64,
        compute: F,
    ) -> Result<Arc<AggregateResult>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AggregateResult>>,
    {
        let key = CacheKey {
            table,
            spec: spec.clone(),
            version,
        };

        let entry = {
            let mut entries = self.entries.lock().unwrap();
            let now = Instant::now();
            entries.retain(|_, e| now.duration_since(e.inserted_at) < self.ttl);
            entries
                .entry(key)
                .or_insert_with(|| {
                    Arc::new(CacheEntry {
                        cell: tokio::sync::OnceCell::new(),
                        inserted_at: now,
                    })
                })
                .clone()
        };

        // A failed computation leaves the cell empty, so errors are not cached.
        let result = entry
            .cell
            .get_or_try_init(|| async {
                debug!(table = %table, "computing aggregation");
                compute().await.map(Arc::new)
            })
            .await?;
        Ok(result.clone())
    }
}

/// Aggregation engine behind the TTL/single-flight cache; the query surface
/// the presentation layer talks to.
pub struct CachedQueries {
    engine: AggregationEngine,
    cache: QueryCache,
}

impl CachedQueries {
    pub fn new(engine: AggregationEngine, ttl: Duration) -> Self {
        Self {
            engine,
            cache: QueryCache::new(ttl),
        }
    }

    pub async fn query(&self, table: TableId, spec: &AggSpec) -> Result<Arc<AggregateResult>> {
        let version = self.engine.data_version(table, spec).await?;
        self.cache
            .get_or_compute(table, spec, version, || self.engine.execute(table, spec))
            .await
    }

    pub fn refresh(&self) {
        self.cache.refresh();
    }
}
