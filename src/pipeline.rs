use crate::error::Result;
use crate::loader::{LoadReport, Loader};
use crate::normalize::{Normalizer, Rejection};
use crate::sources::{DataSource, FetchContext};
use crate::storage::Storage;
use crate::types::TableId;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Stages of one ingestion run. Failed is terminal and reachable from any
/// stage; partial source failure still ends in Done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Idle,
    Fetching,
    Normalizing,
    Loading,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceFailure {
    pub source_name: String,
    pub error: String,
}

/// Full account of one ingestion run, returned to the caller and printed by
/// the CLI. Per-source and per-record failures live here instead of aborting.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub sources_attempted: usize,
    pub sources_succeeded: usize,
    pub source_failures: Vec<SourceFailure>,
    pub fetched_records: usize,
    pub normalized_rows: usize,
    pub deduplicated: usize,
    pub rejections: Vec<Rejection>,
    pub load_reports: Vec<LoadReport>,
    pub cancelled: bool,
}

impl RunReport {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            state: RunState::Idle,
            started_at: Utc::now(),
            finished_at: None,
            sources_attempted: 0,
            sources_succeeded: 0,
            source_failures: Vec::new(),
            fetched_records: 0,
            normalized_rows: 0,
            deduplicated: 0,
            rejections: Vec::new(),
            load_reports: Vec::new(),
            cancelled: false,
        }
    }

    pub fn partial_load_errors(&self) -> usize {
        self.load_reports.iter().map(|r| r.failed_batches.len()).sum()
    }
}

/// Sequential fetch -> normalize -> load pipeline for one invocation.
/// Fetching overlaps across independent sources; everything downstream is a
/// single logical writer per table.
pub struct IngestionPipeline {
    storage: Arc<dyn Storage>,
    batch_size: usize,
}

impl IngestionPipeline {
    pub fn new(storage: Arc<dyn Storage>, batch_size: usize) -> Self {
        Self { storage, batch_size }
    }

    #[instrument(skip(self, sources, ctx, stop), fields(sources = sources.len()))]
    pub async fn run(
        &self,
        sources: Vec<Box<dyn DataSource>>,
        ctx: FetchContext,
        stop: watch::Receiver<bool>,
    ) -> Result<RunReport> {
        let mut report = RunReport::new();
        let t_run = std::time::Instant::now();
        counter!("atlas_ingest_runs_total").increment(1);

        // Storage must be reachable before any work happens
        if let Err(e) = self.storage.healthcheck().await {
            error!("storage unreachable, aborting run: {}", e);
            report.state = RunState::Failed;
            report.finished_at = Some(Utc::now());
            return Err(e);
        }

        // Stage 1: fetch, overlapping across independent sources. The HTTP
        // rate limiter bounds concurrency against the external site.
        report.state = RunState::Fetching;
        report.sources_attempted = sources.len();
        info!(run_id = %report.run_id, "fetching {} sources", sources.len());
        let t_fetch = std::time::Instant::now();

        let mut join_set = JoinSet::new();
        for source in sources {
            let ctx = ctx.clone();
            join_set.spawn(async move {
                let name = source.source_name();
                (name, source.fetch(&ctx).await)
            });
        }

        let mut raw_records = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, Ok(records))) => {
                    report.sources_succeeded += 1;
                    report.fetched_records += records.len();
                    counter!("atlas_records_fetched_total", "source" => name)
                        .increment(records.len() as u64);
                    raw_records.push((name, records));
                }
                Ok((name, Err(e))) => {
                    warn!(source = name, "source failed: {}", e);
                    counter!("atlas_source_failures_total", "source" => name).increment(1);
                    report.source_failures.push(SourceFailure {
                        source_name: name.to_string(),
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    error!("fetch task panicked: {}", e);
                    report.source_failures.push(SourceFailure {
                        source_name: "unknown".to_string(),
                        error: format!("fetch task panicked: {e}"),
                    });
                }
            }
        }
        histogram!("atlas_fetch_duration_seconds").record(t_fetch.elapsed().as_secs_f64());

        if report.sources_attempted > 0 && report.sources_succeeded == 0 {
            error!(run_id = %report.run_id, "no source could be reached");
            report.state = RunState::Failed;
            report.finished_at = Some(Utc::now());
            return Ok(report);
        }

        // Stable ordering across sources so "most recently processed wins"
        // is deterministic between runs. Sequence numbers are reassigned
        // run-globally so the rule also holds across sources feeding the
        // same table.
        raw_records.sort_by_key(|(name, _)| *name);
        let mut next_seq: u64 = 0;
        for (_, records) in &mut raw_records {
            for record in records.iter_mut() {
                record.fetch_seq = next_seq;
                next_seq += 1;
            }
        }

        // Stage 2: normalize, deduplicate, resolve references
        report.state = RunState::Normalizing;
        let t_normalize = std::time::Instant::now();
        let mut normalizer = Normalizer::new();
        for (_, records) in &raw_records {
            for record in records {
                normalizer.ingest(record);
            }
        }
        let outcome = normalizer.finish();
        report.normalized_rows = outcome.rows.values().map(|v| v.len()).sum();
        report.deduplicated = outcome.deduplicated;
        report.rejections = outcome.rejections;
        counter!("atlas_rows_normalized_total").increment(report.normalized_rows as u64);
        counter!("atlas_records_rejected_total").increment(report.rejections.len() as u64);
        histogram!("atlas_normalize_duration_seconds").record(t_normalize.elapsed().as_secs_f64());
        info!(
            run_id = %report.run_id,
            normalized = report.normalized_rows,
            rejected = report.rejections.len(),
            deduplicated = report.deduplicated,
            "normalization complete"
        );

        // Stage 3: load per table, in a fixed table order
        report.state = RunState::Loading;
        let t_load = std::time::Instant::now();
        let loader = Loader::new(self.storage.clone(), self.batch_size);
        let mut tables: Vec<(&TableId, _)> = outcome.rows.iter().collect();
        tables.sort_by_key(|(table, _)| table.as_str());
        for (table, rows) in tables {
            match loader.load_table(*table, rows, &stop).await {
                Ok(load_report) => {
                    report.cancelled |= load_report.cancelled;
                    report.load_reports.push(load_report);
                }
                Err(e) => {
                    error!(table = %table, "load aborted: {}", e);
                    report.state = RunState::Failed;
                    report.finished_at = Some(Utc::now());
                    return Err(e);
                }
            }
            if report.cancelled {
                info!(run_id = %report.run_id, "run cancelled between tables");
                break;
            }
        }
        histogram!("atlas_load_duration_seconds").record(t_load.elapsed().as_secs_f64());

        report.state = RunState::Done;
        report.finished_at = Some(Utc::now());
        histogram!("atlas_run_duration_seconds").record(t_run.elapsed().as_secs_f64());
        info!(
            run_id = %report.run_id,
            sources_ok = report.sources_succeeded,
            sources_failed = report.source_failures.len(),
            partial_load_errors = report.partial_load_errors(),
            "run complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfig;
    use crate::error::AtlasError;
    use crate::storage::InMemoryStorage;
    use crate::types::{RawRecord, Row};
    use std::collections::BTreeMap;

    struct StaticSource {
        name: &'static str,
        table: TableId,
        rows: Vec<Vec<(&'static str, &'static str)>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl DataSource for StaticSource {
        fn source_name(&self) -> &'static str {
            self.name
        }
        fn table(&self) -> TableId {
            self.table
        }
        async fn fetch(&self, _ctx: &FetchContext) -> Result<Vec<RawRecord>> {
            if self.fail {
                return Err(AtlasError::SourceUnavailable {
                    source_name: self.name.to_string(),
                    attempts: 3,
                    message: "connection reset".to_string(),
                });
            }
            Ok(self
                .rows
                .iter()
                .enumerate()
                .map(|(i, fields)| RawRecord {
                    source_name: self.name.to_string(),
                    table: self.table,
                    fetch_seq: i as u64,
                    fields: fields
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<BTreeMap<_, _>>(),
                })
                .collect())
        }
    }

    fn team_source(name: &'static str, team: &'static str, fail: bool) -> Box<dyn DataSource> {
        Box::new(StaticSource {
            name,
            table: TableId::Teams,
            rows: vec![vec![
                ("team_name", team),
                ("revenue", "$1,000"),
                ("tournaments_played", "3"),
            ]],
            fail,
        })
    }

    fn ctx() -> FetchContext {
        FetchContext::new(&FetchConfig::default()).unwrap()
    }

    fn no_stop() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn partial_source_failure_still_reaches_done() {
        let storage = Arc::new(InMemoryStorage::new());
        let pipeline = IngestionPipeline::new(storage.clone(), 50);
        let sources = vec![
            team_source("a", "Alpha", false),
            team_source("b", "Beta", true),
            team_source("c", "Gamma", false),
            team_source("d", "Delta", true),
            team_source("e", "Epsilon", false),
        ];
        let report = pipeline.run(sources, ctx(), no_stop()).await.unwrap();
        assert_eq!(report.state, RunState::Done);
        assert_eq!(report.sources_succeeded, 3);
        assert_eq!(report.source_failures.len(), 2);
        assert_eq!(storage.row_count(TableId::Teams).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn all_sources_failing_is_a_failed_run() {
        let storage = Arc::new(InMemoryStorage::new());
        let pipeline = IngestionPipeline::new(storage, 50);
        let sources = vec![team_source("a", "Alpha", true), team_source("b", "Beta", true)];
        let report = pipeline.run(sources, ctx(), no_stop()).await.unwrap();
        assert_eq!(report.state, RunState::Failed);
        assert_eq!(report.source_failures.len(), 2);
    }

    #[tokio::test]
    async fn later_processed_source_wins_cross_source_collisions() {
        let storage = Arc::new(InMemoryStorage::new());
        let pipeline = IngestionPipeline::new(storage.clone(), 50);

        // "a" sorts before "z", so "z" is processed later. "a" carries the
        // colliding key at a higher page position than "z" does; the
        // run-global ordering must still let "z" win.
        let a = Box::new(StaticSource {
            name: "a",
            table: TableId::Teams,
            rows: vec![
                vec![("team_name", "Alpha"), ("revenue", "$10"), ("tournaments_played", "1")],
                vec![("team_name", "Liquid"), ("revenue", "$100"), ("tournaments_played", "5")],
            ],
            fail: false,
        });
        let z = Box::new(StaticSource {
            name: "z",
            table: TableId::Teams,
            rows: vec![vec![
                ("team_name", "Liquid"),
                ("revenue", "$999"),
                ("tournaments_played", "9"),
            ]],
            fail: false,
        });

        let report = pipeline.run(vec![a, z], ctx(), no_stop()).await.unwrap();
        assert_eq!(report.deduplicated, 1);

        let rows = storage.fetch_all(TableId::Teams).await.unwrap();
        let liquid = rows
            .iter()
            .find_map(|row| match row {
                Row::Team(t) if t.team_name == "Liquid" => Some(t.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(liquid.revenue, 999);
    }

    #[tokio::test]
    async fn rerunning_identical_data_is_idempotent() {
        let storage = Arc::new(InMemoryStorage::new());
        let pipeline = IngestionPipeline::new(storage.clone(), 50);

        let report = pipeline
            .run(vec![team_source("a", "Alpha", false)], ctx(), no_stop())
            .await
            .unwrap();
        assert_eq!(report.state, RunState::Done);
        let first = storage.fetch_all(TableId::Teams).await.unwrap();

        pipeline
            .run(vec![team_source("a", "Alpha", false)], ctx(), no_stop())
            .await
            .unwrap();
        let second = storage.fetch_all(TableId::Teams).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(second.len(), 1);
    }
}
