use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use esports_atlas::aggregate::{AggSpec, AggregationEngine};
use esports_atlas::cache::CachedQueries;
use esports_atlas::config::Config;
use esports_atlas::error::Result;
use esports_atlas::pipeline::{IngestionPipeline, RunReport, RunState};
use esports_atlas::predict::{Predictor, UserProfile};
use esports_atlas::sources::{build_sources, select_sources, FetchContext};
use esports_atlas::storage::{InMemoryStorage, Storage};
use esports_atlas::types::TableId;
use esports_atlas::logging;

#[derive(Parser)]
#[command(name = "esports_atlas")]
#[command(about = "Esports and gaming industry analytics pipeline")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the config file
    #[arg(long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape and load all configured data sources
    Ingest {
        /// Specific sources to run (comma-separated). Available: countries,
        /// players, tournaments, teams, video_games, steam_titles, gaming_trends
        #[arg(long)]
        sources: Option<String>,
        /// Override the per-source listing page cap
        #[arg(long)]
        page_limit: Option<u32>,
    },
    /// Run an aggregation query against stored data
    Query {
        /// Target table (countries, players, tournaments, teams, video_games,
        /// steam_titles, gaming_trends)
        #[arg(long)]
        table: String,
        /// Aggregation shorthand: top:N:column, sum:group:value,
        /// mean:group:value, corr:col1,col2, yearly
        #[arg(long)]
        spec: String,
    },
    /// Score a gamer profile for engagement level
    Predict {
        /// Path to a TOML file describing the profile
        #[arg(long)]
        profile: String,
    },
    /// Report stored row counts, data versions and model availability
    Status,
}

async fn build_storage() -> Result<Arc<dyn Storage>> {
    #[cfg(feature = "db")]
    {
        if std::env::var("LIBSQL_URL").is_ok() {
            return Ok(Arc::new(esports_atlas::db::LibsqlStorage::connect().await?));
        }
    }
    Ok(Arc::new(InMemoryStorage::new()))
}

fn print_run_report(report: &RunReport) {
    println!("\n📊 Ingestion run {}:", report.run_id);
    println!("   State: {:?}", report.state);
    println!(
        "   Sources: {}/{} succeeded",
        report.sources_succeeded, report.sources_attempted
    );
    println!("   Fetched records: {}", report.fetched_records);
    println!("   Normalized rows: {}", report.normalized_rows);
    println!("   Deduplicated: {}", report.deduplicated);
    println!("   Rejected records: {}", report.rejections.len());
    for load in &report.load_reports {
        println!(
            "   Loaded {}: {} rows, {} failed batches",
            load.table,
            load.loaded_rows,
            load.failed_batches.len()
        );
    }
    if !report.source_failures.is_empty() {
        println!("\n⚠️  Source failures:");
        for failure in &report.source_failures {
            println!("   - {}: {}", failure.source_name, failure.error);
        }
    }
    if report.cancelled {
        println!("\n⚠️  Run was cancelled before completion");
    }
}

async fn run_ingest(
    config: &Config,
    source_names: Option<String>,
    page_limit: Option<u32>,
) -> Result<()> {
    println!("🔄 Running ingestion pipeline...");

    let names: Vec<String> = source_names
        .map(|list| list.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_default();
    let roster = select_sources(build_sources(config), &names);
    if roster.is_empty() {
        println!("⚠️  No sources matched {:?}", names);
        return Ok(());
    }

    let mut fetch = config.fetch.clone();
    if let Some(limit) = page_limit {
        fetch.page_limit = limit;
    }
    let ctx = FetchContext::new(&fetch)?;

    let storage = build_storage().await?;
    let pipeline = IngestionPipeline::new(storage, config.loader.batch_size);

    // Ctrl-C flips the stop flag; the loader finishes its current batch and
    // reports the run as cancelled.
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("stop requested, finishing current batch");
            let _ = stop_tx.send(true);
        }
    });

    let report = pipeline.run(roster, ctx, stop_rx).await?;
    print_run_report(&report);
    if report.state == RunState::Failed {
        error!("run failed: no source could be reached");
        std::process::exit(1);
    }
    Ok(())
}

async fn run_query(config: &Config, table: &str, spec: &str) -> Result<()> {
    let table = TableId::parse(table)
        .ok_or_else(|| esports_atlas::error::AtlasError::Config(format!("unknown table '{table}'")))?;
    let spec = AggSpec::parse(spec)?;
    let storage = build_storage().await?;
    let queries = CachedQueries::new(
        AggregationEngine::new(storage),
        std::time::Duration::from_secs(config.cache.ttl_seconds),
    );
    let result = queries.query(table, &spec).await?;
    println!("{}", result.columns.join("\t"));
    for row in &result.rows {
        let cells: Vec<String> = row
            .iter()
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        println!("{}", cells.join("\t"));
    }
    Ok(())
}

fn run_predict(config: &Config, profile_path: &str) -> Result<()> {
    let predictor = Predictor::from_path(Path::new(&config.predict.model_path))?;
    let contents = std::fs::read_to_string(profile_path)?;
    let profile: UserProfile = toml::from_str(&contents)?;
    let prediction = predictor.predict(&profile)?;
    println!(
        "🎮 Engagement: {} (confidence {:.1}%)",
        prediction.label,
        prediction.confidence * 100.0
    );
    for flag in &prediction.flags {
        println!("   ⚠️  {}", flag);
    }
    Ok(())
}

async fn run_status(config: &Config) -> Result<()> {
    let storage = build_storage().await?;
    match storage.healthcheck().await {
        Ok(()) => println!("✅ Storage reachable"),
        Err(e) => println!("❌ Storage unreachable: {}", e),
    }
    for table in TableId::ALL {
        let count = storage.row_count(table).await.unwrap_or(0);
        let version = storage.data_version(table).await.unwrap_or(0);
        let marker = if count == 0 { " [empty]" } else { "" };
        println!("   {}: {} rows (version {}){}", table, count, version, marker);
    }
    match Predictor::from_path(Path::new(&config.predict.model_path)) {
        Ok(_) => println!("✅ Engagement model loaded from {}", config.predict.model_path),
        Err(e) => println!("❌ Engagement model unavailable: {}", e),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();
    let config = Config::load_from(&cli.config)?;

    match cli.command {
        Commands::Ingest { sources, page_limit } => {
            run_ingest(&config, sources, page_limit).await?;
        }
        Commands::Query { table, spec } => {
            run_query(&config, &table, &spec).await?;
        }
        Commands::Predict { profile } => {
            run_predict(&config, &profile)?;
        }
        Commands::Status => {
            run_status(&config).await?;
        }
    }
    Ok(())
}
