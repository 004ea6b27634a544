use anyhow::Result;
use esports_atlas::aggregate::{AggSpec, AggregationEngine};
use esports_atlas::cache::CachedQueries;
use esports_atlas::config::{Config, FetchConfig};
use esports_atlas::normalize::ReasonCode;
use esports_atlas::pipeline::{IngestionPipeline, RunState};
use esports_atlas::predict::{Predictor, UserProfile};
use esports_atlas::sources::{build_sources, select_sources, FetchContext};
use esports_atlas::storage::{InMemoryStorage, Storage};
use esports_atlas::types::TableId;
use serde_json::Value;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::watch;

const STEAM_CSV: &str = "\
name,releaseDate,copiesSold,revenue,avgPlaytime,reviewScore
Counter-Strike 2,2023-09-27,\"45,000,000\",1200000000,120.5,81
Stardew Valley,2016-02-26,\"20,000,000\",300000000,51.2,97
";

const TRENDS_CSV: &str = "\
Game Title,Release Year,Genre,Revenue (Millions $),Players (Millions),Peak Concurrent Players,Metacritic Score
Stardew Valley,2016,Simulation,300,20,236614,89
Unknown Title,2020,Shooter,50,3,10000,70
";

fn write_dataset(dir: &std::path::Path, name: &str, contents: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path.to_str().unwrap().to_string()
}

fn csv_config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.files.steam_titles = Some(write_dataset(dir, "Steam.csv", STEAM_CSV));
    config.files.gaming_trends = Some(write_dataset(dir, "Gaming_trends.csv", TRENDS_CSV));
    config
}

fn file_sources(config: &Config) -> Vec<Box<dyn esports_atlas::sources::DataSource>> {
    select_sources(
        build_sources(config),
        &["steam_titles".to_string(), "gaming_trends".to_string()],
    )
}

#[tokio::test]
async fn csv_ingest_loads_and_rejects_orphan_trends() -> Result<()> {
    let temp_dir = tempdir()?;
    let config = csv_config(temp_dir.path());

    let storage = Arc::new(InMemoryStorage::new());
    let pipeline = IngestionPipeline::new(storage.clone(), config.loader.batch_size);
    let ctx = FetchContext::new(&FetchConfig::default())?;
    let (_tx, stop) = watch::channel(false);

    let report = pipeline.run(file_sources(&config), ctx, stop).await?;

    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.sources_succeeded, 2);
    assert_eq!(storage.row_count(TableId::SteamTitles).await?, 2);
    // "Unknown Title" has no parent in the catalog loaded this run
    assert_eq!(storage.row_count(TableId::GamingTrends).await?, 1);
    assert!(report
        .rejections
        .iter()
        .any(|r| r.reason == ReasonCode::UnresolvedReference));
    Ok(())
}

#[tokio::test]
async fn queries_after_ingest_are_served_and_cached() -> Result<()> {
    let temp_dir = tempdir()?;
    let config = csv_config(temp_dir.path());

    let storage = Arc::new(InMemoryStorage::new());
    let pipeline = IngestionPipeline::new(storage.clone(), config.loader.batch_size);
    let ctx = FetchContext::new(&FetchConfig::default())?;
    let (_tx, stop) = watch::channel(false);
    pipeline.run(file_sources(&config), ctx, stop).await?;

    let queries = CachedQueries::new(
        AggregationEngine::new(storage.clone()),
        Duration::from_secs(3600),
    );
    let spec = AggSpec::TopN {
        column: "revenue".into(),
        n: 1,
    };
    let first = queries.query(TableId::SteamTitles, &spec).await?;
    assert_eq!(first.rows.len(), 1);
    assert_eq!(first.rows[0][0], Value::from("Counter-Strike 2"));

    // Same data version, so the cached table comes back unchanged
    let second = queries.query(TableId::SteamTitles, &spec).await?;
    assert_eq!(*first, *second);
    Ok(())
}

#[tokio::test]
async fn rerun_with_identical_files_is_idempotent() -> Result<()> {
    let temp_dir = tempdir()?;
    let config = csv_config(temp_dir.path());
    let storage = Arc::new(InMemoryStorage::new());
    let pipeline = IngestionPipeline::new(storage.clone(), config.loader.batch_size);

    for _ in 0..2 {
        let ctx = FetchContext::new(&FetchConfig::default())?;
        let (_tx, stop) = watch::channel(false);
        let report = pipeline.run(file_sources(&config), ctx, stop).await?;
        assert_eq!(report.state, RunState::Done);
    }
    assert_eq!(storage.row_count(TableId::SteamTitles).await?, 2);
    assert_eq!(storage.row_count(TableId::GamingTrends).await?, 1);
    Ok(())
}

#[test]
fn predictor_loads_the_shipped_artifact_and_scores() -> Result<()> {
    let predictor = Predictor::from_path(std::path::Path::new("model/engagement_model.json"))?;
    let profile = UserProfile {
        age: 27.0,
        gender: "Female".into(),
        location: "Europe".into(),
        game_genre: "Strategy".into(),
        play_time_hours: 14.5,
        in_game_purchases: true,
        game_difficulty: "Medium".into(),
        sessions_per_week: 12.0,
        avg_session_duration_minutes: 110.0,
        player_level: 54.0,
        achievements_unlocked: 27.0,
    };
    let prediction = predictor.predict(&profile)?;
    assert!(["High", "Medium", "Low"].contains(&prediction.label.as_str()));
    assert!(prediction.confidence > 0.0 && prediction.confidence <= 1.0);
    assert!(prediction.flags.is_empty());
    Ok(())
}
