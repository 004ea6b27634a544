use crate::config::{Config, FetchConfig};
use crate::error::Result;
use crate::rate_limiter::{Limits, RateLimiter};
use crate::types::{RawRecord, TableId};
use std::sync::Arc;

pub mod csv_file;
pub mod esports_earnings;
pub mod http;

pub use csv_file::CsvFileSource;
pub use esports_earnings::ScrapedSource;
pub use http::HttpFetcher;

/// Core trait all data sources implement: scraped listing pages and tabular
/// files alike produce a batch of RawRecords for one target table.
#[async_trait::async_trait]
pub trait DataSource: Send + Sync {
    /// Unique identifier for this source
    fn source_name(&self) -> &'static str;

    /// The table this source feeds
    fn table(&self) -> TableId;

    /// Fetch all raw records from this source
    async fn fetch(&self, ctx: &FetchContext) -> Result<Vec<RawRecord>>;
}

/// Shared plumbing handed to every source for a run: the retrying HTTP client
/// and the pagination cap.
#[derive(Clone)]
pub struct FetchContext {
    pub http: Arc<HttpFetcher>,
    pub page_limit: u32,
}

impl FetchContext {
    pub fn new(fetch: &FetchConfig) -> Result<Self> {
        let limiter = RateLimiter::new(Limits {
            requests_per_min: Some(fetch.requests_per_minute),
            concurrency: Some(fetch.max_concurrency),
        });
        Ok(Self {
            http: Arc::new(HttpFetcher::new(fetch, limiter)?),
            page_limit: fetch.page_limit,
        })
    }
}

/// Assemble the full source roster for a run. Scraped sources are always
/// present; file sources join when the config points at their dataset.
pub fn build_sources(config: &Config) -> Vec<Box<dyn DataSource>> {
    let mut sources: Vec<Box<dyn DataSource>> = vec![
        Box::new(ScrapedSource::countries()),
        Box::new(ScrapedSource::players()),
        Box::new(ScrapedSource::tournaments()),
        Box::new(ScrapedSource::teams()),
    ];
    if let Some(path) = &config.files.video_games {
        sources.push(Box::new(CsvFileSource::video_games(path.clone())));
    }
    if let Some(path) = &config.files.steam_titles {
        sources.push(Box::new(CsvFileSource::steam_titles(path.clone())));
    }
    if let Some(path) = &config.files.gaming_trends {
        sources.push(Box::new(CsvFileSource::gaming_trends(path.clone())));
    }
    sources
}

/// Filter the roster down to the names requested on the command line.
pub fn select_sources(
    mut sources: Vec<Box<dyn DataSource>>,
    names: &[String],
) -> Vec<Box<dyn DataSource>> {
    if names.is_empty() {
        return sources;
    }
    sources.retain(|s| names.iter().any(|n| n == s.source_name()));
    sources
}
