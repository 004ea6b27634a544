use crate::config::FetchConfig;
use crate::error::{AtlasError, Result};
use crate::rate_limiter::RateLimiter;
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP client shared across scraped sources. Every request passes through the
/// rate limiter and carries the configured timeout; transient failures are
/// retried with exponential backoff before the source is declared unavailable.
pub struct HttpFetcher {
    client: reqwest::Client,
    limiter: RateLimiter,
    max_retries: u32,
    backoff: Duration,
}

impl HttpFetcher {
    /// Fails when the client cannot be built; a client without the configured
    /// timeout must never ship requests.
    pub fn new(fetch: &FetchConfig, limiter: RateLimiter) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(fetch.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            limiter,
            max_retries: fetch.max_retries,
            backoff: Duration::from_millis(fetch.backoff_ms),
        })
    }

    /// GET a page as text, retrying on network failure and non-success status.
    pub async fn get_text(&self, source_name: &str, url: &str) -> Result<String> {
        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let wait = self.backoff * 2u32.saturating_pow(attempt - 1);
                debug!(source = source_name, attempt, "retrying after {:?}", wait);
                tokio::time::sleep(wait).await;
            }
            let _permit = self.limiter.acquire().await;
            match self.client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    return Ok(resp.text().await?);
                }
                Ok(resp) => {
                    last_error = format!("status {} from {}", resp.status().as_u16(), url);
                    warn!(source = source_name, "{}", last_error);
                }
                Err(e) => {
                    last_error = format!("request to {url} failed: {e}");
                    warn!(source = source_name, "{}", last_error);
                }
            }
        }
        Err(AtlasError::SourceUnavailable {
            source_name: source_name.to_string(),
            attempts: self.max_retries + 1,
            message: last_error,
        })
    }
}

/// Extract the first `<table>` of a listing page into raw string cells, one
/// Vec per body row. Header rows (containing `<th>`) are skipped.
pub fn parse_listing_table(html: &str) -> Vec<Vec<String>> {
    let document = scraper::Html::parse_document(html);
    let table_sel = scraper::Selector::parse("table").expect("static selector");
    let row_sel = scraper::Selector::parse("tr").expect("static selector");
    let cell_sel = scraper::Selector::parse("td").expect("static selector");

    let Some(table) = document.select(&table_sel).next() else {
        return Vec::new();
    };

    let mut rows = Vec::new();
    for tr in table.select(&row_sel) {
        let cells: Vec<String> = tr
            .select(&cell_sel)
            .map(|td| td.text().collect::<String>().trim().to_string())
            .collect();
        if !cells.is_empty() {
            rows.push(cells);
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limiter::Limits;

    #[test]
    fn fetcher_builds_with_configured_timeout() {
        let fetcher = HttpFetcher::new(&FetchConfig::default(), RateLimiter::new(Limits::default()));
        assert!(fetcher.is_ok());
    }

    #[test]
    fn parses_body_rows_and_skips_header() {
        let html = r#"
            <html><body><table>
              <tr><th>Rank</th><th>Name</th><th>Earnings</th></tr>
              <tr><td>1.</td><td>USA</td><td>$500,000,000</td></tr>
              <tr><td>2.</td><td>China</td><td>$300,000,000</td></tr>
            </table></body></html>"#;
        let rows = parse_listing_table(html);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec!["1.", "USA", "$500,000,000"]);
    }

    #[test]
    fn missing_table_yields_no_rows() {
        assert!(parse_listing_table("<html><body><p>maintenance</p></body></html>").is_empty());
    }

    #[test]
    fn nested_markup_is_flattened_to_text() {
        let html = "<table><tr><td><a href=\"/p/1\">Team <b>Liquid</b></a></td></tr></table>";
        let rows = parse_listing_table(html);
        assert_eq!(rows[0][0], "Team Liquid");
    }
}
