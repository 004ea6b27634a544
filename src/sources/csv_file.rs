use crate::error::{AtlasError, Result};
use crate::sources::{DataSource, FetchContext};
use crate::types::{RawRecord, TableId};
use std::collections::BTreeMap;
use tracing::{info, instrument};

/// A delimited tabular file with a fixed header row. The file's headers are
/// validated against the expected list; positions named `_…` in the canonical
/// list are dropped. Read once and fully materialized.
pub struct CsvFileSource {
    name: &'static str,
    table: TableId,
    path: String,
    /// Header row exactly as it appears in the file.
    expected_headers: &'static [&'static str],
    /// Canonical field name per column position.
    canonical: &'static [&'static str],
}

impl CsvFileSource {
    pub fn video_games(path: String) -> Self {
        Self {
            name: "video_games",
            table: TableId::VideoGames,
            path,
            expected_headers: &[
                "Rank",
                "Name",
                "Platform",
                "Year",
                "Genre",
                "Publisher",
                "NA_Sales",
                "EU_Sales",
                "JP_Sales",
                "Other_Sales",
                "Global_Sales",
            ],
            canonical: &[
                "_rank",
                "name",
                "platform",
                "year",
                "genre",
                "publisher",
                "na_sales",
                "eu_sales",
                "jp_sales",
                "other_sales",
                "global_sales",
            ],
        }
    }

    pub fn steam_titles(path: String) -> Self {
        Self {
            name: "steam_titles",
            table: TableId::SteamTitles,
            path,
            expected_headers: &[
                "name",
                "releaseDate",
                "copiesSold",
                "revenue",
                "avgPlaytime",
                "reviewScore",
            ],
            canonical: &[
                "name",
                "release_date",
                "copies_sold",
                "revenue",
                "avg_playtime",
                "review_score",
            ],
        }
    }

    pub fn gaming_trends(path: String) -> Self {
        Self {
            name: "gaming_trends",
            table: TableId::GamingTrends,
            path,
            expected_headers: &[
                "Game Title",
                "Release Year",
                "Genre",
                "Revenue (Millions $)",
                "Players (Millions)",
                "Peak Concurrent Players",
                "Metacritic Score",
            ],
            canonical: &[
                "game_title",
                "release_year",
                "genre",
                "revenue_millions",
                "players_millions",
                "peak_concurrent_players",
                "metacritic_score",
            ],
        }
    }

    fn read_records(&self) -> Result<Vec<RawRecord>> {
        let mut reader = csv::Reader::from_path(&self.path)?;

        let found: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let expected: Vec<String> = self.expected_headers.iter().map(|h| h.to_string()).collect();
        if found != expected {
            return Err(AtlasError::SchemaMismatch {
                source_name: self.name.to_string(),
                expected,
                found,
            });
        }

        let mut records = Vec::new();
        let mut fetch_seq: u64 = 0;
        for row in reader.records() {
            let row = row?;
            let mut fields = BTreeMap::new();
            for (value, canonical) in row.iter().zip(self.canonical.iter()) {
                if canonical.starts_with('_') {
                    continue;
                }
                fields.insert((*canonical).to_string(), value.trim().to_string());
            }
            records.push(RawRecord {
                source_name: self.name.to_string(),
                table: self.table,
                fetch_seq,
                fields,
            });
            fetch_seq += 1;
        }
        Ok(records)
    }
}

#[async_trait::async_trait]
impl DataSource for CsvFileSource {
    fn source_name(&self) -> &'static str {
        self.name
    }

    fn table(&self) -> TableId {
        self.table
    }

    #[instrument(skip(self, _ctx), fields(source = %self.name))]
    async fn fetch(&self, _ctx: &FetchContext) -> Result<Vec<RawRecord>> {
        let path = self.path.clone();
        let records = self.read_records()?;
        info!(source = self.name, file = %path, rows = records.len(), "file read complete");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file
    }

    #[test]
    fn reads_rows_under_canonical_names() {
        let file = write_file(
            "name,releaseDate,copiesSold,revenue,avgPlaytime,reviewScore\n\
             Stardew Valley,2016-02-26,\"20,000,000\",300000000,51.2,97\n",
        );
        let source = CsvFileSource::steam_titles(file.path().to_str().unwrap().to_string());
        let records = source.read_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].field("copies_sold"), Some("20,000,000"));
        assert_eq!(records[0].field("release_date"), Some("2016-02-26"));
    }

    #[test]
    fn unexpected_headers_abort_the_source() {
        let file = write_file("title,sold\nFoo,10\n");
        let source = CsvFileSource::steam_titles(file.path().to_str().unwrap().to_string());
        let err = source.read_records().unwrap_err();
        assert!(matches!(err, AtlasError::SchemaMismatch { .. }));
    }

    #[test]
    fn rank_column_is_dropped_from_video_games() {
        let file = write_file(
            "Rank,Name,Platform,Year,Genre,Publisher,NA_Sales,EU_Sales,JP_Sales,Other_Sales,Global_Sales\n\
             1,Wii Sports,Wii,2006,Sports,Nintendo,41.49,29.02,3.77,8.46,82.74\n",
        );
        let source = CsvFileSource::video_games(file.path().to_str().unwrap().to_string());
        let records = source.read_records().unwrap();
        assert!(records[0].field("_rank").is_none());
        assert_eq!(records[0].field("global_sales"), Some("82.74"));
    }
}
