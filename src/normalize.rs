use crate::types::{
    Country, Player, RawRecord, Row, SteamTitle, TableId, Team, Tournament, TrendEntry, VideoGame,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// Why a raw record was rejected during normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReasonCode {
    MissingField,
    UnparseableNumber,
    NegativeValue,
    EmptyKey,
    UnresolvedReference,
}

#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub source_name: String,
    pub table: TableId,
    pub reason: ReasonCode,
    pub detail: String,
}

static NUMERIC_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("static regex"));
static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{4})\b").expect("static regex"));

/// Monetary amount: strips currency symbols and thousands separators; a
/// decimal part truncates ("$1,234.56" -> 1234). Blank cells default to zero
/// per the null policy for money fields.
pub fn parse_money(raw: &str) -> std::result::Result<i64, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "-" {
        return Ok(0);
    }
    let cleaned = trimmed.replace(['$', ',', ' '], "");
    let token = NUMERIC_TOKEN
        .find(&cleaned)
        .ok_or_else(|| format!("no digits in '{raw}'"))?;
    token
        .as_str()
        .parse::<f64>()
        .map(|f| f as i64)
        .map_err(|e| format!("cannot parse '{raw}' as money: {e}"))
}

/// Count with unit suffixes and separators stripped ("2,406 Tournaments" ->
/// 2406); a decimal part truncates.
pub fn parse_count(raw: &str) -> std::result::Result<i64, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "-" {
        return Ok(0);
    }
    let cleaned = trimmed.replace([',', ' '], "");
    let token = NUMERIC_TOKEN
        .find(&cleaned)
        .ok_or_else(|| format!("no digits in '{raw}'"))?;
    token
        .as_str()
        .parse::<f64>()
        .map(|f| f as i64)
        .map_err(|e| format!("cannot parse '{raw}' as count: {e}"))
}

/// Percentage with the `%` sign stripped. Blank cells default to zero.
pub fn parse_percent(raw: &str) -> std::result::Result<f64, String> {
    let trimmed = raw.trim().trim_end_matches('%').trim();
    if trimmed.is_empty() || trimmed == "-" {
        return Ok(0.0);
    }
    trimmed
        .replace(',', "")
        .parse::<f64>()
        .map_err(|e| format!("cannot parse '{raw}' as percent: {e}"))
}

/// Real number with thousands separators stripped. Blank cells default to zero.
pub fn parse_real(raw: &str) -> std::result::Result<f64, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "-" || trimmed.eq_ignore_ascii_case("n/a") {
        return Ok(0.0);
    }
    trimmed
        .replace([',', '$'], "")
        .parse::<f64>()
        .map_err(|e| format!("cannot parse '{raw}' as number: {e}"))
}

/// Optional year, taken from a bare year or from a date string. Blank or
/// unparseable cells are explicitly nulled rather than defaulted.
pub fn parse_opt_year(raw: &str) -> Option<i64> {
    YEAR.captures(raw.trim())
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
}

/// Optional real number: blank means explicitly null, not zero.
pub fn parse_opt_real(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "-" || trimmed.eq_ignore_ascii_case("n/a") {
        return None;
    }
    trimmed.replace(',', "").parse::<f64>().ok()
}

struct FieldReader<'a> {
    raw: &'a RawRecord,
}

impl<'a> FieldReader<'a> {
    fn text(&self, name: &str) -> std::result::Result<String, Rejection> {
        let value = self.raw.field(name).unwrap_or("").trim();
        if value.is_empty() {
            return Err(self.reject(ReasonCode::MissingField, format!("'{name}' is blank")));
        }
        Ok(value.to_string())
    }

    fn text_or(&self, name: &str, fallback: &str) -> String {
        let value = self.raw.field(name).unwrap_or("").trim();
        if value.is_empty() {
            fallback.to_string()
        } else {
            value.to_string()
        }
    }

    fn money(&self, name: &str) -> std::result::Result<i64, Rejection> {
        let value = parse_money(self.raw.field(name).unwrap_or(""))
            .map_err(|e| self.reject(ReasonCode::UnparseableNumber, e))?;
        if value < 0 {
            return Err(self.reject(
                ReasonCode::NegativeValue,
                format!("'{name}' is negative: {value}"),
            ));
        }
        Ok(value)
    }

    fn count(&self, name: &str) -> std::result::Result<i64, Rejection> {
        let value = parse_count(self.raw.field(name).unwrap_or(""))
            .map_err(|e| self.reject(ReasonCode::UnparseableNumber, e))?;
        if value < 0 {
            return Err(self.reject(
                ReasonCode::NegativeValue,
                format!("'{name}' is negative: {value}"),
            ));
        }
        Ok(value)
    }

    fn percent(&self, name: &str) -> std::result::Result<f64, Rejection> {
        parse_percent(self.raw.field(name).unwrap_or(""))
            .map_err(|e| self.reject(ReasonCode::UnparseableNumber, e))
    }

    fn real(&self, name: &str) -> std::result::Result<f64, Rejection> {
        let value = parse_real(self.raw.field(name).unwrap_or(""))
            .map_err(|e| self.reject(ReasonCode::UnparseableNumber, e))?;
        Ok(value)
    }

    fn non_negative_real(&self, name: &str) -> std::result::Result<f64, Rejection> {
        let value = self.real(name)?;
        if value < 0.0 {
            return Err(self.reject(
                ReasonCode::NegativeValue,
                format!("'{name}' is negative: {value}"),
            ));
        }
        Ok(value)
    }

    fn reject(&self, reason: ReasonCode, detail: String) -> Rejection {
        Rejection {
            source_name: self.raw.source_name.clone(),
            table: self.raw.table,
            reason,
            detail,
        }
    }
}

/// RawRecord -> typed row, or a rejection with a reason code.
pub fn normalize_record(raw: &RawRecord) -> std::result::Result<Row, Rejection> {
    let f = FieldReader { raw };
    let row = match raw.table {
        TableId::Countries => Row::Country(Country {
            name: f.text("name")?,
            total_earnings: f.money("total_earnings")?,
            num_players: f.count("num_players")?,
            top_game: f.text_or("top_game", "Unknown"),
            game_earnings: f.money("game_earnings")?,
            game_percent: f.percent("game_percent")?,
        }),
        TableId::Players => Row::Player(Player {
            player_id: f.text("player_id")?,
            player_name: f.text_or("player_name", "Unknown"),
            total_earnings: f.money("total_earnings")?,
            main_game: f.text_or("main_game", "Unknown"),
            earnings_percent: f.percent("earnings_percent")?,
        }),
        TableId::Tournaments => Row::Tournament(Tournament {
            tournament_name: f.text("tournament_name")?,
            prize_pool: f.money("prize_pool")?,
            game: f.text_or("game", "Unknown"),
        }),
        TableId::Teams => Row::Team(Team {
            team_name: f.text("team_name")?,
            revenue: f.money("revenue")?,
            tournaments_played: f.count("tournaments_played")?,
        }),
        TableId::VideoGames => Row::VideoGame(VideoGame {
            name: f.text("name")?,
            platform: f.text_or("platform", "Unknown"),
            year: parse_opt_year(raw.field("year").unwrap_or("")),
            genre: f.text_or("genre", "Unknown"),
            publisher: f.text_or("publisher", "Unknown"),
            na_sales: f.non_negative_real("na_sales")?,
            eu_sales: f.non_negative_real("eu_sales")?,
            jp_sales: f.non_negative_real("jp_sales")?,
            other_sales: f.non_negative_real("other_sales")?,
            global_sales: f.non_negative_real("global_sales")?,
        }),
        TableId::SteamTitles => Row::SteamTitle(SteamTitle {
            name: f.text("name")?,
            release_year: parse_opt_year(raw.field("release_date").unwrap_or("")),
            copies_sold: f.count("copies_sold")?,
            revenue: f.money("revenue")?,
            avg_playtime: f.non_negative_real("avg_playtime")?,
            review_score: f.real("review_score")?,
        }),
        TableId::GamingTrends => {
            let release_year = parse_opt_year(raw.field("release_year").unwrap_or(""))
                .ok_or_else(|| f.reject(ReasonCode::MissingField, "'release_year' is blank".into()))?;
            Row::Trend(TrendEntry {
                game_title: f.text("game_title")?,
                release_year,
                genre: f.text_or("genre", "Unknown"),
                revenue_millions: f.non_negative_real("revenue_millions")?,
                players_millions: f.non_negative_real("players_millions")?,
                peak_concurrent_players: f.count("peak_concurrent_players")?,
                metacritic_score: parse_opt_real(raw.field("metacritic_score").unwrap_or("")),
            })
        }
    };

    if row.natural_key().trim_matches('|').is_empty() {
        return Err(f.reject(ReasonCode::EmptyKey, "natural key is empty".into()));
    }
    Ok(row)
}

/// Everything the normalization stage produced for one run.
#[derive(Debug, Default)]
pub struct NormalizeOutcome {
    pub rows: HashMap<TableId, Vec<Row>>,
    pub rejections: Vec<Rejection>,
    pub deduplicated: usize,
}

/// Run-scoped normalizer. Deduplicates by natural key (most recently fetched
/// values win) and holds rows with unresolved parent references for one retry
/// after every source has been normalized.
#[derive(Default)]
pub struct Normalizer {
    by_key: HashMap<(TableId, String), (u64, Row)>,
    parked_trends: Vec<(u64, Row)>,
    rejections: Vec<Rejection>,
    deduplicated: usize,
    /// Whether any parent table (steam_titles / video_games) was seen this run.
    saw_parent_source: bool,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(&mut self, raw: &RawRecord) {
        if matches!(raw.table, TableId::SteamTitles | TableId::VideoGames) {
            self.saw_parent_source = true;
        }
        match normalize_record(raw) {
            Ok(row) => {
                if let Row::Trend(_) = &row {
                    // Parent may arrive from a source normalized later in the
                    // run; park and resolve in finish().
                    self.parked_trends.push((raw.fetch_seq, row));
                } else {
                    self.insert(raw.fetch_seq, row);
                }
            }
            Err(rejection) => {
                debug!(
                    source = %rejection.source_name,
                    reason = ?rejection.reason,
                    "rejected record: {}",
                    rejection.detail
                );
                self.rejections.push(rejection);
            }
        }
    }

    fn insert(&mut self, fetch_seq: u64, row: Row) {
        let key = (row.table(), row.natural_key());
        match self.by_key.get(&key) {
            Some((existing_seq, _)) if *existing_seq > fetch_seq => {
                self.deduplicated += 1;
            }
            Some(_) => {
                self.deduplicated += 1;
                self.by_key.insert(key, (fetch_seq, row));
            }
            None => {
                self.by_key.insert(key, (fetch_seq, row));
            }
        }
    }

    fn game_title_exists(&self, title: &str) -> bool {
        let lowered = title.to_lowercase();
        self.by_key.iter().any(|((table, _), (_, row))| {
            if !matches!(table, TableId::SteamTitles | TableId::VideoGames) {
                return false;
            }
            match row {
                Row::SteamTitle(s) => s.name.to_lowercase() == lowered,
                Row::VideoGame(g) => g.name.to_lowercase() == lowered,
                _ => false,
            }
        })
    }

    /// Resolve parked rows, then hand back the deduplicated rows per table.
    pub fn finish(mut self) -> NormalizeOutcome {
        let parked = std::mem::take(&mut self.parked_trends);
        for (fetch_seq, row) in parked {
            let Row::Trend(trend) = &row else { continue };
            // The parent check only binds when a parent source ran; a run that
            // ingests trends alone has nothing to resolve against.
            if self.saw_parent_source && !self.game_title_exists(&trend.game_title) {
                self.rejections.push(Rejection {
                    source_name: "gaming_trends".to_string(),
                    table: TableId::GamingTrends,
                    reason: ReasonCode::UnresolvedReference,
                    detail: format!("no game named '{}' in this run", trend.game_title),
                });
                continue;
            }
            self.insert(fetch_seq, row);
        }

        let mut rows: HashMap<TableId, Vec<Row>> = HashMap::new();
        let mut entries: Vec<((TableId, String), (u64, Row))> = self.by_key.into_iter().collect();
        // Deterministic order: by table then natural key
        entries.sort_by(|a, b| (a.0 .0.as_str(), &a.0 .1).cmp(&(b.0 .0.as_str(), &b.0 .1)));
        for ((table, _), (_, row)) in entries {
            rows.entry(table).or_default().push(row);
        }
        NormalizeOutcome {
            rows,
            rejections: self.rejections,
            deduplicated: self.deduplicated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn raw(table: TableId, source: &str, seq: u64, fields: &[(&str, &str)]) -> RawRecord {
        RawRecord {
            source_name: source.to_string(),
            table,
            fetch_seq: seq,
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn thousands_separators_and_currency_are_stripped() {
        assert_eq!(parse_money("$1,234,567").unwrap(), 1_234_567);
        assert_eq!(parse_money("1,234,567").unwrap(), 1_234_567);
        assert_eq!(parse_money("").unwrap(), 0);
        assert_eq!(parse_count("2,406 Tournaments").unwrap(), 2_406);
        assert_eq!(parse_percent("87.5%").unwrap(), 87.5);
    }

    #[test]
    fn decimal_cells_truncate_instead_of_inflating() {
        assert_eq!(parse_money("$1,234.56").unwrap(), 1_234);
        assert_eq!(parse_money("1234.99").unwrap(), 1_234);
        assert_eq!(parse_count("1,234.5").unwrap(), 1_234);
        assert_eq!(parse_count("12.9 Players").unwrap(), 12);
        assert_eq!(parse_money("-$5,000.75").unwrap(), -5_000);
    }

    #[test]
    fn year_is_extracted_from_dates() {
        assert_eq!(parse_opt_year("2016-02-26"), Some(2016));
        assert_eq!(parse_opt_year("2006"), Some(2006));
        assert_eq!(parse_opt_year("N/A"), None);
    }

    #[test]
    fn country_record_normalizes_to_typed_row() {
        let record = raw(
            TableId::Countries,
            "countries",
            0,
            &[
                ("name", "USA"),
                ("total_earnings", "$500,000,000"),
                ("num_players", "22,051 Players"),
                ("top_game", "Fortnite"),
                ("game_earnings", "$100,000,000"),
                ("game_percent", "20.0%"),
            ],
        );
        let row = normalize_record(&record).unwrap();
        let Row::Country(c) = row else { panic!("expected country") };
        assert_eq!(c.total_earnings, 500_000_000);
        assert_eq!(c.num_players, 22_051);
        assert_eq!(c.game_percent, 20.0);
    }

    #[test]
    fn negative_earnings_are_rejected() {
        let record = raw(
            TableId::Teams,
            "teams",
            0,
            &[
                ("team_name", "Broke Esports"),
                ("revenue", "-$5,000"),
                ("tournaments_played", "3"),
            ],
        );
        let rejection = normalize_record(&record).unwrap_err();
        assert_eq!(rejection.reason, ReasonCode::NegativeValue);
    }

    #[test]
    fn missing_natural_key_is_rejected() {
        let record = raw(
            TableId::Countries,
            "countries",
            0,
            &[("name", ""), ("total_earnings", "10")],
        );
        let rejection = normalize_record(&record).unwrap_err();
        assert_eq!(rejection.reason, ReasonCode::MissingField);
    }

    #[test]
    fn duplicate_keys_keep_most_recently_fetched_values() {
        let mut normalizer = Normalizer::new();
        normalizer.ingest(&raw(
            TableId::Teams,
            "teams",
            1,
            &[("team_name", "Team Liquid"), ("revenue", "$100"), ("tournaments_played", "1")],
        ));
        normalizer.ingest(&raw(
            TableId::Teams,
            "teams",
            2,
            &[("team_name", "Team Liquid"), ("revenue", "$200"), ("tournaments_played", "2")],
        ));
        let outcome = normalizer.finish();
        let rows = &outcome.rows[&TableId::Teams];
        assert_eq!(rows.len(), 1);
        let Row::Team(team) = &rows[0] else { panic!("expected team") };
        assert_eq!(team.revenue, 200);
        assert_eq!(outcome.deduplicated, 1);
    }

    #[test]
    fn trend_rows_resolve_against_parents_after_all_sources() {
        let mut normalizer = Normalizer::new();
        // Trend arrives before its parent title
        normalizer.ingest(&raw(
            TableId::GamingTrends,
            "gaming_trends",
            0,
            &[
                ("game_title", "Stardew Valley"),
                ("release_year", "2016"),
                ("genre", "Sim"),
                ("revenue_millions", "300"),
                ("players_millions", "20"),
                ("peak_concurrent_players", "90000"),
                ("metacritic_score", "97"),
            ],
        ));
        normalizer.ingest(&raw(
            TableId::GamingTrends,
            "gaming_trends",
            1,
            &[
                ("game_title", "Ghost Title"),
                ("release_year", "2020"),
                ("genre", "FPS"),
                ("revenue_millions", "1"),
                ("players_millions", "1"),
                ("peak_concurrent_players", "10"),
                ("metacritic_score", ""),
            ],
        ));
        normalizer.ingest(&raw(
            TableId::SteamTitles,
            "steam_titles",
            2,
            &[
                ("name", "Stardew Valley"),
                ("release_date", "2016-02-26"),
                ("copies_sold", "20,000,000"),
                ("revenue", "300000000"),
                ("avg_playtime", "51.2"),
                ("review_score", "97"),
            ],
        ));
        let outcome = normalizer.finish();
        assert_eq!(outcome.rows[&TableId::GamingTrends].len(), 1);
        assert_eq!(outcome.rejections.len(), 1);
        assert_eq!(outcome.rejections[0].reason, ReasonCode::UnresolvedReference);
    }

    #[test]
    fn trends_alone_skip_the_parent_check() {
        let mut normalizer = Normalizer::new();
        normalizer.ingest(&raw(
            TableId::GamingTrends,
            "gaming_trends",
            0,
            &[
                ("game_title", "Solo Trend"),
                ("release_year", "2021"),
                ("genre", "RPG"),
                ("revenue_millions", "5"),
                ("players_millions", "2"),
                ("peak_concurrent_players", "100"),
                ("metacritic_score", "80"),
            ],
        ));
        let outcome = normalizer.finish();
        assert_eq!(outcome.rows[&TableId::GamingTrends].len(), 1);
        assert!(outcome.rejections.is_empty());
    }
}
