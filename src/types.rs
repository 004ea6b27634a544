use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Tables managed by the loader, one per domain entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableId {
    Countries,
    Players,
    Tournaments,
    Teams,
    VideoGames,
    SteamTitles,
    GamingTrends,
}

impl TableId {
    pub const ALL: [TableId; 7] = [
        TableId::Countries,
        TableId::Players,
        TableId::Tournaments,
        TableId::Teams,
        TableId::VideoGames,
        TableId::SteamTitles,
        TableId::GamingTrends,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TableId::Countries => "countries",
            TableId::Players => "players",
            TableId::Tournaments => "tournaments",
            TableId::Teams => "teams",
            TableId::VideoGames => "video_games",
            TableId::SteamTitles => "steam_titles",
            TableId::GamingTrends => "gaming_trends",
        }
    }

    pub fn parse(name: &str) -> Option<TableId> {
        match name {
            "countries" => Some(TableId::Countries),
            "players" => Some(TableId::Players),
            "tournaments" => Some(TableId::Tournaments),
            "teams" => Some(TableId::Teams),
            "video_games" => Some(TableId::VideoGames),
            "steam_titles" => Some(TableId::SteamTitles),
            "gaming_trends" => Some(TableId::GamingTrends),
            _ => None,
        }
    }

    /// Fixed column specification used for schema creation and aggregation.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            TableId::Countries => &[
                "name",
                "total_earnings",
                "num_players",
                "top_game",
                "game_earnings",
                "game_percent",
            ],
            TableId::Players => &[
                "player_id",
                "player_name",
                "total_earnings",
                "main_game",
                "earnings_percent",
            ],
            TableId::Tournaments => &["tournament_name", "prize_pool", "game"],
            TableId::Teams => &["team_name", "revenue", "tournaments_played"],
            TableId::VideoGames => &[
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
            TableId::SteamTitles => &[
                "name",
                "release_year",
                "copies_sold",
                "revenue",
                "avg_playtime",
                "review_score",
            ],
            TableId::GamingTrends => &[
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
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Untyped record as scraped or read from a tabular file. Cell values are kept
/// as raw strings until normalization; the map preserves header order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub source_name: String,
    pub table: TableId,
    /// Processing position within the run; later positions win on key
    /// collisions. Sources assign page order; the pipeline reassigns these
    /// run-globally before normalization.
    pub fetch_seq: u64,
    pub fields: BTreeMap<String, String>,
}

impl RawRecord {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|s| s.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Country {
    pub name: String,
    pub total_earnings: i64,
    pub num_players: i64,
    pub top_game: String,
    pub game_earnings: i64,
    pub game_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub player_id: String,
    pub player_name: String,
    pub total_earnings: i64,
    pub main_game: String,
    pub earnings_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tournament {
    pub tournament_name: String,
    pub prize_pool: i64,
    pub game: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub team_name: String,
    pub revenue: i64,
    pub tournaments_played: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoGame {
    pub name: String,
    pub platform: String,
    pub year: Option<i64>,
    pub genre: String,
    pub publisher: String,
    pub na_sales: f64,
    pub eu_sales: f64,
    pub jp_sales: f64,
    pub other_sales: f64,
    pub global_sales: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SteamTitle {
    pub name: String,
    pub release_year: Option<i64>,
    pub copies_sold: i64,
    pub revenue: i64,
    pub avg_playtime: f64,
    pub review_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendEntry {
    pub game_title: String,
    pub release_year: i64,
    pub genre: String,
    pub revenue_millions: f64,
    pub players_millions: f64,
    pub peak_concurrent_players: i64,
    pub metacritic_score: Option<f64>,
}

/// A typed row for one of the domain entities. All declared fields are present
/// with the correct type or explicitly `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Row {
    Country(Country),
    Player(Player),
    Tournament(Tournament),
    Team(Team),
    VideoGame(VideoGame),
    SteamTitle(SteamTitle),
    Trend(TrendEntry),
}

impl Row {
    pub fn table(&self) -> TableId {
        match self {
            Row::Country(_) => TableId::Countries,
            Row::Player(_) => TableId::Players,
            Row::Tournament(_) => TableId::Tournaments,
            Row::Team(_) => TableId::Teams,
            Row::VideoGame(_) => TableId::VideoGames,
            Row::SteamTitle(_) => TableId::SteamTitles,
            Row::Trend(_) => TableId::GamingTrends,
        }
    }

    /// Domain-meaningful identifier used for deduplication and upserts.
    pub fn natural_key(&self) -> String {
        match self {
            Row::Country(c) => c.name.clone(),
            Row::Player(p) => p.player_id.clone(),
            Row::Tournament(t) => t.tournament_name.clone(),
            Row::Team(t) => t.team_name.clone(),
            Row::VideoGame(g) => format!("{}|{}", g.name, g.platform),
            Row::SteamTitle(s) => s.name.clone(),
            Row::Trend(t) => format!("{}|{}", t.game_title, t.release_year),
        }
    }

    /// Cell values in the table's declared column order.
    pub fn values(&self) -> Vec<Value> {
        fn num_i(v: i64) -> Value {
            Value::from(v)
        }
        fn num_f(v: f64) -> Value {
            serde_json::Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
        }
        fn opt_i(v: Option<i64>) -> Value {
            v.map(Value::from).unwrap_or(Value::Null)
        }
        fn opt_f(v: Option<f64>) -> Value {
            v.and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }
        match self {
            Row::Country(c) => vec![
                Value::from(c.name.clone()),
                num_i(c.total_earnings),
                num_i(c.num_players),
                Value::from(c.top_game.clone()),
                num_i(c.game_earnings),
                num_f(c.game_percent),
            ],
            Row::Player(p) => vec![
                Value::from(p.player_id.clone()),
                Value::from(p.player_name.clone()),
                num_i(p.total_earnings),
                Value::from(p.main_game.clone()),
                num_f(p.earnings_percent),
            ],
            Row::Tournament(t) => vec![
                Value::from(t.tournament_name.clone()),
                num_i(t.prize_pool),
                Value::from(t.game.clone()),
            ],
            Row::Team(t) => vec![
                Value::from(t.team_name.clone()),
                num_i(t.revenue),
                num_i(t.tournaments_played),
            ],
            Row::VideoGame(g) => vec![
                Value::from(g.name.clone()),
                Value::from(g.platform.clone()),
                opt_i(g.year),
                Value::from(g.genre.clone()),
                Value::from(g.publisher.clone()),
                num_f(g.na_sales),
                num_f(g.eu_sales),
                num_f(g.jp_sales),
                num_f(g.other_sales),
                num_f(g.global_sales),
            ],
            Row::SteamTitle(s) => vec![
                Value::from(s.name.clone()),
                opt_i(s.release_year),
                num_i(s.copies_sold),
                num_i(s.revenue),
                num_f(s.avg_playtime),
                num_f(s.review_score),
            ],
            Row::Trend(t) => vec![
                Value::from(t.game_title.clone()),
                num_i(t.release_year),
                Value::from(t.genre.clone()),
                num_f(t.revenue_millions),
                num_f(t.players_millions),
                num_i(t.peak_concurrent_players),
                opt_f(t.metacritic_score),
            ],
        }
    }

    /// Numeric view of a named column, for aggregation.
    pub fn numeric(&self, column: &str) -> Option<f64> {
        let columns = self.table().columns();
        let idx = columns.iter().position(|c| *c == column)?;
        self.values().get(idx).and_then(|v| v.as_f64())
    }

    /// String view of a named column, for grouping.
    pub fn text(&self, column: &str) -> Option<String> {
        let columns = self.table().columns();
        let idx = columns.iter().position(|c| *c == column)?;
        match self.values().get(idx)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_follow_declared_column_order() {
        let row = Row::Country(Country {
            name: "USA".into(),
            total_earnings: 500_000_000,
            num_players: 10_000,
            top_game: "Dota 2".into(),
            game_earnings: 100_000_000,
            game_percent: 20.0,
        });
        let columns = row.table().columns();
        assert_eq!(columns.len(), row.values().len());
        assert_eq!(row.numeric("total_earnings"), Some(500_000_000.0));
        assert_eq!(row.text("name").as_deref(), Some("USA"));
    }

    #[test]
    fn natural_keys_are_domain_identifiers() {
        let row = Row::Trend(TrendEntry {
            game_title: "Fortnite".into(),
            release_year: 2017,
            genre: "Battle Royale".into(),
            revenue_millions: 5_800.0,
            players_millions: 350.0,
            peak_concurrent_players: 12_300_000,
            metacritic_score: Some(81.0),
        });
        assert_eq!(row.natural_key(), "Fortnite|2017");
    }
}
