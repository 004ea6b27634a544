use crate::error::{AtlasError, Result};
use crate::storage::Storage;
use crate::types::{
    Country, Player, Row, SteamTitle, TableId, Team, Tournament, TrendEntry, VideoGame,
};
use async_trait::async_trait;
use libsql::{Builder, Connection, Database};
use std::env;
use tracing::{debug, info};

/// Remote relational storage on Turso/libSQL, reachable via connection string.
pub struct LibsqlStorage {
    db: Database,
}

fn storage_err(message: String) -> AtlasError {
    AtlasError::StorageUnreachable(message)
}

fn write_err(table: TableId, message: String) -> AtlasError {
    AtlasError::StorageWriteFailure {
        table: table.as_str().to_string(),
        message,
    }
}

impl LibsqlStorage {
    /// Connect using the `LIBSQL_URL` / `LIBSQL_AUTH_TOKEN` environment
    /// variables. Connection failure here is startup-fatal.
    pub async fn connect() -> Result<Self> {
        let url = env::var("LIBSQL_URL")
            .map_err(|_| storage_err("LIBSQL_URL environment variable not set".into()))?;
        let auth_token = env::var("LIBSQL_AUTH_TOKEN")
            .map_err(|_| storage_err("LIBSQL_AUTH_TOKEN environment variable not set".into()))?;

        info!("Connecting to libSQL database at {}", url);
        let db = Builder::new_remote(url, auth_token)
            .build()
            .await
            .map_err(|e| storage_err(format!("Failed to connect to database: {e}")))?;

        Ok(Self { db })
    }

    async fn conn(&self) -> Result<Connection> {
        self.db
            .connect()
            .map_err(|e| storage_err(format!("Failed to get database connection: {e}")))
    }

    fn create_table_sql(table: TableId) -> String {
        let columns = match table {
            TableId::Countries => {
                "name TEXT PRIMARY KEY, total_earnings INTEGER, num_players INTEGER, \
                 top_game TEXT, game_earnings INTEGER, game_percent REAL"
            }
            TableId::Players => {
                "player_id TEXT PRIMARY KEY, player_name TEXT, total_earnings INTEGER, \
                 main_game TEXT, earnings_percent REAL"
            }
            TableId::Tournaments => {
                "tournament_name TEXT PRIMARY KEY, prize_pool INTEGER, game TEXT"
            }
            TableId::Teams => {
                "team_name TEXT PRIMARY KEY, revenue INTEGER, tournaments_played INTEGER"
            }
            TableId::VideoGames => {
                "name TEXT, platform TEXT, year INTEGER, genre TEXT, publisher TEXT, \
                 na_sales REAL, eu_sales REAL, jp_sales REAL, other_sales REAL, \
                 global_sales REAL, PRIMARY KEY (name, platform)"
            }
            TableId::SteamTitles => {
                "name TEXT PRIMARY KEY, release_year INTEGER, copies_sold INTEGER, \
                 revenue INTEGER, avg_playtime REAL, review_score REAL"
            }
            TableId::GamingTrends => {
                "game_title TEXT, release_year INTEGER, genre TEXT, revenue_millions REAL, \
                 players_millions REAL, peak_concurrent_players INTEGER, \
                 metacritic_score REAL, PRIMARY KEY (game_title, release_year)"
            }
        };
        format!("CREATE TABLE IF NOT EXISTS {} ({})", table.as_str(), columns)
    }

    fn upsert_sql(table: TableId) -> String {
        let columns = table.columns();
        let placeholders = vec!["?"; columns.len()].join(", ");
        format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            table.as_str(),
            columns.join(", "),
            placeholders
        )
    }

    fn params_for(row: &Row) -> Vec<libsql::Value> {
        row.values()
            .into_iter()
            .map(|v| match v {
                serde_json::Value::Null => libsql::Value::Null,
                serde_json::Value::String(s) => libsql::Value::Text(s),
                serde_json::Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        libsql::Value::Integer(i)
                    } else {
                        libsql::Value::Real(n.as_f64().unwrap_or(0.0))
                    }
                }
                other => libsql::Value::Text(other.to_string()),
            })
            .collect()
    }
}

fn col_text(row: &libsql::Row, idx: i32) -> Result<String> {
    row.get::<String>(idx)
        .map_err(|e| storage_err(format!("column {idx}: {e}")))
}

fn col_i64(row: &libsql::Row, idx: i32) -> Result<i64> {
    row.get::<i64>(idx)
        .map_err(|e| storage_err(format!("column {idx}: {e}")))
}

fn col_f64(row: &libsql::Row, idx: i32) -> Result<f64> {
    row.get::<f64>(idx)
        .map_err(|e| storage_err(format!("column {idx}: {e}")))
}

fn col_opt_i64(row: &libsql::Row, idx: i32) -> Option<i64> {
    row.get::<i64>(idx).ok()
}

fn col_opt_f64(row: &libsql::Row, idx: i32) -> Option<f64> {
    row.get::<f64>(idx).ok()
}

fn row_from_sql(table: TableId, r: &libsql::Row) -> Result<Row> {
    let row = match table {
        TableId::Countries => Row::Country(Country {
            name: col_text(r, 0)?,
            total_earnings: col_i64(r, 1)?,
            num_players: col_i64(r, 2)?,
            top_game: col_text(r, 3)?,
            game_earnings: col_i64(r, 4)?,
            game_percent: col_f64(r, 5)?,
        }),
        TableId::Players => Row::Player(Player {
            player_id: col_text(r, 0)?,
            player_name: col_text(r, 1)?,
            total_earnings: col_i64(r, 2)?,
            main_game: col_text(r, 3)?,
            earnings_percent: col_f64(r, 4)?,
        }),
        TableId::Tournaments => Row::Tournament(Tournament {
            tournament_name: col_text(r, 0)?,
            prize_pool: col_i64(r, 1)?,
            game: col_text(r, 2)?,
        }),
        TableId::Teams => Row::Team(Team {
            team_name: col_text(r, 0)?,
            revenue: col_i64(r, 1)?,
            tournaments_played: col_i64(r, 2)?,
        }),
        TableId::VideoGames => Row::VideoGame(VideoGame {
            name: col_text(r, 0)?,
            platform: col_text(r, 1)?,
            year: col_opt_i64(r, 2),
            genre: col_text(r, 3)?,
            publisher: col_text(r, 4)?,
            na_sales: col_f64(r, 5)?,
            eu_sales: col_f64(r, 6)?,
            jp_sales: col_f64(r, 7)?,
            other_sales: col_f64(r, 8)?,
            global_sales: col_f64(r, 9)?,
        }),
        TableId::SteamTitles => Row::SteamTitle(SteamTitle {
            name: col_text(r, 0)?,
            release_year: col_opt_i64(r, 1),
            copies_sold: col_i64(r, 2)?,
            revenue: col_i64(r, 3)?,
            avg_playtime: col_f64(r, 4)?,
            review_score: col_f64(r, 5)?,
        }),
        TableId::GamingTrends => Row::Trend(TrendEntry {
            game_title: col_text(r, 0)?,
            release_year: col_i64(r, 1)?,
            genre: col_text(r, 2)?,
            revenue_millions: col_f64(r, 3)?,
            players_millions: col_f64(r, 4)?,
            peak_concurrent_players: col_i64(r, 5)?,
            metacritic_score: col_opt_f64(r, 6),
        }),
    };
    Ok(row)
}

#[async_trait]
impl Storage for LibsqlStorage {
    async fn ensure_schema(&self, table: TableId) -> Result<()> {
        let conn = self.conn().await?;
        conn.execute(&Self::create_table_sql(table), ())
            .await
            .map_err(|e| write_err(table, format!("Failed to create table: {e}")))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS data_versions (table_name TEXT PRIMARY KEY, version INTEGER NOT NULL)",
            (),
        )
        .await
        .map_err(|e| write_err(table, format!("Failed to create version table: {e}")))?;
        debug!("Ensured schema for table {}", table);
        Ok(())
    }

    async fn upsert_batch(&self, table: TableId, rows: &[Row]) -> Result<()> {
        let conn = self.conn().await?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| write_err(table, format!("Failed to open transaction: {e}")))?;
        let sql = Self::upsert_sql(table);
        for row in rows {
            tx.execute(&sql, Self::params_for(row))
                .await
                .map_err(|e| write_err(table, format!("Failed to upsert row: {e}")))?;
        }
        tx.execute(
            "INSERT INTO data_versions (table_name, version) VALUES (?, 1) \
             ON CONFLICT(table_name) DO UPDATE SET version = version + 1",
            libsql::params![table.as_str()],
        )
        .await
        .map_err(|e| write_err(table, format!("Failed to bump data version: {e}")))?;
        tx.commit()
            .await
            .map_err(|e| write_err(table, format!("Failed to commit batch: {e}")))?;
        debug!("Upserted {} rows into {}", rows.len(), table);
        Ok(())
    }

    async fn fetch_all(&self, table: TableId) -> Result<Vec<Row>> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {}",
            table.columns().join(", "),
            table.as_str(),
            table.columns()[0]
        );
        let mut result = conn
            .query(&sql, ())
            .await
            .map_err(|e| storage_err(format!("Failed to query {}: {e}", table)))?;
        let mut rows = Vec::new();
        while let Some(r) = result
            .next()
            .await
            .map_err(|e| storage_err(format!("Failed to read row: {e}")))?
        {
            rows.push(row_from_sql(table, &r)?);
        }
        Ok(rows)
    }

    async fn row_count(&self, table: TableId) -> Result<usize> {
        let conn = self.conn().await?;
        let mut result = conn
            .query(&format!("SELECT COUNT(*) FROM {}", table.as_str()), ())
            .await
            .map_err(|e| storage_err(format!("Failed to count {}: {e}", table)))?;
        let row = result
            .next()
            .await
            .map_err(|e| storage_err(format!("Failed to read count: {e}")))?;
        match row {
            Some(r) => Ok(col_i64(&r, 0)? as usize),
            None => Ok(0),
        }
    }

    async fn data_version(&self, table: TableId) -> Result<u64> {
        let conn = self.conn().await?;
        let mut result = conn
            .query(
                "SELECT version FROM data_versions WHERE table_name = ?",
                libsql::params![table.as_str()],
            )
            .await
            .map_err(|e| storage_err(format!("Failed to read data version: {e}")))?;
        let row = result
            .next()
            .await
            .map_err(|e| storage_err(format!("Failed to read data version: {e}")))?;
        match row {
            Some(r) => Ok(col_i64(&r, 0)? as u64),
            None => Ok(0),
        }
    }

    async fn healthcheck(&self) -> Result<()> {
        let conn = self.conn().await?;
        conn.query("SELECT 1", ())
            .await
            .map_err(|e| storage_err(format!("healthcheck failed: {e}")))?;
        Ok(())
    }
}
