use crate::error::Result;
use crate::sources::http::parse_listing_table;
use crate::sources::{DataSource, FetchContext};
use crate::types::{RawRecord, TableId};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

const BASE_URL: &str = "https://www.esportsearnings.com";

/// How a scraped source walks its listing pages.
#[derive(Debug, Clone, Copy)]
enum Paging {
    /// One listing page only.
    Single,
    /// Offset suffix pages: `{path}` then `{path}{suffix}{offset}` in steps of
    /// 100 up to `max_offset`.
    Offset { suffix: &'static str, max_offset: u32 },
}

/// A paginated listing source on the esports earnings site. Cell positions map
/// onto canonical field names; positions named `_…` are dropped (rank columns
/// and other presentation-only cells).
pub struct ScrapedSource {
    name: &'static str,
    table: TableId,
    path: &'static str,
    paging: Paging,
    headers: &'static [&'static str],
}

impl ScrapedSource {
    pub fn countries() -> Self {
        Self {
            name: "countries",
            table: TableId::Countries,
            path: "/countries",
            paging: Paging::Single,
            headers: &[
                "_rank",
                "name",
                "total_earnings",
                "num_players",
                "top_game",
                "game_earnings",
                "game_percent",
            ],
        }
    }

    pub fn players() -> Self {
        Self {
            name: "players",
            table: TableId::Players,
            path: "/players/highest-earnings",
            paging: Paging::Offset { suffix: "-top-", max_offset: 1000 },
            headers: &[
                "_rank",
                "player_id",
                "player_name",
                "total_earnings",
                "main_game",
                "_game_earnings",
                "earnings_percent",
            ],
        }
    }

    pub fn tournaments() -> Self {
        Self {
            name: "tournaments",
            table: TableId::Tournaments,
            path: "/tournaments/largest-overall-prize-pools",
            paging: Paging::Offset { suffix: "-x", max_offset: 400 },
            // Only the first four listing columns are meaningful.
            headers: &["_rank", "tournament_name", "prize_pool", "game"],
        }
    }

    pub fn teams() -> Self {
        Self {
            name: "teams",
            table: TableId::Teams,
            path: "/teams/highest-overall",
            paging: Paging::Offset { suffix: "-x", max_offset: 400 },
            headers: &["_rank", "team_name", "revenue", "tournaments_played"],
        }
    }

    fn page_url(&self, page: u32) -> Option<String> {
        match self.paging {
            Paging::Single => (page == 0).then(|| format!("{BASE_URL}{}", self.path)),
            Paging::Offset { suffix, max_offset } => {
                let offset = page * 100;
                if offset > max_offset {
                    return None;
                }
                if offset == 0 {
                    Some(format!("{BASE_URL}{}", self.path))
                } else {
                    Some(format!("{BASE_URL}{}{}{}", self.path, suffix, offset))
                }
            }
        }
    }

    fn records_from_page(&self, html: &str, fetch_seq: &mut u64) -> Vec<RawRecord> {
        let mut records = Vec::new();
        for cells in parse_listing_table(html) {
            let mut fields = BTreeMap::new();
            for (value, header) in cells.iter().zip(self.headers.iter()) {
                if header.starts_with('_') {
                    continue;
                }
                fields.insert((*header).to_string(), value.clone());
            }
            if fields.is_empty() {
                continue;
            }
            records.push(RawRecord {
                source_name: self.name.to_string(),
                table: self.table,
                fetch_seq: *fetch_seq,
                fields,
            });
            *fetch_seq += 1;
        }
        records
    }
}

#[async_trait::async_trait]
impl DataSource for ScrapedSource {
    fn source_name(&self) -> &'static str {
        self.name
    }

    fn table(&self) -> TableId {
        self.table
    }

    #[instrument(skip(self, ctx), fields(source = %self.name))]
    async fn fetch(&self, ctx: &FetchContext) -> Result<Vec<RawRecord>> {
        let mut all = Vec::new();
        let mut fetch_seq: u64 = 0;
        for page in 0..ctx.page_limit {
            let Some(url) = self.page_url(page) else { break };
            let html = ctx.http.get_text(self.name, &url).await?;
            let records = self.records_from_page(&html, &mut fetch_seq);
            if records.is_empty() {
                debug!(source = self.name, page, "empty listing page, stopping pagination");
                break;
            }
            debug!(source = self.name, page, rows = records.len(), "parsed listing page");
            all.extend(records);
        }
        info!(source = self.name, rows = all.len(), "fetch complete");
        Ok(all)
    }
}
