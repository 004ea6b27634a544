use crate::error::{AtlasError, Result};
use crate::storage::Storage;
use crate::types::{Row, TableId};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Aggregation specs the dashboard can ask for. Specs are value types so they
/// can key the query cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum AggSpec {
    /// Top N rows by a numeric column, descending; ties broken by natural key
    /// ascending so repeated calls return identical tables.
    TopN { column: String, n: usize },
    GroupedSum { group_by: String, value: String },
    GroupedMean { group_by: String, value: String },
    /// Pearson correlation matrix across numeric columns.
    Correlation { columns: Vec<String> },
    /// Esports prize pools vs. industry revenue by year, joined on the years
    /// both sides cover.
    YearlyComparison,
}

impl AggSpec {
    /// Parse the CLI shorthand: `top:N:column`, `sum:group:value`,
    /// `mean:group:value`, `corr:col1,col2,...`, `yearly`.
    pub fn parse(spec: &str) -> Result<AggSpec> {
        let parts: Vec<&str> = spec.split(':').collect();
        let bad = || AtlasError::Config(format!("unrecognized aggregation spec '{spec}'"));
        match parts.as_slice() {
            ["top", n, column] => Ok(AggSpec::TopN {
                column: column.to_string(),
                n: n.parse().map_err(|_| bad())?,
            }),
            ["sum", group_by, value] => Ok(AggSpec::GroupedSum {
                group_by: group_by.to_string(),
                value: value.to_string(),
            }),
            ["mean", group_by, value] => Ok(AggSpec::GroupedMean {
                group_by: group_by.to_string(),
                value: value.to_string(),
            }),
            ["corr", columns] => Ok(AggSpec::Correlation {
                columns: columns.split(',').map(|c| c.trim().to_string()).collect(),
            }),
            ["yearly"] => Ok(AggSpec::YearlyComparison),
            _ => Err(bad()),
        }
    }
}

/// Derived tabular summary, ready for chart rendering: column names plus
/// ordered rows. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

static YEAR_IN_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(19[8-9]\d|20[0-2]\d)\b").expect("static regex"));

/// Executes aggregation specs against stored tables.
pub struct AggregationEngine {
    storage: Arc<dyn Storage>,
}

impl AggregationEngine {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Data version underpinning a spec, for cache keys. Cross-table specs
    /// combine the versions of every table they read.
    pub async fn data_version(&self, table: TableId, spec: &AggSpec) -> Result<u64> {
        match spec {
            AggSpec::YearlyComparison => {
                let tournaments = self.storage.data_version(TableId::Tournaments).await?;
                let trends = self.storage.data_version(TableId::GamingTrends).await?;
                Ok(tournaments.wrapping_mul(1_000_003).wrapping_add(trends))
            }
            _ => self.storage.data_version(table).await,
        }
    }

    pub async fn execute(&self, table: TableId, spec: &AggSpec) -> Result<AggregateResult> {
        match spec {
            AggSpec::TopN { column, n } => {
                let rows = self.storage.fetch_all(table).await?;
                Ok(top_n(table, &rows, column, *n)?)
            }
            AggSpec::GroupedSum { group_by, value } => {
                let rows = self.storage.fetch_all(table).await?;
                grouped(table, &rows, group_by, value, false)
            }
            AggSpec::GroupedMean { group_by, value } => {
                let rows = self.storage.fetch_all(table).await?;
                grouped(table, &rows, group_by, value, true)
            }
            AggSpec::Correlation { columns } => {
                let rows = self.storage.fetch_all(table).await?;
                correlation(table, &rows, columns)
            }
            AggSpec::YearlyComparison => {
                let tournaments = self.storage.fetch_all(TableId::Tournaments).await?;
                let trends = self.storage.fetch_all(TableId::GamingTrends).await?;
                Ok(yearly_comparison(&tournaments, &trends))
            }
        }
    }
}

fn require_column(table: TableId, column: &str) -> Result<()> {
    if table.columns().contains(&column) {
        Ok(())
    } else {
        Err(AtlasError::Config(format!(
            "table '{table}' has no column '{column}'"
        )))
    }
}

fn num_value(v: f64) -> Value {
    serde_json::Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

fn top_n(table: TableId, rows: &[Row], column: &str, n: usize) -> Result<AggregateResult> {
    require_column(table, column)?;
    let mut keyed: Vec<(f64, String, &Row)> = rows
        .iter()
        .map(|row| (row.numeric(column).unwrap_or(0.0), row.natural_key(), row))
        .collect();
    keyed.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
    });
    Ok(AggregateResult {
        columns: table.columns().iter().map(|c| c.to_string()).collect(),
        rows: keyed.into_iter().take(n).map(|(_, _, row)| row.values()).collect(),
    })
}

fn grouped(
    table: TableId,
    rows: &[Row],
    group_by: &str,
    value: &str,
    mean: bool,
) -> Result<AggregateResult> {
    require_column(table, group_by)?;
    require_column(table, value)?;
    let mut groups: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for row in rows {
        let Some(key) = row.text(group_by) else { continue };
        let Some(v) = row.numeric(value) else { continue };
        let entry = groups.entry(key).or_insert((0.0, 0));
        entry.0 += v;
        entry.1 += 1;
    }
    let value_column = if mean {
        format!("mean_{value}")
    } else {
        format!("sum_{value}")
    };
    Ok(AggregateResult {
        columns: vec![group_by.to_string(), value_column],
        rows: groups
            .into_iter()
            .map(|(key, (sum, count))| {
                let v = if mean { sum / count as f64 } else { sum };
                vec![Value::from(key), num_value(v)]
            })
            .collect(),
    })
}

fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len() as f64;
    if n < 2.0 {
        return 0.0;
    }
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x).powi(2);
        var_y += (y - mean_y).powi(2);
    }
    if var_x == 0.0 || var_y == 0.0 {
        return 0.0;
    }
    cov / (var_x.sqrt() * var_y.sqrt())
}

fn correlation(table: TableId, rows: &[Row], columns: &[String]) -> Result<AggregateResult> {
    for column in columns {
        require_column(table, column)?;
    }
    // Pairwise over rows where both columns are present
    let series: Vec<Vec<Option<f64>>> = columns
        .iter()
        .map(|c| rows.iter().map(|row| row.numeric(c)).collect())
        .collect();

    let mut out_columns = vec!["column".to_string()];
    out_columns.extend(columns.iter().cloned());

    let mut out_rows = Vec::new();
    for (i, column) in columns.iter().enumerate() {
        let mut cells = vec![Value::from(column.clone())];
        for j in 0..columns.len() {
            let (mut xs, mut ys) = (Vec::new(), Vec::new());
            for (x, y) in series[i].iter().zip(&series[j]) {
                if let (Some(x), Some(y)) = (x, y) {
                    xs.push(*x);
                    ys.push(*y);
                }
            }
            let r = if i == j { 1.0 } else { pearson(&xs, &ys) };
            cells.push(num_value(r));
        }
        out_rows.push(cells);
    }
    Ok(AggregateResult {
        columns: out_columns,
        rows: out_rows,
    })
}

/// Prize pools summed by the year embedded in the tournament name, joined
/// against trend revenue by release year on the years both sides cover.
fn yearly_comparison(tournaments: &[Row], trends: &[Row]) -> AggregateResult {
    let mut prize_by_year: BTreeMap<i64, f64> = BTreeMap::new();
    for row in tournaments {
        let Row::Tournament(t) = row else { continue };
        let Some(year) = YEAR_IN_NAME
            .captures(&t.tournament_name)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<i64>().ok())
        else {
            continue;
        };
        *prize_by_year.entry(year).or_insert(0.0) += t.prize_pool as f64;
    }

    let mut revenue_by_year: BTreeMap<i64, f64> = BTreeMap::new();
    for row in trends {
        let Row::Trend(t) = row else { continue };
        *revenue_by_year.entry(t.release_year).or_insert(0.0) += t.revenue_millions;
    }

    let rows = prize_by_year
        .iter()
        .filter_map(|(year, prize)| {
            revenue_by_year.get(year).map(|revenue| {
                vec![Value::from(*year), num_value(*prize), num_value(*revenue)]
            })
        })
        .collect();
    AggregateResult {
        columns: vec![
            "year".to_string(),
            "prize_pool".to_string(),
            "industry_revenue_millions".to_string(),
        ],
        rows,
    }
}
