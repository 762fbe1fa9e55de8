//! # Finbrief Warehouse
//!
//! DuckDB-backed storage for the finbrief collection pipeline.
//!
//! ## Overview
//!
//! The warehouse persists the three record families the pipeline produces:
//!
//! | Table | Row type | Key |
//! |-------|----------|-----|
//! | `stock_quotes` | [`QuoteRow`] | `id` |
//! | `news_items` | [`NewsRow`] | `id` |
//! | `daily_summaries` | [`SummaryRow`] | `summary_date` (upsert) |
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC text, so lexical order
//! matches chronological order and retention deletes are plain comparisons.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use finbrief_warehouse::{Table, Warehouse, WarehouseConfig};
//!
//! fn main() -> Result<(), finbrief_warehouse::WarehouseError> {
//!     let warehouse = Warehouse::open(WarehouseConfig::default())?;
//!     println!("{} quotes stored", warehouse.count(Table::StockQuotes)?);
//!     Ok(())
//! }
//! ```
//!
//! All values are bound as statement parameters; nothing is interpolated.

pub mod duckdb;
pub mod migrations;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::{params, Row, ToSql};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;

pub use duckdb::{ConnectionPool, PooledConnection};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (creating the data directory).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Keyword list (de)serialization failed.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be decoded.
    #[error("invalid stored row in {table}: {message}")]
    InvalidRow { table: &'static str, message: String },
}

/// Configuration for the warehouse database.
#[derive(Debug, Clone, Serialize)]
pub struct WarehouseConfig {
    /// Root directory for finbrief data.
    pub finbrief_home: PathBuf,
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Maximum number of idle pooled connections.
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self::in_dir(resolve_finbrief_home())
    }
}

impl WarehouseConfig {
    /// Configuration rooted at `finbrief_home` with the default file name.
    pub fn in_dir(finbrief_home: impl Into<PathBuf>) -> Self {
        let finbrief_home = finbrief_home.into();
        let db_path = finbrief_home.join("warehouse.duckdb");
        Self {
            finbrief_home,
            db_path,
            max_pool_size: 4,
        }
    }
}

/// Tables with retention semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    StockQuotes,
    NewsItems,
    DailySummaries,
}

impl Table {
    pub const fn name(self) -> &'static str {
        match self {
            Self::StockQuotes => "stock_quotes",
            Self::NewsItems => "news_items",
            Self::DailySummaries => "daily_summaries",
        }
    }
}

/// Stored stock quote.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuoteRow {
    pub id: String,
    pub symbol: String,
    pub market: String,
    pub price: f64,
    pub change_percent: f64,
    pub volume: Option<i64>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub quoted_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
}

/// Stored news item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewsRow {
    pub id: String,
    pub title: String,
    pub content: String,
    pub summary: String,
    pub source: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub keywords: Vec<String>,
    pub sentiment: Option<f64>,
    pub ingested_at: DateTime<Utc>,
}

/// Stored daily summary; one per calendar date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub summary_date: NaiveDate,
    pub market_overview: String,
    pub key_news: String,
    pub investment_advice: String,
    pub risk_level: String,
    pub ingested_at: DateTime<Utc>,
}

/// The warehouse handle. Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct Warehouse {
    config: WarehouseConfig,
    pool: ConnectionPool,
}

impl Warehouse {
    /// Open a warehouse with default configuration.
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    /// Open (creating if needed) the warehouse described by `config` and apply
    /// pending migrations.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let pool = ConnectionPool::open(config.db_path.clone(), config.max_pool_size)?;
        let warehouse = Self { config, pool };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.pool.acquire()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    pub fn config(&self) -> &WarehouseConfig {
        &self.config
    }

    pub fn db_path(&self) -> &Path {
        self.pool.db_path()
    }

    pub fn insert_quote(&self, row: &QuoteRow) -> Result<(), WarehouseError> {
        let connection = self.pool.acquire()?;
        let quoted_at = format_timestamp(row.quoted_at);
        let ingested_at = format_timestamp(row.ingested_at);
        let params: [&dyn ToSql; 12] = [
            &row.id,
            &row.symbol,
            &row.market,
            &row.price,
            &row.change_percent,
            &row.volume,
            &row.open,
            &row.high,
            &row.low,
            &row.close,
            &quoted_at,
            &ingested_at,
        ];
        connection.execute(
            "INSERT INTO stock_quotes \
             (id, symbol, market, price, change_percent, volume, open, high, low, close, quoted_at, ingested_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params.as_slice(),
        )?;
        Ok(())
    }

    pub fn insert_news(&self, row: &NewsRow) -> Result<(), WarehouseError> {
        let connection = self.pool.acquire()?;
        let keywords = serde_json::to_string(&row.keywords)?;
        let published_at = format_timestamp(row.published_at);
        let ingested_at = format_timestamp(row.ingested_at);
        let params: [&dyn ToSql; 10] = [
            &row.id,
            &row.title,
            &row.content,
            &row.summary,
            &row.source,
            &row.url,
            &published_at,
            &keywords,
            &row.sentiment,
            &ingested_at,
        ];
        connection.execute(
            "INSERT INTO news_items \
             (id, title, content, summary, source, url, published_at, keywords, sentiment, ingested_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params.as_slice(),
        )?;
        Ok(())
    }

    /// Insert the summary for its date, replacing any summary already stored
    /// for that date.
    pub fn upsert_summary(&self, row: &SummaryRow) -> Result<(), WarehouseError> {
        let connection = self.pool.acquire()?;
        let summary_date = row.summary_date.format(DATE_FORMAT).to_string();
        let ingested_at = format_timestamp(row.ingested_at);
        let params: [&dyn ToSql; 6] = [
            &summary_date,
            &row.market_overview,
            &row.key_news,
            &row.investment_advice,
            &row.risk_level,
            &ingested_at,
        ];
        connection.execute(
            "INSERT OR REPLACE INTO daily_summaries \
             (summary_date, market_overview, key_news, investment_advice, risk_level, ingested_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
            params.as_slice(),
        )?;
        Ok(())
    }

    /// Summary with the most recent `summary_date`, if any.
    pub fn latest_summary(&self) -> Result<Option<SummaryRow>, WarehouseError> {
        Ok(self.list_summaries(1)?.into_iter().next())
    }

    pub fn summary_for(&self, date: NaiveDate) -> Result<Option<SummaryRow>, WarehouseError> {
        let connection = self.pool.acquire()?;
        let date = date.format(DATE_FORMAT).to_string();
        let mut statement = connection.prepare(
            "SELECT summary_date, market_overview, key_news, investment_advice, risk_level, ingested_at \
             FROM daily_summaries WHERE summary_date = ?",
        )?;
        let rows = statement.query_map(params![date], read_summary_columns)?;
        let mut output = Vec::new();
        for row in rows {
            output.push(decode_summary(row?)?);
        }
        Ok(output.into_iter().next())
    }

    /// Most recently ingested quotes, newest first.
    pub fn list_quotes(&self, limit: usize) -> Result<Vec<QuoteRow>, WarehouseError> {
        let connection = self.pool.acquire()?;
        let mut statement = connection.prepare(
            "SELECT id, symbol, market, price, change_percent, volume, open, high, low, close, quoted_at, ingested_at \
             FROM stock_quotes ORDER BY ingested_at DESC, id LIMIT ?",
        )?;
        let rows = statement.query_map(params![limit_param(limit)], |row| {
            Ok((
                QuoteRow {
                    id: row.get(0)?,
                    symbol: row.get(1)?,
                    market: row.get(2)?,
                    price: row.get(3)?,
                    change_percent: row.get(4)?,
                    volume: row.get(5)?,
                    open: row.get(6)?,
                    high: row.get(7)?,
                    low: row.get(8)?,
                    close: row.get(9)?,
                    quoted_at: DateTime::<Utc>::UNIX_EPOCH,
                    ingested_at: DateTime::<Utc>::UNIX_EPOCH,
                },
                row.get::<_, String>(10)?,
                row.get::<_, String>(11)?,
            ))
        })?;

        let mut output = Vec::new();
        for row in rows {
            let (mut quote, quoted_at, ingested_at) = row?;
            quote.quoted_at = parse_timestamp(Table::StockQuotes, &quoted_at)?;
            quote.ingested_at = parse_timestamp(Table::StockQuotes, &ingested_at)?;
            output.push(quote);
        }
        Ok(output)
    }

    /// Most recently ingested news items, newest first.
    pub fn list_news(&self, limit: usize) -> Result<Vec<NewsRow>, WarehouseError> {
        let connection = self.pool.acquire()?;
        let mut statement = connection.prepare(
            "SELECT id, title, content, summary, source, url, published_at, keywords, sentiment, ingested_at \
             FROM news_items ORDER BY ingested_at DESC, id LIMIT ?",
        )?;
        let rows = statement.query_map(params![limit_param(limit)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, Option<f64>>(8)?,
                row.get::<_, String>(9)?,
            ))
        })?;

        let mut output = Vec::new();
        for row in rows {
            let (id, title, content, summary, source, url, published_at, keywords, sentiment, ingested_at) =
                row?;
            output.push(NewsRow {
                id,
                title,
                content,
                summary,
                source,
                url,
                published_at: parse_timestamp(Table::NewsItems, &published_at)?,
                keywords: serde_json::from_str(&keywords)?,
                sentiment,
                ingested_at: parse_timestamp(Table::NewsItems, &ingested_at)?,
            });
        }
        Ok(output)
    }

    /// Summaries ordered by date, newest first.
    pub fn list_summaries(&self, limit: usize) -> Result<Vec<SummaryRow>, WarehouseError> {
        let connection = self.pool.acquire()?;
        let mut statement = connection.prepare(
            "SELECT summary_date, market_overview, key_news, investment_advice, risk_level, ingested_at \
             FROM daily_summaries ORDER BY summary_date DESC LIMIT ?",
        )?;
        let rows = statement.query_map(params![limit_param(limit)], read_summary_columns)?;
        let mut output = Vec::new();
        for row in rows {
            output.push(decode_summary(row?)?);
        }
        Ok(output)
    }

    /// Delete rows of `table` ingested strictly before `cutoff`; returns the
    /// number of rows removed.
    pub fn delete_older_than(
        &self,
        table: Table,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, WarehouseError> {
        let connection = self.pool.acquire()?;
        let cutoff = format_timestamp(cutoff);
        // Table name comes from the closed `Table` enum, never from input.
        let sql = format!("DELETE FROM {} WHERE ingested_at < ?", table.name());
        let removed = connection.execute(sql.as_str(), params![cutoff])?;
        Ok(removed as u64)
    }

    pub fn count(&self, table: Table) -> Result<u64, WarehouseError> {
        let connection = self.pool.acquire()?;
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        let count: i64 = connection.query_row(sql.as_str(), [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

type SummaryColumns = (String, String, String, String, String, String);

fn read_summary_columns(row: &Row<'_>) -> Result<SummaryColumns, ::duckdb::Error> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn decode_summary(columns: SummaryColumns) -> Result<SummaryRow, WarehouseError> {
    let (summary_date, market_overview, key_news, investment_advice, risk_level, ingested_at) =
        columns;
    let summary_date = NaiveDate::parse_from_str(&summary_date, DATE_FORMAT).map_err(|error| {
        WarehouseError::InvalidRow {
            table: Table::DailySummaries.name(),
            message: format!("summary_date '{summary_date}': {error}"),
        }
    })?;

    Ok(SummaryRow {
        summary_date,
        market_overview,
        key_news,
        investment_advice,
        risk_level,
        ingested_at: parse_timestamp(Table::DailySummaries, &ingested_at)?,
    })
}

/// Fixed-width RFC 3339 (microseconds, `Z` suffix).
fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(table: Table, value: &str) -> Result<DateTime<Utc>, WarehouseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| WarehouseError::InvalidRow {
            table: table.name(),
            message: format!("timestamp '{value}': {error}"),
        })
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Resolve the finbrief home directory from environment or default.
fn resolve_finbrief_home() -> PathBuf {
    if let Some(path) = env::var_os("FINBRIEF_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".finbrief");
    }

    PathBuf::from(".finbrief")
}
