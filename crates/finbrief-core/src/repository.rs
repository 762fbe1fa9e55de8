//! Persistence contract for pipeline records.
//!
//! Fetchers produce records without identity; [`Repository`] assigns a
//! [`RecordId`] on write. Two implementations ship: [`MemoryRepository`] for
//! tests and dry runs, and [`WarehouseRepository`] over the DuckDB warehouse.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use finbrief_warehouse::{NewsRow, QuoteRow, SummaryRow, Table, Warehouse, WarehouseError};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::{DailySummary, Market, NewsItem, StockQuote, Symbol};

/// Durable identifier assigned on write.
pub type RecordId = Uuid;

pub type RepositoryFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, PersistenceError>> + Send + 'a>>;

/// Record families with retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Quotes,
    News,
    Summaries,
}

impl RecordKind {
    const fn table(self) -> Table {
        match self {
            Self::Quotes => Table::StockQuotes,
            Self::News => Table::NewsItems,
            Self::Summaries => Table::DailySummaries,
        }
    }
}

/// A persisted record with its id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stored<T> {
    pub id: RecordId,
    #[serde(flatten)]
    pub record: T,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error("stored record is corrupt: {0}")]
    Corrupt(String),

    #[error("storage task failed: {0}")]
    Task(String),
}

/// Storage contract shared process-wide; implementations must tolerate
/// concurrent callers.
pub trait Repository: Send + Sync {
    fn insert_quote<'a>(&'a self, quote: &'a StockQuote) -> RepositoryFuture<'a, RecordId>;

    fn insert_news<'a>(&'a self, item: &'a NewsItem) -> RepositoryFuture<'a, RecordId>;

    /// Create or replace the summary for `summary.summary_date`.
    fn upsert_summary<'a>(&'a self, summary: &'a DailySummary) -> RepositoryFuture<'a, ()>;

    fn latest_summary(&self) -> RepositoryFuture<'_, Option<DailySummary>>;

    fn summary_for(&self, date: NaiveDate) -> RepositoryFuture<'_, Option<DailySummary>>;

    /// Newest first by ingestion time.
    fn list_quotes(&self, limit: usize) -> RepositoryFuture<'_, Vec<Stored<StockQuote>>>;

    /// Newest first by ingestion time.
    fn list_news(&self, limit: usize) -> RepositoryFuture<'_, Vec<Stored<NewsItem>>>;

    /// Newest first by date.
    fn list_summaries(&self, limit: usize) -> RepositoryFuture<'_, Vec<DailySummary>>;

    /// Delete records of `kind` ingested strictly before `cutoff`.
    fn delete_older_than(
        &self,
        kind: RecordKind,
        cutoff: DateTime<Utc>,
    ) -> RepositoryFuture<'_, u64>;
}

#[derive(Default)]
struct MemoryState {
    quotes: Vec<Stored<StockQuote>>,
    news: Vec<Stored<NewsItem>>,
    summaries: BTreeMap<NaiveDate, DailySummary>,
}

/// In-process repository.
#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<MemoryState>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> T {
        let mut state = self
            .state
            .lock()
            .expect("memory repository mutex should not be poisoned");
        f(&mut state)
    }
}

fn newest_first<T: Clone>(
    records: &[Stored<T>],
    limit: usize,
    ingested_at: impl Fn(&T) -> DateTime<Utc>,
) -> Vec<Stored<T>> {
    // Later inserts win ties, matching insertion order reversed.
    let mut ordered: Vec<(usize, &Stored<T>)> = records.iter().enumerate().collect();
    ordered.sort_by(|(ia, a), (ib, b)| {
        ingested_at(&b.record)
            .cmp(&ingested_at(&a.record))
            .then(ib.cmp(ia))
    });
    ordered
        .into_iter()
        .take(limit)
        .map(|(_, stored)| stored.clone())
        .collect()
}

impl Repository for MemoryRepository {
    fn insert_quote<'a>(&'a self, quote: &'a StockQuote) -> RepositoryFuture<'a, RecordId> {
        let id = Uuid::new_v4();
        self.with_state(|state| {
            state.quotes.push(Stored {
                id,
                record: quote.clone(),
            })
        });
        Box::pin(async move { Ok(id) })
    }

    fn insert_news<'a>(&'a self, item: &'a NewsItem) -> RepositoryFuture<'a, RecordId> {
        let id = Uuid::new_v4();
        self.with_state(|state| {
            state.news.push(Stored {
                id,
                record: item.clone(),
            })
        });
        Box::pin(async move { Ok(id) })
    }

    fn upsert_summary<'a>(&'a self, summary: &'a DailySummary) -> RepositoryFuture<'a, ()> {
        self.with_state(|state| {
            state
                .summaries
                .insert(summary.summary_date, summary.clone())
        });
        Box::pin(async move { Ok(()) })
    }

    fn latest_summary(&self) -> RepositoryFuture<'_, Option<DailySummary>> {
        let latest =
            self.with_state(|state| state.summaries.values().next_back().cloned());
        Box::pin(async move { Ok(latest) })
    }

    fn summary_for(&self, date: NaiveDate) -> RepositoryFuture<'_, Option<DailySummary>> {
        let summary = self.with_state(|state| state.summaries.get(&date).cloned());
        Box::pin(async move { Ok(summary) })
    }

    fn list_quotes(&self, limit: usize) -> RepositoryFuture<'_, Vec<Stored<StockQuote>>> {
        let quotes =
            self.with_state(|state| newest_first(&state.quotes, limit, |quote| quote.ingested_at));
        Box::pin(async move { Ok(quotes) })
    }

    fn list_news(&self, limit: usize) -> RepositoryFuture<'_, Vec<Stored<NewsItem>>> {
        let news = self.with_state(|state| newest_first(&state.news, limit, |item| item.ingested_at));
        Box::pin(async move { Ok(news) })
    }

    fn list_summaries(&self, limit: usize) -> RepositoryFuture<'_, Vec<DailySummary>> {
        let summaries = self.with_state(|state| {
            state
                .summaries
                .values()
                .rev()
                .take(limit)
                .cloned()
                .collect::<Vec<_>>()
        });
        Box::pin(async move { Ok(summaries) })
    }

    fn delete_older_than(
        &self,
        kind: RecordKind,
        cutoff: DateTime<Utc>,
    ) -> RepositoryFuture<'_, u64> {
        let removed = self.with_state(|state| {
            let before;
            let after;
            match kind {
                RecordKind::Quotes => {
                    before = state.quotes.len();
                    state.quotes.retain(|stored| stored.record.ingested_at >= cutoff);
                    after = state.quotes.len();
                }
                RecordKind::News => {
                    before = state.news.len();
                    state.news.retain(|stored| stored.record.ingested_at >= cutoff);
                    after = state.news.len();
                }
                RecordKind::Summaries => {
                    before = state.summaries.len();
                    state.summaries.retain(|_, summary| summary.ingested_at >= cutoff);
                    after = state.summaries.len();
                }
            }
            (before - after) as u64
        });
        Box::pin(async move { Ok(removed) })
    }
}

/// Repository backed by the DuckDB warehouse. Blocking work runs on the
/// tokio blocking pool.
#[derive(Clone)]
pub struct WarehouseRepository {
    warehouse: Warehouse,
}

impl WarehouseRepository {
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&Warehouse) -> Result<T, PersistenceError> + Send + 'static,
    {
        let warehouse = self.warehouse.clone();
        tokio::task::spawn_blocking(move || work(&warehouse))
            .await
            .map_err(|error| PersistenceError::Task(error.to_string()))?
    }
}

impl Repository for WarehouseRepository {
    fn insert_quote<'a>(&'a self, quote: &'a StockQuote) -> RepositoryFuture<'a, RecordId> {
        let id = Uuid::new_v4();
        let row = quote_to_row(id, quote);
        Box::pin(async move {
            self.blocking(move |warehouse| Ok(warehouse.insert_quote(&row)?))
                .await?;
            Ok(id)
        })
    }

    fn insert_news<'a>(&'a self, item: &'a NewsItem) -> RepositoryFuture<'a, RecordId> {
        let id = Uuid::new_v4();
        let row = news_to_row(id, item);
        Box::pin(async move {
            self.blocking(move |warehouse| Ok(warehouse.insert_news(&row)?))
                .await?;
            Ok(id)
        })
    }

    fn upsert_summary<'a>(&'a self, summary: &'a DailySummary) -> RepositoryFuture<'a, ()> {
        let row = summary_to_row(summary);
        Box::pin(async move {
            self.blocking(move |warehouse| Ok(warehouse.upsert_summary(&row)?))
                .await
        })
    }

    fn latest_summary(&self) -> RepositoryFuture<'_, Option<DailySummary>> {
        Box::pin(async move {
            self.blocking(|warehouse| {
                warehouse
                    .latest_summary()?
                    .map(summary_from_row)
                    .transpose()
            })
            .await
        })
    }

    fn summary_for(&self, date: NaiveDate) -> RepositoryFuture<'_, Option<DailySummary>> {
        Box::pin(async move {
            self.blocking(move |warehouse| {
                warehouse
                    .summary_for(date)?
                    .map(summary_from_row)
                    .transpose()
            })
            .await
        })
    }

    fn list_quotes(&self, limit: usize) -> RepositoryFuture<'_, Vec<Stored<StockQuote>>> {
        Box::pin(async move {
            self.blocking(move |warehouse| {
                warehouse
                    .list_quotes(limit)?
                    .into_iter()
                    .map(quote_from_row)
                    .collect()
            })
            .await
        })
    }

    fn list_news(&self, limit: usize) -> RepositoryFuture<'_, Vec<Stored<NewsItem>>> {
        Box::pin(async move {
            self.blocking(move |warehouse| {
                warehouse
                    .list_news(limit)?
                    .into_iter()
                    .map(news_from_row)
                    .collect()
            })
            .await
        })
    }

    fn list_summaries(&self, limit: usize) -> RepositoryFuture<'_, Vec<DailySummary>> {
        Box::pin(async move {
            self.blocking(move |warehouse| {
                warehouse
                    .list_summaries(limit)?
                    .into_iter()
                    .map(summary_from_row)
                    .collect()
            })
            .await
        })
    }

    fn delete_older_than(
        &self,
        kind: RecordKind,
        cutoff: DateTime<Utc>,
    ) -> RepositoryFuture<'_, u64> {
        Box::pin(async move {
            self.blocking(move |warehouse| Ok(warehouse.delete_older_than(kind.table(), cutoff)?))
                .await
        })
    }
}

fn quote_to_row(id: RecordId, quote: &StockQuote) -> QuoteRow {
    QuoteRow {
        id: id.to_string(),
        symbol: quote.symbol.to_string(),
        market: quote.market.as_str().to_owned(),
        price: quote.price,
        change_percent: quote.change_percent,
        volume: quote.volume.map(|volume| i64::try_from(volume).unwrap_or(i64::MAX)),
        open: quote.open,
        high: quote.high,
        low: quote.low,
        close: quote.close,
        quoted_at: quote.quoted_at,
        ingested_at: quote.ingested_at,
    }
}

fn quote_from_row(row: QuoteRow) -> Result<Stored<StockQuote>, PersistenceError> {
    Ok(Stored {
        id: parse_id(&row.id)?,
        record: StockQuote {
            symbol: Symbol::parse(&row.symbol)
                .map_err(|error| PersistenceError::Corrupt(error.to_string()))?,
            market: row
                .market
                .parse::<Market>()
                .map_err(|error| PersistenceError::Corrupt(error.to_string()))?,
            price: row.price,
            change_percent: row.change_percent,
            volume: row.volume.and_then(|volume| u64::try_from(volume).ok()),
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            quoted_at: row.quoted_at,
            ingested_at: row.ingested_at,
        },
    })
}

fn news_to_row(id: RecordId, item: &NewsItem) -> NewsRow {
    NewsRow {
        id: id.to_string(),
        title: item.title.clone(),
        content: item.content.clone(),
        summary: item.summary.clone(),
        source: item.source.clone(),
        url: item.url.clone(),
        published_at: item.published_at,
        keywords: item.keywords.clone(),
        sentiment: item.sentiment,
        ingested_at: item.ingested_at,
    }
}

fn news_from_row(row: NewsRow) -> Result<Stored<NewsItem>, PersistenceError> {
    Ok(Stored {
        id: parse_id(&row.id)?,
        record: NewsItem {
            title: row.title,
            content: row.content,
            summary: row.summary,
            source: row.source,
            url: row.url,
            published_at: row.published_at,
            keywords: row.keywords,
            sentiment: row.sentiment,
            ingested_at: row.ingested_at,
        },
    })
}

fn summary_to_row(summary: &DailySummary) -> SummaryRow {
    SummaryRow {
        summary_date: summary.summary_date,
        market_overview: summary.market_overview.clone(),
        key_news: summary.key_news.clone(),
        investment_advice: summary.investment_advice.clone(),
        risk_level: summary.risk_level.as_str().to_owned(),
        ingested_at: summary.ingested_at,
    }
}

fn summary_from_row(row: SummaryRow) -> Result<DailySummary, PersistenceError> {
    Ok(DailySummary {
        summary_date: row.summary_date,
        market_overview: row.market_overview,
        key_news: row.key_news,
        investment_advice: row.investment_advice,
        risk_level: row
            .risk_level
            .parse()
            .map_err(|error: crate::ValidationError| PersistenceError::Corrupt(error.to_string()))?,
        ingested_at: row.ingested_at,
    })
}

fn parse_id(raw: &str) -> Result<RecordId, PersistenceError> {
    Uuid::parse_str(raw).map_err(|error| PersistenceError::Corrupt(format!("id '{raw}': {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PriceBar, RiskLevel};
    use chrono::Duration;
    use finbrief_warehouse::WarehouseConfig;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn quote(symbol: &str, ingested_at: DateTime<Utc>) -> StockQuote {
        let bar = PriceBar {
            ts: ingested_at,
            open: 50.0,
            high: 56.0,
            low: 49.0,
            close: 55.0,
            volume: Some(42),
        };
        StockQuote::new(
            Symbol::parse(symbol).expect("valid symbol"),
            Market::infer(&Symbol::parse(symbol).expect("valid symbol")),
            bar,
            10.0,
            ingested_at,
        )
        .expect("valid quote")
    }

    fn summary(date: NaiveDate, overview: &str) -> DailySummary {
        DailySummary {
            summary_date: date,
            market_overview: overview.to_owned(),
            key_news: String::from("news"),
            investment_advice: String::from("advice"),
            risk_level: RiskLevel::Low,
            ingested_at: Utc::now(),
        }
    }

    fn repositories() -> (tempfile::TempDir, Vec<Arc<dyn Repository>>) {
        let temp = tempdir().expect("tempdir");
        let warehouse = Warehouse::open(WarehouseConfig::in_dir(temp.path()))
            .expect("warehouse should open");
        let repositories: Vec<Arc<dyn Repository>> = vec![
            Arc::new(MemoryRepository::new()),
            Arc::new(WarehouseRepository::new(warehouse)),
        ];
        (temp, repositories)
    }

    #[tokio::test]
    async fn quotes_round_trip_newest_first() {
        let (_temp, repositories) = repositories();
        let now = Utc::now();

        for repository in repositories {
            repository
                .insert_quote(&quote("AAPL", now - Duration::hours(2)))
                .await
                .expect("insert");
            let newest_id = repository
                .insert_quote(&quote("600000.SH", now))
                .await
                .expect("insert");

            let listed = repository.list_quotes(10).await.expect("list");
            assert_eq!(listed.len(), 2);
            assert_eq!(listed[0].id, newest_id);
            assert_eq!(listed[0].record.market, Market::Cn);
            assert_eq!(listed[1].record.symbol.as_str(), "AAPL");
        }
    }

    #[tokio::test]
    async fn summary_upsert_overwrites_same_date() {
        let (_temp, repositories) = repositories();
        let day = NaiveDate::from_ymd_opt(2026, 3, 2).expect("valid date");
        let next_day = NaiveDate::from_ymd_opt(2026, 3, 3).expect("valid date");

        for repository in repositories {
            repository.upsert_summary(&summary(day, "first")).await.expect("upsert");
            repository.upsert_summary(&summary(day, "second")).await.expect("upsert");
            repository
                .upsert_summary(&summary(next_day, "next"))
                .await
                .expect("upsert");

            let all = repository.list_summaries(10).await.expect("list");
            assert_eq!(all.len(), 2);
            assert_eq!(
                repository
                    .summary_for(day)
                    .await
                    .expect("lookup")
                    .map(|found| found.market_overview),
                Some(String::from("second"))
            );
            let latest = repository.latest_summary().await.expect("latest").expect("present");
            assert_eq!(latest.summary_date, next_day);
        }
    }

    #[tokio::test]
    async fn delete_older_than_is_strict() {
        let (_temp, repositories) = repositories();
        let cutoff = Utc::now() - Duration::days(30);

        for repository in repositories {
            repository
                .insert_quote(&quote("OLD", cutoff - Duration::seconds(1)))
                .await
                .expect("insert");
            repository.insert_quote(&quote("EDGE", cutoff)).await.expect("insert");
            repository.insert_quote(&quote("NEW", Utc::now())).await.expect("insert");

            let removed = repository
                .delete_older_than(RecordKind::Quotes, cutoff)
                .await
                .expect("delete");

            assert_eq!(removed, 1);
            let remaining: Vec<String> = repository
                .list_quotes(10)
                .await
                .expect("list")
                .into_iter()
                .map(|stored| stored.record.symbol.to_string())
                .collect();
            assert_eq!(remaining, vec!["NEW", "EDGE"]);
        }
    }
}
