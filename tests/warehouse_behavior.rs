//! Behavior-driven tests for DuckDB-backed persistence
//!
//! These tests verify HOW records survive reopening, how summaries are keyed
//! by day and how the weekly cleanup honors the retention cutoff.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveDate, Utc};
use finbrief_core::{
    synthesize, Channel, Dispatcher, Job, Market, NewsItem, PipelineContext, PriceBar, RecordKind,
    Repository, Retention, StockQuote, WarehouseRepository, WeeklyCleanupJob,
};
use finbrief_tests::{symbol, ScriptedHttpClient};
use finbrief_warehouse::{Table, Warehouse, WarehouseConfig};
use tempfile::TempDir;

fn open(dir: &TempDir) -> WarehouseRepository {
    let warehouse =
        Warehouse::open(WarehouseConfig::in_dir(dir.path())).expect("warehouse should open");
    WarehouseRepository::new(warehouse)
}

fn quote(raw: &str, ingested_at: DateTime<Utc>) -> StockQuote {
    let bar = PriceBar {
        ts: ingested_at,
        open: 100.0,
        high: 104.0,
        low: 99.0,
        close: 103.0,
        volume: Some(12_000),
    };
    StockQuote::new(symbol(raw), Market::Us, bar, 3.0, ingested_at).expect("valid quote")
}

fn news(title: &str, ingested_at: DateTime<Utc>) -> NewsItem {
    NewsItem::new(
        title,
        "body",
        "Wire",
        format!("https://news.test/{}", title.len()),
        ingested_at,
        ingested_at,
    )
    .expect("valid news item")
}

fn cleanup_job(repository: Arc<dyn Repository>, retention: Retention) -> WeeklyCleanupJob {
    WeeklyCleanupJob::new(Arc::new(PipelineContext {
        repository,
        quote_fetchers: Vec::new(),
        news_fetchers: Vec::new(),
        daily_targets: Vec::new(),
        hourly_targets: Vec::new(),
        dispatcher: Dispatcher::new(
            vec![Channel::wecom(""), Channel::feishu("")],
            Arc::new(ScriptedHttpClient::new()),
        ),
        collect_options: Default::default(),
        store_timeout: Duration::from_secs(10),
        utc_offset: FixedOffset::east_opt(0).expect("valid offset"),
        retention,
    }))
}

// =============================================================================
// Durability
// =============================================================================

#[tokio::test]
async fn when_the_warehouse_is_reopened_stored_records_are_still_there() {
    // Given: a quote, a news item and a summary written to a fresh database
    let dir = TempDir::new().expect("tempdir");
    let now = Utc::now();
    let date = NaiveDate::from_ymd_opt(2026, 3, 2).expect("valid date");
    {
        let repository = open(&dir);
        repository
            .insert_quote(&quote("AAPL", now))
            .await
            .expect("quote stored");
        repository
            .insert_news(&news("Stocks rally", now))
            .await
            .expect("news stored");
        repository
            .upsert_summary(&synthesize(date, &[], &[], now))
            .await
            .expect("summary stored");
    }

    // When: the database is opened again
    let repository = open(&dir);

    // Then: everything reads back unchanged
    let quotes = repository.list_quotes(10).await.expect("list quotes");
    assert_eq!(quotes.len(), 1);
    assert_eq!(quotes[0].record.symbol.as_str(), "AAPL");
    assert!((quotes[0].record.price - 103.0).abs() < f64::EPSILON);
    assert_eq!(quotes[0].record.volume, Some(12_000));

    let stored_news = repository.list_news(10).await.expect("list news");
    assert_eq!(stored_news[0].record.title, "Stocks rally");

    let summary = repository
        .summary_for(date)
        .await
        .expect("lookup")
        .expect("summary should survive reopening");
    assert_eq!(summary.summary_date, date);
}

#[tokio::test]
async fn when_a_summary_is_written_twice_for_one_day_a_single_row_remains() {
    let dir = TempDir::new().expect("tempdir");
    let repository = open(&dir);
    let date = NaiveDate::from_ymd_opt(2026, 3, 2).expect("valid date");
    let first = synthesize(date, &[], &[], Utc::now());
    let second = synthesize(date, &[quote("MSFT", Utc::now())], &[], Utc::now());

    repository.upsert_summary(&first).await.expect("first write");
    repository.upsert_summary(&second).await.expect("second write");

    assert_eq!(
        repository.warehouse().count(Table::DailySummaries).expect("count"),
        1
    );
    let latest = repository
        .latest_summary()
        .await
        .expect("lookup")
        .expect("summary exists");
    assert_eq!(latest.market_overview, second.market_overview);
}

// =============================================================================
// Retention
// =============================================================================

#[tokio::test]
async fn when_cleanup_runs_only_records_older_than_the_cutoff_are_deleted() {
    // Given: quotes and news spread around a 30-day cutoff
    let dir = TempDir::new().expect("tempdir");
    let repository = Arc::new(open(&dir));
    let now = Utc::now();
    for days in [45, 31, 29, 1] {
        let at = now - ChronoDuration::days(days);
        repository
            .insert_quote(&quote("AAPL", at))
            .await
            .expect("quote stored");
        repository
            .insert_news(&news(&format!("Item from {days} days ago"), at))
            .await
            .expect("news stored");
    }

    // When: the weekly cleanup runs with a 30 day retention
    let report = cleanup_job(repository.clone(), Retention::Days(30))
        .run()
        .await
        .expect("cleanup should complete");

    // Then: exactly the two older records of each kind are gone
    assert_eq!(report.get("quotes_deleted"), 2);
    assert_eq!(report.get("news_deleted"), 2);
    let remaining = repository.list_quotes(10).await.expect("list quotes");
    assert_eq!(remaining.len(), 2);
    assert!(remaining
        .iter()
        .all(|stored| stored.record.ingested_at >= now - ChronoDuration::days(30)));
    assert_eq!(repository.list_news(10).await.expect("list news").len(), 2);
}

#[tokio::test]
async fn a_record_exactly_at_the_cutoff_is_kept() {
    let dir = TempDir::new().expect("tempdir");
    let repository = open(&dir);
    let cutoff = Utc::now() - ChronoDuration::days(30);
    repository
        .insert_quote(&quote("AAPL", cutoff))
        .await
        .expect("quote stored");
    repository
        .insert_quote(&quote("MSFT", cutoff - ChronoDuration::seconds(1)))
        .await
        .expect("quote stored");

    let deleted = repository
        .delete_older_than(RecordKind::Quotes, cutoff)
        .await
        .expect("delete");

    assert_eq!(deleted, 1);
    let remaining = repository.list_quotes(10).await.expect("list quotes");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].record.symbol.as_str(), "AAPL");
}

#[tokio::test]
async fn summaries_are_never_removed_by_cleanup() {
    let dir = TempDir::new().expect("tempdir");
    let repository = Arc::new(open(&dir));
    let old_date = NaiveDate::from_ymd_opt(2020, 1, 2).expect("valid date");
    let long_ago = Utc::now() - ChronoDuration::days(2_000);
    repository
        .upsert_summary(&synthesize(old_date, &[], &[], long_ago))
        .await
        .expect("summary stored");

    cleanup_job(repository.clone(), Retention::default())
        .run()
        .await
        .expect("cleanup should complete");

    assert!(repository
        .summary_for(old_date)
        .await
        .expect("lookup")
        .is_some());
}
