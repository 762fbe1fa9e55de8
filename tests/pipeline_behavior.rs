//! Behavior-driven tests for the collection pipeline
//!
//! These tests verify HOW collection, persistence, synthesis and delivery
//! compose inside the daily and hourly jobs, from the outside.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, Utc};
use finbrief_core::{
    collect_all, collect_news, percent_change, Channel, CollectOptions, DailyAnalysisJob,
    Dispatcher, FetchErrorKind, HourlyCollectionJob, Job, NewsItem, NewsOutlet, PipelineContext,
    QuoteTarget, Repository, Retention, RetryConfig, RiskLevel, RssNewsFetcher, SharedFetcher,
    StockQuote,
};
use finbrief_tests::{
    symbol, RecordingRepository, ScriptedHttpClient, StubNewsFetcher, StubQuoteFetcher,
};
use proptest::prelude::*;

const WECOM: &str = "https://hooks.test/wecom";
const FEISHU: &str = "https://hooks.test/feishu";

fn context(
    repository: Arc<dyn Repository>,
    quotes: StubQuoteFetcher,
    outlets: Vec<StubNewsFetcher>,
    daily: &[&str],
    http: Arc<ScriptedHttpClient>,
) -> Arc<PipelineContext> {
    Arc::new(PipelineContext {
        repository,
        quote_fetchers: vec![Arc::new(quotes)],
        news_fetchers: outlets
            .into_iter()
            .map(|outlet| Arc::new(outlet) as SharedFetcher<(), NewsItem>)
            .collect(),
        daily_targets: daily.iter().map(|raw| QuoteTarget::new(symbol(raw))).collect(),
        hourly_targets: vec![QuoteTarget::new(symbol(daily[0]))],
        dispatcher: Dispatcher::new(vec![Channel::wecom(WECOM), Channel::feishu(FEISHU)], http),
        collect_options: CollectOptions::default(),
        store_timeout: Duration::from_secs(5),
        utc_offset: FixedOffset::east_opt(8 * 3600).expect("valid offset"),
        retention: Retention::default(),
    })
}

// =============================================================================
// Daily analysis: end to end
// =============================================================================

#[tokio::test]
async fn when_one_symbol_fails_the_daily_job_still_publishes_a_summary() {
    // Given: two symbols, one of which fails upstream, and two outlets with one item each
    let repository = Arc::new(RecordingRepository::new());
    let http = Arc::new(ScriptedHttpClient::new());
    let quotes = StubQuoteFetcher::new("stub")
        .closes("AAPL", &[50.0, 55.0])
        .failing("TSLA", FetchErrorKind::Unavailable);
    let outlets = vec![
        StubNewsFetcher::new("Wire", &["Stocks rally on strong earnings"]),
        StubNewsFetcher::new("Desk", &["Central bank holds interest rate"]),
    ];
    let job = DailyAnalysisJob::new(context(
        repository.clone(),
        quotes,
        outlets,
        &["AAPL", "TSLA"],
        http.clone(),
    ));

    // When: the daily job runs
    let report = job.run().await.expect("daily job should complete");

    // Then: one quote (+10%), two news items and one summary for today are stored
    let stored = repository.list_quotes(10).await.expect("list quotes");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].record.symbol.as_str(), "AAPL");
    assert!((stored[0].record.change_percent - 10.0).abs() < 1e-9);
    assert_eq!(repository.list_news(10).await.expect("list news").len(), 2);

    let today = Utc::now()
        .with_timezone(&FixedOffset::east_opt(8 * 3600).expect("valid offset"))
        .date_naive();
    let summary = repository
        .summary_for(today)
        .await
        .expect("lookup")
        .expect("summary for today should exist");
    assert!(summary.key_news.contains("Stocks rally on strong earnings (Wire)"));
    assert_eq!(repository.list_summaries(10).await.expect("list").len(), 1);

    // And: both webhooks received exactly one POST
    assert_eq!(http.requests().len(), 2);
    assert_eq!(http.requests_to(WECOM).len(), 1);
    assert_eq!(http.requests_to(FEISHU).len(), 1);
    assert_eq!(report.get("fetch_failures"), 1);
    assert!(!report.is_partial());
}

#[tokio::test]
async fn when_a_quote_write_fails_the_run_is_partial_but_delivery_continues() {
    // Given: a repository that rejects writes for AAPL
    let repository = Arc::new(RecordingRepository::new().rejecting_quotes_for("AAPL"));
    let http = Arc::new(ScriptedHttpClient::new());
    let quotes = StubQuoteFetcher::new("stub")
        .closes("AAPL", &[100.0, 101.0])
        .closes("MSFT", &[200.0, 198.0]);
    let job = DailyAnalysisJob::new(context(
        repository.clone(),
        quotes,
        vec![StubNewsFetcher::new("Wire", &["Markets steady"])],
        &["AAPL", "MSFT"],
        http.clone(),
    ));

    // When: the job runs
    let report = job.run().await.expect("job body completes");

    // Then: the other quote is still stored, the summary written and delivered
    assert!(report.is_partial());
    assert_eq!(report.errors.len(), 1);
    assert_eq!(repository.quote_writes(), 2);
    assert_eq!(report.get("quotes_stored"), 1);
    assert_eq!(repository.summary_writes(), 1);
    assert_eq!(http.requests().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn when_a_quote_write_hangs_it_is_cut_off_at_the_store_timeout() {
    // Given: a repository whose AAPL write never completes
    let repository = Arc::new(RecordingRepository::new().stalling_quotes_for("AAPL"));
    let quotes = StubQuoteFetcher::new("stub")
        .closes("AAPL", &[100.0, 101.0])
        .closes("MSFT", &[200.0, 198.0]);
    let job = DailyAnalysisJob::new(context(
        repository.clone(),
        quotes,
        Vec::new(),
        &["AAPL", "MSFT"],
        Arc::new(ScriptedHttpClient::new()),
    ));

    // When: the job runs
    let report = job.run().await.expect("job body completes");

    // Then: the stalled write is reported as a storage timeout and the rest proceeds
    assert!(report.is_partial());
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("insert_quote exceeded the 5000 ms storage timeout"));
    assert_eq!(report.get("quotes_stored"), 1);
    assert_eq!(repository.summary_writes(), 1);
}

#[tokio::test]
async fn when_every_source_fails_the_summary_uses_placeholders() {
    // Given: nothing upstream works
    let repository = Arc::new(RecordingRepository::new());
    let http = Arc::new(ScriptedHttpClient::new());
    let quotes = StubQuoteFetcher::new("stub").failing("AAPL", FetchErrorKind::Timeout);
    let job = DailyAnalysisJob::new(context(
        repository.clone(),
        quotes,
        vec![StubNewsFetcher::failing("Wire", FetchErrorKind::Malformed)],
        &["AAPL"],
        http,
    ));

    // When: the job runs
    job.run().await.expect("job should complete");

    // Then: a neutral placeholder summary is still produced
    let summary = repository
        .latest_summary()
        .await
        .expect("lookup")
        .expect("summary should exist");
    assert_eq!(summary.risk_level, RiskLevel::Medium);
    assert!(!summary.market_overview.is_empty());
    assert!(!summary.key_news.is_empty());
    assert!(summary.investment_advice.contains("For reference only"));
}

#[tokio::test]
async fn when_the_daily_job_runs_twice_the_summary_is_overwritten() {
    let repository = Arc::new(RecordingRepository::new());
    let http = Arc::new(ScriptedHttpClient::new());
    let job = DailyAnalysisJob::new(context(
        repository.clone(),
        StubQuoteFetcher::new("stub").closes("AAPL", &[10.0, 11.0]),
        vec![StubNewsFetcher::new("Wire", &["Tech stocks surge"])],
        &["AAPL"],
        http,
    ));

    job.run().await.expect("first run");
    job.run().await.expect("second run");

    assert_eq!(repository.summary_writes(), 2);
    assert_eq!(repository.list_summaries(10).await.expect("list").len(), 1);
}

// =============================================================================
// Hourly collection
// =============================================================================

#[tokio::test]
async fn when_the_hourly_job_runs_only_quotes_are_persisted() {
    let repository = Arc::new(RecordingRepository::new());
    let http = Arc::new(ScriptedHttpClient::new());
    let job = HourlyCollectionJob::new(context(
        repository.clone(),
        StubQuoteFetcher::new("stub").closes("AAPL", &[10.0, 11.0]),
        vec![StubNewsFetcher::new("Wire", &["Ignored"])],
        &["AAPL", "MSFT"],
        http.clone(),
    ));

    let report = job.run().await.expect("hourly job should complete");

    assert_eq!(report.get("quotes_stored"), 1);
    assert_eq!(repository.news_writes(), 0);
    assert_eq!(repository.summary_writes(), 0);
    assert!(http.requests().is_empty());
}

// =============================================================================
// Aggregation properties
// =============================================================================

#[tokio::test]
async fn collected_records_match_exactly_the_symbols_that_succeeded() {
    // Given: a mix of good, failing and unusable symbols
    let fetcher = Arc::new(
        StubQuoteFetcher::new("stub")
            .closes("AAPL", &[100.0, 110.0])
            .closes("MSFT", &[100.0, 0.0])
            .closes("GOOGL", &[42.0])
            .failing("TSLA", FetchErrorKind::Rejected)
            .closes("600000.SH", &[8.0, 8.4]),
    );
    let shared: SharedFetcher<QuoteTarget, StockQuote> = fetcher.clone();
    let targets: Vec<QuoteTarget> = ["AAPL", "MSFT", "GOOGL", "TSLA", "600000.SH"]
        .iter()
        .map(|raw| QuoteTarget::new(symbol(raw)))
        .collect();

    // When: collection runs
    let collection = collect_all(&[shared], &targets, &CollectOptions::default()).await;

    // Then: successes plus failures cover every symbol exactly once
    assert_eq!(fetcher.calls(), 5);
    assert_eq!(collection.succeeded() + collection.failures.len(), targets.len());
    let symbols: Vec<&str> = collection
        .records
        .iter()
        .map(|quote| quote.symbol.as_str())
        .collect();
    assert_eq!(symbols, vec!["AAPL", "600000.SH"]);
    assert!(collection
        .failures
        .iter()
        .any(|failure| failure.input == "MSFT"
            && failure.error.kind() == FetchErrorKind::InsufficientData));
}

fn symbol_outcomes() -> impl Strategy<Value = BTreeMap<String, bool>> {
    prop::collection::btree_map("[A-Z]{1,5}", any::<bool>(), 0..12)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Any split of the symbol set into successes and failures is reported
    /// back exactly: records for the successes in input order, one failure
    /// for each of the rest.
    #[test]
    fn collection_partitions_symbols_into_successes_and_failures(outcomes in symbol_outcomes()) {
        let fetcher = outcomes.iter().fold(StubQuoteFetcher::new("stub"), |fetcher, (raw, ok)| {
            if *ok {
                fetcher.closes(raw, &[100.0, 101.0])
            } else {
                fetcher.failing(raw, FetchErrorKind::Unavailable)
            }
        });
        let shared: SharedFetcher<QuoteTarget, StockQuote> = Arc::new(fetcher);
        let targets: Vec<QuoteTarget> = outcomes
            .keys()
            .map(|raw| QuoteTarget::new(symbol(raw)))
            .collect();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime");

        let collection =
            runtime.block_on(collect_all(&[shared], &targets, &CollectOptions::default()));

        let expected_ok: Vec<&str> = outcomes
            .iter()
            .filter(|(_, ok)| **ok)
            .map(|(raw, _)| raw.as_str())
            .collect();
        let expected_failed: Vec<&str> = outcomes
            .iter()
            .filter(|(_, ok)| !**ok)
            .map(|(raw, _)| raw.as_str())
            .collect();
        let stored: Vec<&str> = collection
            .records
            .iter()
            .map(|quote| quote.symbol.as_str())
            .collect();
        let failed: Vec<&str> = collection
            .failures
            .iter()
            .map(|failure| failure.input.as_str())
            .collect();

        prop_assert_eq!(stored, expected_ok);
        prop_assert_eq!(failed, expected_failed);
        prop_assert_eq!(collection.succeeded() + collection.failures.len(), outcomes.len());
        prop_assert!(collection
            .failures
            .iter()
            .all(|failure| failure.error.kind() == FetchErrorKind::Unavailable));
    }
}

#[tokio::test]
async fn when_an_outlet_serves_an_html_page_it_is_counted_as_a_malformed_failure() {
    // Given: one outlet answering with a web page and one with a real feed
    let http = Arc::new(
        ScriptedHttpClient::new()
            .respond(
                "https://portal.test/",
                200,
                "<!DOCTYPE html><html><body><ul><li>Headline<li>Other</ul></body></html>",
            )
            .respond(
                "https://wire.test/rss.xml",
                200,
                "<rss><channel><item><title>Stocks rally</title></item></channel></rss>",
            ),
    );
    let outlets: Vec<SharedFetcher<(), NewsItem>> = [
        ("Portal", "https://portal.test/finance.html"),
        ("Wire", "https://wire.test/rss.xml"),
    ]
    .into_iter()
    .map(|(name, url)| {
        Arc::new(
            RssNewsFetcher::new(NewsOutlet::new(name, url), http.clone())
                .with_retry(RetryConfig::disabled()),
        ) as SharedFetcher<(), NewsItem>
    })
    .collect();

    // When: news collection runs
    let collection = collect_news(&outlets, &CollectOptions::default()).await;

    // Then: the page is one malformed failure and the feed still lands
    assert_eq!(collection.attempted, 2);
    assert_eq!(collection.failures.len(), 1);
    assert_eq!(collection.failures[0].source, "Portal");
    assert_eq!(collection.failures[0].error.kind(), FetchErrorKind::Malformed);
    assert_eq!(collection.records.len(), 1);
    assert_eq!(collection.records[0].source, "Wire");
}

#[test]
fn percent_change_rejects_zero_and_non_finite_closes() {
    assert_eq!(percent_change(100.0, 110.0), Some(10.0));
    assert_eq!(percent_change(50.0, 55.0), Some(10.0));
    assert_eq!(percent_change(100.0, 0.0), None);
    assert_eq!(percent_change(0.0, 10.0), None);
    assert_eq!(percent_change(f64::NAN, 10.0), None);
}

#[tokio::test(start_paused = true)]
async fn slow_sources_are_cut_off_at_the_pair_timeout() {
    let slow: SharedFetcher<QuoteTarget, StockQuote> = Arc::new(
        StubQuoteFetcher::new("slow")
            .closes("AAPL", &[1.0, 2.0])
            .delayed(Duration::from_secs(120)),
    );

    let collection = collect_all(
        &[slow],
        &[QuoteTarget::new(symbol("AAPL"))],
        &CollectOptions {
            pair_timeout: Duration::from_secs(5),
        },
    )
    .await;

    assert!(collection.records.is_empty());
    assert_eq!(collection.failures[0].error.kind(), FetchErrorKind::Timeout);
}
