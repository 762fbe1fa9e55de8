//! Scheduled pipeline jobs.
//!
//! Each job is a thin sequence over a shared [`PipelineContext`]:
//! collect, persist, synthesize, notify. Stages run strictly in that order.
//! Storage failures are recorded on the [`JobReport`] and make the run
//! partial; only a failure that stops the job body surfaces as [`JobError`].

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Months, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::aggregator::{collect_all, collect_news, CollectOptions};
use crate::fetch::{QuoteTarget, SharedFetcher};
use crate::notify::Dispatcher;
use crate::repository::{PersistenceError, RecordKind, Repository};
use crate::synthesizer::synthesize;
use crate::{NewsItem, StockQuote};

pub const DAILY_ANALYSIS: &str = "daily_analysis";
pub const HOURLY_COLLECTION: &str = "hourly_collection";
pub const WEEKLY_CLEANUP: &str = "weekly_cleanup";

pub type JobFuture<'a> = Pin<Box<dyn Future<Output = Result<JobReport, JobError>> + Send + 'a>>;

/// Unit of scheduled work.
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self) -> JobFuture<'_>;
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("storage failed during {operation}: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: PersistenceError,
    },

    #[error("{operation} exceeded the {timeout_ms} ms storage timeout")]
    StoreTimeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("job panicked: {message}")]
    Panicked { message: String },
}

/// Counters and non-fatal errors produced by one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub counts: BTreeMap<&'static str, u64>,
    pub errors: Vec<String>,
}

impl JobReport {
    pub fn count(&mut self, key: &'static str, value: impl TryInto<u64>) {
        self.counts.insert(key, value.try_into().unwrap_or(u64::MAX));
    }

    pub fn get(&self, key: &str) -> u64 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn is_partial(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// How long collected records are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "unit", content = "value", rename_all = "snake_case")]
pub enum Retention {
    CalendarMonths(u32),
    Days(u32),
}

impl Default for Retention {
    fn default() -> Self {
        Self::CalendarMonths(1)
    }
}

impl Retention {
    /// Records ingested strictly before this instant are expired.
    pub fn cutoff(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::CalendarMonths(months) => now
                .checked_sub_months(Months::new(months))
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            Self::Days(days) => now
                .checked_sub_signed(chrono::Duration::days(i64::from(days)))
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        }
    }
}

/// Everything the jobs share.
pub struct PipelineContext {
    pub repository: Arc<dyn Repository>,
    pub quote_fetchers: Vec<SharedFetcher<QuoteTarget, StockQuote>>,
    pub news_fetchers: Vec<SharedFetcher<(), NewsItem>>,
    pub daily_targets: Vec<QuoteTarget>,
    pub hourly_targets: Vec<QuoteTarget>,
    pub dispatcher: Dispatcher,
    pub collect_options: CollectOptions,
    /// Upper bound for each repository call.
    pub store_timeout: Duration,
    /// Offset used to decide which calendar day "today" is.
    pub utc_offset: FixedOffset,
    pub retention: Retention,
}

impl PipelineContext {
    async fn store<T, F>(&self, operation: &'static str, call: F) -> Result<T, JobError>
    where
        F: Future<Output = Result<T, PersistenceError>>,
    {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result.map_err(|source| JobError::Storage { operation, source }),
            Err(_) => Err(JobError::StoreTimeout {
                operation,
                timeout_ms: u64::try_from(self.store_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    async fn persist_quotes(&self, job: &str, quotes: &[StockQuote], report: &mut JobReport) {
        let mut stored = 0_u64;
        for quote in quotes {
            match self
                .store("insert_quote", self.repository.insert_quote(quote))
                .await
            {
                Ok(_) => stored += 1,
                Err(error) => {
                    tracing::warn!(job, input = %quote.symbol, %error, "failed to store quote");
                    report.errors.push(error.to_string());
                }
            }
        }
        report.count("quotes_stored", stored);
    }

    async fn persist_news(&self, job: &str, news: &[NewsItem], report: &mut JobReport) {
        let mut stored = 0_u64;
        for item in news {
            match self.store("insert_news", self.repository.insert_news(item)).await {
                Ok(_) => stored += 1,
                Err(error) => {
                    tracing::warn!(job, source = %item.source, %error, "failed to store news item");
                    report.errors.push(error.to_string());
                }
            }
        }
        report.count("news_stored", stored);
    }
}

/// Collect quotes and news, persist them, publish today's summary.
pub struct DailyAnalysisJob {
    context: Arc<PipelineContext>,
}

impl DailyAnalysisJob {
    pub fn new(context: Arc<PipelineContext>) -> Self {
        Self { context }
    }
}

impl Job for DailyAnalysisJob {
    fn name(&self) -> &str {
        DAILY_ANALYSIS
    }

    fn run(&self) -> JobFuture<'_> {
        Box::pin(async move {
            let context = &*self.context;
            let mut report = JobReport::default();

            let quotes = collect_all(
                &context.quote_fetchers,
                &context.daily_targets,
                &context.collect_options,
            )
            .await;
            let news = collect_news(&context.news_fetchers, &context.collect_options).await;
            report.count("quotes_attempted", quotes.attempted);
            report.count("quotes_collected", quotes.records.len());
            report.count("news_attempted", news.attempted);
            report.count("news_collected", news.records.len());
            report.count("fetch_failures", quotes.failures.len() + news.failures.len());

            context
                .persist_quotes(DAILY_ANALYSIS, &quotes.records, &mut report)
                .await;
            context
                .persist_news(DAILY_ANALYSIS, &news.records, &mut report)
                .await;

            let now = Utc::now();
            let today = now.with_timezone(&context.utc_offset).date_naive();
            let summary = synthesize(today, &quotes.records, &news.records, now);
            match context
                .store("upsert_summary", context.repository.upsert_summary(&summary))
                .await
            {
                Ok(()) => report.count("summaries_stored", 1_u64),
                Err(error) => {
                    tracing::warn!(job = DAILY_ANALYSIS, %error, "failed to store daily summary");
                    report.count("summaries_stored", 0_u64);
                    report.errors.push(error.to_string());
                }
            }

            let delivery = context.dispatcher.dispatch(&summary).await;
            report.count("notifications_attempted", delivery.attempted());
            report.count("notifications_delivered", delivery.delivered());
            report.count("notifications_failed", delivery.failed());

            tracing::info!(
                job = DAILY_ANALYSIS,
                summary_date = %today,
                risk = %summary.risk_level,
                quotes = quotes.records.len(),
                news = news.records.len(),
                delivered = delivery.delivered(),
                "daily analysis finished"
            );
            Ok(report)
        })
    }
}

/// Collect quotes for the reduced symbol set and persist them.
pub struct HourlyCollectionJob {
    context: Arc<PipelineContext>,
}

impl HourlyCollectionJob {
    pub fn new(context: Arc<PipelineContext>) -> Self {
        Self { context }
    }
}

impl Job for HourlyCollectionJob {
    fn name(&self) -> &str {
        HOURLY_COLLECTION
    }

    fn run(&self) -> JobFuture<'_> {
        Box::pin(async move {
            let context = &*self.context;
            let mut report = JobReport::default();

            let quotes = collect_all(
                &context.quote_fetchers,
                &context.hourly_targets,
                &context.collect_options,
            )
            .await;
            report.count("quotes_attempted", quotes.attempted);
            report.count("quotes_collected", quotes.records.len());
            report.count("fetch_failures", quotes.failures.len());

            context
                .persist_quotes(HOURLY_COLLECTION, &quotes.records, &mut report)
                .await;

            tracing::info!(
                job = HOURLY_COLLECTION,
                collected = quotes.records.len(),
                stored = report.get("quotes_stored"),
                "hourly collection finished"
            );
            Ok(report)
        })
    }
}

/// Delete quotes and news past the retention window.
pub struct WeeklyCleanupJob {
    context: Arc<PipelineContext>,
}

impl WeeklyCleanupJob {
    pub fn new(context: Arc<PipelineContext>) -> Self {
        Self { context }
    }
}

impl Job for WeeklyCleanupJob {
    fn name(&self) -> &str {
        WEEKLY_CLEANUP
    }

    fn run(&self) -> JobFuture<'_> {
        Box::pin(async move {
            let context = &*self.context;
            let cutoff = context.retention.cutoff(Utc::now());
            let mut report = JobReport::default();

            let quotes = context
                .store(
                    "delete_quotes",
                    context.repository.delete_older_than(RecordKind::Quotes, cutoff),
                )
                .await?;
            let news = context
                .store(
                    "delete_news",
                    context.repository.delete_older_than(RecordKind::News, cutoff),
                )
                .await?;
            report.count("quotes_deleted", quotes);
            report.count("news_deleted", news);

            tracing::info!(
                job = WEEKLY_CLEANUP,
                cutoff = %cutoff.to_rfc3339(),
                quotes_deleted = quotes,
                news_deleted = news,
                "expired records removed"
            );
            Ok(report)
        })
    }
}

/// The three standard jobs, in scheduling order.
pub fn standard_jobs(context: Arc<PipelineContext>) -> Vec<Arc<dyn Job>> {
    vec![
        Arc::new(DailyAnalysisJob::new(Arc::clone(&context))),
        Arc::new(HourlyCollectionJob::new(Arc::clone(&context))),
        Arc::new(WeeklyCleanupJob::new(context)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{FixtureNewsFetcher, FixtureQuoteFetcher};
    use crate::fetch::FetchErrorKind;
    use crate::http_client::{HttpClient, HttpError, HttpRequest, HttpResponse};
    use crate::notify::Channel;
    use crate::repository::MemoryRepository;
    use crate::Symbol;
    use chrono::{NaiveDate, TimeZone};

    struct AcceptingClient;

    impl HttpClient for AcceptingClient {
        fn execute<'a>(
            &'a self,
            _request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            Box::pin(async { Ok(HttpResponse::ok("{}")) })
        }
    }

    fn symbol(raw: &str) -> Symbol {
        Symbol::parse(raw).expect("valid symbol")
    }

    fn context(repository: Arc<dyn Repository>) -> Arc<PipelineContext> {
        let quotes = FixtureQuoteFetcher::new("fixture")
            .with_closes(symbol("AAPL"), vec![50.0, 55.0])
            .with_failure(symbol("TSLA"), FetchErrorKind::Unavailable);
        Arc::new(PipelineContext {
            repository,
            quote_fetchers: vec![Arc::new(quotes)],
            news_fetchers: vec![Arc::new(
                FixtureNewsFetcher::new("Wire").with_article("Stocks rally", "Markets up"),
            )],
            daily_targets: vec![
                QuoteTarget::new(symbol("AAPL")),
                QuoteTarget::new(symbol("TSLA")),
            ],
            hourly_targets: vec![QuoteTarget::new(symbol("AAPL"))],
            dispatcher: Dispatcher::new(
                vec![Channel::wecom("https://hooks.test/wecom"), Channel::feishu("")],
                Arc::new(AcceptingClient),
            ),
            collect_options: CollectOptions::default(),
            store_timeout: Duration::from_secs(5),
            utc_offset: FixedOffset::east_opt(8 * 3600).expect("valid offset"),
            retention: Retention::Days(30),
        })
    }

    #[test]
    fn calendar_month_retention_handles_short_months() {
        let now = Utc.with_ymd_and_hms(2026, 3, 31, 12, 0, 0).single().expect("valid time");
        let cutoff = Retention::default().cutoff(now);
        assert_eq!(
            cutoff.date_naive(),
            NaiveDate::from_ymd_opt(2026, 2, 28).expect("valid date")
        );
    }

    #[tokio::test]
    async fn daily_job_stores_collected_records_and_summary() {
        let repository = Arc::new(MemoryRepository::new());
        let job = DailyAnalysisJob::new(context(repository.clone()));

        let report = job.run().await.expect("daily job should run");

        assert_eq!(report.get("quotes_attempted"), 2);
        assert_eq!(report.get("quotes_stored"), 1);
        assert_eq!(report.get("news_stored"), 1);
        assert_eq!(report.get("summaries_stored"), 1);
        assert_eq!(report.get("notifications_attempted"), 1);
        assert_eq!(report.get("notifications_delivered"), 1);
        assert!(!report.is_partial());

        let stored = repository.list_quotes(10).await.expect("list quotes");
        assert!((stored[0].record.change_percent - 10.0).abs() < 1e-9);
        assert!(repository.latest_summary().await.expect("latest").is_some());
    }

    #[tokio::test]
    async fn hourly_job_only_persists_quotes() {
        let repository = Arc::new(MemoryRepository::new());
        let job = HourlyCollectionJob::new(context(repository.clone()));

        let report = job.run().await.expect("hourly job should run");

        assert_eq!(report.get("quotes_stored"), 1);
        assert!(repository.list_news(10).await.expect("list news").is_empty());
        assert!(repository.latest_summary().await.expect("latest").is_none());
    }

    #[tokio::test]
    async fn cleanup_job_reports_deleted_counts() {
        let repository = Arc::new(MemoryRepository::new());
        let context = context(repository.clone());
        HourlyCollectionJob::new(Arc::clone(&context))
            .run()
            .await
            .expect("seed quotes");

        let report = WeeklyCleanupJob::new(context)
            .run()
            .await
            .expect("cleanup should run");

        assert_eq!(report.get("quotes_deleted"), 0);
        assert_eq!(report.get("news_deleted"), 0);
        assert_eq!(repository.list_quotes(10).await.expect("list").len(), 1);
    }

    #[test]
    fn standard_jobs_have_stable_names() {
        let jobs = standard_jobs(context(Arc::new(MemoryRepository::new())));
        let names: Vec<&str> = jobs.iter().map(|job| job.name()).collect();
        assert_eq!(names, vec![DAILY_ANALYSIS, HOURLY_COLLECTION, WEEKLY_CLEANUP]);
    }
}
