//! Wiring from [`PipelineConfig`] to a ready [`PipelineContext`] and
//! [`Scheduler`].

use std::sync::Arc;
use std::time::Duration;

use crate::adapters::{
    FixtureNewsFetcher, FixtureQuoteFetcher, RssNewsFetcher, YahooChartFetcher,
    QUOTE_REQUESTS_PER_SECOND,
};
use crate::aggregator::CollectOptions;
use crate::config::PipelineConfig;
use crate::error::ConfigError;
use crate::fetch::{QuoteTarget, SharedFetcher};
use crate::http_client::HttpClient;
use crate::jobs::{DailyAnalysisJob, HourlyCollectionJob, PipelineContext, WeeklyCleanupJob};
use crate::notify::{Channel, Dispatcher};
use crate::repository::Repository;
use crate::scheduler::{ScheduledJob, Scheduler};
use crate::{NewsItem, StockQuote};

const STORE_TIMEOUT: Duration = Duration::from_secs(15);

/// Where quotes and news come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Yahoo chart API and the configured RSS outlets.
    Live,
    /// Deterministic in-process fixtures; no network.
    Fixture,
}

pub fn build_context(
    config: &PipelineConfig,
    repository: Arc<dyn Repository>,
    http_client: Arc<dyn HttpClient>,
    mode: FetchMode,
) -> Arc<PipelineContext> {
    let (quote_fetchers, news_fetchers): (
        Vec<SharedFetcher<QuoteTarget, StockQuote>>,
        Vec<SharedFetcher<(), NewsItem>>,
    ) = match mode {
        FetchMode::Live => (
            vec![Arc::new(
                YahooChartFetcher::new(Arc::clone(&http_client))
                    .with_retry(config.retry())
                    .with_timeout(config.fetch_timeout()),
            ) as SharedFetcher<QuoteTarget, StockQuote>],
            config
                .news_feeds
                .iter()
                .map(|outlet| {
                    Arc::new(
                        RssNewsFetcher::new(outlet.clone(), Arc::clone(&http_client))
                            .with_retry(config.retry())
                            .with_timeout(config.fetch_timeout()),
                    ) as SharedFetcher<(), NewsItem>
                })
                .collect(),
        ),
        FetchMode::Fixture => (
            vec![Arc::new(FixtureQuoteFetcher::seeded("fixture")) as SharedFetcher<QuoteTarget, StockQuote>],
            config
                .news_feeds
                .iter()
                .map(|outlet| {
                    Arc::new(FixtureNewsFetcher::sample(outlet.name.clone()))
                        as SharedFetcher<(), NewsItem>
                })
                .collect(),
        ),
    };

    let dispatcher = Dispatcher::new(
        vec![
            Channel::wecom(config.wecom_webhook.clone()),
            Channel::feishu(config.feishu_webhook.clone()),
        ],
        http_client,
    )
    .with_timeout(config.notify_timeout())
    .with_display_offset(config.utc_offset());

    let collect_options = CollectOptions {
        pair_timeout: pair_budget(config).max(CollectOptions::default().pair_timeout),
    };

    Arc::new(PipelineContext {
        repository,
        quote_fetchers,
        news_fetchers,
        daily_targets: config
            .daily_symbols
            .iter()
            .cloned()
            .map(QuoteTarget::new)
            .collect(),
        hourly_targets: config
            .hourly_symbols
            .iter()
            .cloned()
            .map(QuoteTarget::new)
            .collect(),
        dispatcher,
        collect_options,
        store_timeout: STORE_TIMEOUT,
        utc_offset: config.utc_offset(),
        retention: config.retention,
    })
}

/// Worst case for one (fetcher, symbol) pair: every attempt runs to the fetch
/// timeout after the longest backoff sleeps, and the pair first queues behind
/// every other symbol at the quote rate limiter.
fn pair_budget(config: &PipelineConfig) -> Duration {
    let retry = config.retry();
    let symbols = config.daily_symbols.len().max(config.hourly_symbols.len());
    let limiter_wait = (Duration::from_secs(1) / QUOTE_REQUESTS_PER_SECOND)
        .saturating_mul(u32::try_from(symbols).unwrap_or(u32::MAX));

    config
        .fetch_timeout()
        .saturating_mul(retry.attempts())
        .saturating_add(retry.max_total_backoff())
        .saturating_add(limiter_wait)
}

/// Scheduler with the three standard jobs on their configured crons.
pub fn build_scheduler(
    config: &PipelineConfig,
    context: Arc<PipelineContext>,
) -> Result<Scheduler, ConfigError> {
    let entries = vec![
        ScheduledJob::new(
            config.daily_cron.clone(),
            Arc::new(DailyAnalysisJob::new(Arc::clone(&context))),
        )?,
        ScheduledJob::new(
            config.hourly_cron.clone(),
            Arc::new(HourlyCollectionJob::new(Arc::clone(&context))),
        )?,
        ScheduledJob::new(
            config.cleanup_cron.clone(),
            Arc::new(WeeklyCleanupJob::new(context)),
        )?,
    ];
    Ok(Scheduler::new(entries, config.scheduler_config()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::ReqwestHttpClient;
    use crate::jobs::{DAILY_ANALYSIS, HOURLY_COLLECTION, WEEKLY_CLEANUP};
    use crate::repository::MemoryRepository;
    use crate::scheduler::JobOutcome;

    fn config() -> PipelineConfig {
        PipelineConfig::from_lookup(|name| match name {
            "HOME" => Some(String::from("/tmp/finbrief-test")),
            "FINBRIEF_DAILY_SYMBOLS" => Some(String::from("AAPL,600000.SH")),
            _ => None,
        })
        .expect("valid config")
    }

    #[test]
    fn fixture_context_mirrors_configured_outlets_and_symbols() {
        let context = build_context(
            &config(),
            Arc::new(MemoryRepository::new()),
            Arc::new(ReqwestHttpClient::new()),
            FetchMode::Fixture,
        );

        assert_eq!(context.quote_fetchers.len(), 1);
        assert_eq!(context.news_fetchers.len(), 2);
        assert_eq!(context.daily_targets.len(), 2);
        assert_eq!(context.hourly_targets.len(), 3);
        assert_eq!(context.dispatcher.channels().len(), 2);
        assert!(context.collect_options.pair_timeout >= Duration::from_secs(45));
    }

    #[test]
    fn pair_budget_covers_attempts_backoff_and_rate_limiting() {
        let config = PipelineConfig::from_lookup(|name| match name {
            "HOME" => Some(String::from("/tmp/finbrief-test")),
            "FINBRIEF_FETCH_TIMEOUT_MS" => Some(String::from("1000")),
            "FINBRIEF_FETCH_RETRIES" => Some(String::from("2")),
            _ => None,
        })
        .expect("valid config");

        // 3 attempts of 1 s, backoff of at most 300 + 600 ms, 8 symbols at 5/s.
        assert_eq!(pair_budget(&config), Duration::from_millis(3_000 + 900 + 1_600));
        assert!(
            pair_budget(&config)
                >= config.fetch_timeout() * config.retry().attempts()
                    + config.retry().max_total_backoff()
        );
    }

    #[test]
    fn pair_timeout_grows_past_the_default_for_slow_fetch_settings() {
        let config = config();
        let context = build_context(
            &config,
            Arc::new(MemoryRepository::new()),
            Arc::new(ReqwestHttpClient::new()),
            FetchMode::Fixture,
        );

        // 4 attempts of 30 s, backoff of at most 2.1 s, 2 daily and 3 hourly symbols.
        assert_eq!(
            context.collect_options.pair_timeout,
            Duration::from_millis(120_000 + 2_100 + 600)
        );
    }

    #[tokio::test]
    async fn scheduler_runs_daily_job_against_fixtures() {
        let config = config();
        let repository = Arc::new(MemoryRepository::new());
        let context = build_context(
            &config,
            repository.clone(),
            Arc::new(ReqwestHttpClient::new()),
            FetchMode::Fixture,
        );
        let scheduler = build_scheduler(&config, context).expect("valid crons");

        assert_eq!(
            scheduler.job_names(),
            vec![DAILY_ANALYSIS, HOURLY_COLLECTION, WEEKLY_CLEANUP]
        );

        // Both webhooks are unset, so dispatch skips every channel.
        let run = scheduler.trigger(DAILY_ANALYSIS).await.expect("job should run");
        assert_eq!(run.outcome, JobOutcome::Success);
        assert_eq!(run.counts.get("quotes_stored"), Some(&2));
        assert_eq!(run.counts.get("notifications_attempted"), Some(&0));
        assert!(repository.latest_summary().await.expect("latest").is_some());
    }
}
