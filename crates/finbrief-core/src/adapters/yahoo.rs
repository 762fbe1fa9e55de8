use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use serde::Deserialize;

use crate::fetch::{FetchError, FetchFuture, Fetcher, QuoteTarget};
use crate::http_client::{execute_with_retry, HttpClient, HttpRequest};
use crate::retry::RetryConfig;
use crate::{percent_change, PriceBar, StockQuote};

const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";
pub(crate) const QUOTE_REQUESTS_PER_SECOND: u32 = 5;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Daily quote fetcher backed by the Yahoo Finance chart endpoint.
///
/// Requests `interval=1d&range=5d` and derives the change from the last two
/// non-null closes in the series.
#[derive(Clone)]
pub struct YahooChartFetcher {
    http_client: Arc<dyn HttpClient>,
    base_url: String,
    retry: RetryConfig,
    timeout_ms: u64,
    limiter: Arc<DirectRateLimiter>,
}

impl YahooChartFetcher {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            base_url: String::from(DEFAULT_BASE_URL),
            retry: RetryConfig::default(),
            timeout_ms: 30_000,
            limiter: Arc::new(RateLimiter::direct(per_second_quota(
                QUOTE_REQUESTS_PER_SECOND,
            ))),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_rate_limit(mut self, requests_per_second: u32) -> Self {
        self.limiter = Arc::new(RateLimiter::direct(per_second_quota(requests_per_second)));
        self
    }

    fn chart_url(&self, target: &QuoteTarget) -> String {
        format!(
            "{}/v8/finance/chart/{}?interval=1d&range=5d",
            self.base_url,
            urlencoding::encode(target.symbol.as_str())
        )
    }

    async fn fetch_quote(&self, target: &QuoteTarget) -> Result<Vec<StockQuote>, FetchError> {
        self.limiter.until_ready().await;

        let request = HttpRequest::get(self.chart_url(target))
            .with_header("accept", "application/json")
            .with_timeout_ms(self.timeout_ms);

        let response = execute_with_retry(self.http_client.as_ref(), request, &self.retry)
            .await
            .map_err(|error| FetchError::from_transport(&error))?;

        if !response.is_success() {
            return Err(FetchError::from_status(&response));
        }

        parse_chart(&response.body, target, Utc::now()).map(|quote| vec![quote])
    }
}

impl Fetcher for YahooChartFetcher {
    type Input = QuoteTarget;
    type Record = StockQuote;

    fn source(&self) -> &str {
        "yahoo"
    }

    fn fetch<'a>(&'a self, input: QuoteTarget) -> FetchFuture<'a, StockQuote> {
        Box::pin(async move {
            self.fetch_quote(&input)
                .await
                .map_err(|error| error.with_context(self.source(), &input))
        })
    }
}

/// Parse a chart payload into a quote for `target`.
pub(crate) fn parse_chart(
    body: &str,
    target: &QuoteTarget,
    ingested_at: DateTime<Utc>,
) -> Result<StockQuote, FetchError> {
    let chart_response: YahooChartResponse = serde_json::from_str(body)
        .map_err(|e| FetchError::malformed(format!("failed to parse yahoo chart: {e}")))?;

    if let Some(error) = chart_response.chart.error.filter(|value| !value.is_null()) {
        return Err(FetchError::rejected(format!("yahoo chart API error: {error}")));
    }

    let result = chart_response
        .chart
        .result
        .unwrap_or_default()
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::insufficient_data("no chart data in response"))?;

    let timestamps = result.timestamp.unwrap_or_default();
    let series = result
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::insufficient_data("no quote series in response"))?;

    let closes: Vec<(usize, f64)> = series
        .close
        .iter()
        .enumerate()
        .filter_map(|(index, close)| close.map(|value| (index, value)))
        .filter(|(index, _)| *index < timestamps.len())
        .collect();

    let [.., (_, previous_close), (latest_index, latest_close)] = closes.as_slice() else {
        return Err(FetchError::insufficient_data(format!(
            "need two closes, found {}",
            closes.len()
        )));
    };

    let change_percent = percent_change(*previous_close, *latest_close).ok_or_else(|| {
        FetchError::insufficient_data(format!(
            "cannot derive change from closes {previous_close} -> {latest_close}"
        ))
    })?;

    let ts = DateTime::<Utc>::from_timestamp(timestamps[*latest_index], 0)
        .ok_or_else(|| FetchError::malformed("invalid chart timestamp"))?;
    let value_at = |values: &[Option<f64>]| values.get(*latest_index).copied().flatten();
    let bar = PriceBar {
        ts,
        open: value_at(&series.open).unwrap_or(*latest_close),
        high: value_at(&series.high).unwrap_or(*latest_close),
        low: value_at(&series.low).unwrap_or(*latest_close),
        close: *latest_close,
        volume: series
            .volume
            .get(*latest_index)
            .copied()
            .flatten()
            .and_then(|volume| u64::try_from(volume).ok()),
    };

    StockQuote::new(
        target.symbol.clone(),
        target.market,
        bar,
        change_percent,
        ingested_at,
    )
    .map_err(|error| FetchError::malformed(error.to_string()))
}

fn per_second_quota(requests_per_second: u32) -> Quota {
    Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN))
}

#[derive(Debug, Clone, Deserialize)]
struct YahooChartResponse {
    chart: YahooChartData,
}

#[derive(Debug, Clone, Deserialize)]
struct YahooChartData {
    #[serde(default)]
    result: Option<Vec<YahooChartResult>>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct YahooChartResult {
    timestamp: Option<Vec<i64>>,
    indicators: YahooChartIndicators,
}

#[derive(Debug, Clone, Deserialize)]
struct YahooChartIndicators {
    #[serde(default)]
    quote: Vec<YahooChartQuote>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct YahooChartQuote {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<i64>>,
}
