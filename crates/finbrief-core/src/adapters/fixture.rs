//! Deterministic in-process fetchers for offline runs and tests.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use crate::fetch::{FetchError, FetchErrorKind, FetchFuture, Fetcher, QuoteTarget};
use crate::{percent_change, NewsItem, PriceBar, StockQuote, Symbol};

/// Quote fetcher serving scripted close series.
#[derive(Debug, Clone, Default)]
pub struct FixtureQuoteFetcher {
    source: String,
    closes: BTreeMap<Symbol, Vec<f64>>,
    failures: BTreeMap<Symbol, FetchErrorKind>,
    seeded: bool,
}

impl FixtureQuoteFetcher {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    /// Fetcher that invents a stable series for any symbol it is asked for.
    pub fn seeded(source: impl Into<String>) -> Self {
        Self {
            seeded: true,
            ..Self::new(source)
        }
    }

    pub fn with_closes(mut self, symbol: Symbol, closes: Vec<f64>) -> Self {
        self.closes.insert(symbol, closes);
        self
    }

    pub fn with_failure(mut self, symbol: Symbol, kind: FetchErrorKind) -> Self {
        self.failures.insert(symbol, kind);
        self
    }

    fn quote_for(&self, target: &QuoteTarget) -> Result<Vec<StockQuote>, FetchError> {
        if let Some(kind) = self.failures.get(&target.symbol) {
            return Err(FetchError::new(*kind, "scripted failure"));
        }

        let closes = match self.closes.get(&target.symbol) {
            Some(closes) => closes.clone(),
            None if self.seeded => seeded_closes(&target.symbol),
            None => {
                return Err(FetchError::rejected(format!(
                    "no fixture data for {}",
                    target.symbol
                )))
            }
        };

        let [.., previous_close, latest_close] = closes.as_slice() else {
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

        let now = Utc::now();
        let bar = PriceBar {
            ts: now,
            open: *previous_close,
            high: previous_close.max(*latest_close),
            low: previous_close.min(*latest_close),
            close: *latest_close,
            volume: Some(1_000_000 + symbol_seed(&target.symbol) % 500_000),
        };
        let quote = StockQuote::new(target.symbol.clone(), target.market, bar, change_percent, now)
            .map_err(|error| FetchError::malformed(error.to_string()))?;
        Ok(vec![quote])
    }
}

impl Fetcher for FixtureQuoteFetcher {
    type Input = QuoteTarget;
    type Record = StockQuote;

    fn source(&self) -> &str {
        &self.source
    }

    fn fetch<'a>(&'a self, input: QuoteTarget) -> FetchFuture<'a, StockQuote> {
        Box::pin(async move {
            self.quote_for(&input)
                .map_err(|error| error.with_context(self.source(), &input))
        })
    }
}

/// News fetcher serving a fixed article list for one outlet.
#[derive(Debug, Clone)]
pub struct FixtureNewsFetcher {
    source: String,
    articles: Vec<(String, String)>,
    failure: Option<FetchErrorKind>,
}

impl FixtureNewsFetcher {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            articles: Vec::new(),
            failure: None,
        }
    }

    /// Outlet with two canned market stories.
    pub fn sample(source: impl Into<String>) -> Self {
        Self::new(source)
            .with_article(
                "Technology stocks rally as chipmakers beat forecasts",
                "<p>Shares of large technology firms rose after quarterly profit beat estimates.</p>",
            )
            .with_article(
                "央行维持利率不变 市场情绪平稳",
                "央行宣布维持基准利率不变，股票市场小幅上涨。",
            )
    }

    pub fn with_article(mut self, title: impl Into<String>, content: impl Into<String>) -> Self {
        self.articles.push((title.into(), content.into()));
        self
    }

    pub fn failing(mut self, kind: FetchErrorKind) -> Self {
        self.failure = Some(kind);
        self
    }

    fn articles(&self) -> Result<Vec<NewsItem>, FetchError> {
        if let Some(kind) = self.failure {
            return Err(FetchError::new(kind, "scripted failure"));
        }

        let now = Utc::now();
        let slug = self.source.to_ascii_lowercase().replace(' ', "-");
        self.articles
            .iter()
            .enumerate()
            .map(|(index, (title, content))| {
                NewsItem::new(
                    title.clone(),
                    content.clone(),
                    self.source.clone(),
                    format!("https://fixtures.finbrief.local/{slug}/{index}"),
                    published_minutes_ago(now, index),
                    now,
                )
                .map_err(|error| FetchError::malformed(error.to_string()))
            })
            .collect()
    }
}

impl Fetcher for FixtureNewsFetcher {
    type Input = ();
    type Record = NewsItem;

    fn source(&self) -> &str {
        &self.source
    }

    fn fetch<'a>(&'a self, input: ()) -> FetchFuture<'a, NewsItem> {
        Box::pin(async move {
            self.articles()
                .map_err(|error| error.with_context(self.source(), &input))
        })
    }
}

fn published_minutes_ago(now: DateTime<Utc>, index: usize) -> DateTime<Utc> {
    now - Duration::minutes(i64::try_from(index).unwrap_or(0) * 5)
}

fn seeded_closes(symbol: &Symbol) -> Vec<f64> {
    let seed = symbol_seed(symbol);
    let base = 20.0 + (seed % 4_000) as f64 / 10.0;
    // -3.0% ..= +3.0% in 0.1% steps
    let change = ((seed / 7) % 61) as f64 / 10.0 - 3.0;
    vec![base, base * (1.0 + change / 100.0)]
}

fn symbol_seed(symbol: &Symbol) -> u64 {
    symbol.as_str().bytes().fold(0_u64, |acc, byte| {
        acc.wrapping_mul(33).wrapping_add(u64::from(byte))
    })
}
