//! Daily summary synthesis. Pure: no I/O, no clock reads.

use chrono::{DateTime, NaiveDate, Utc};

use crate::{DailySummary, NewsItem, RiskLevel, StockQuote};

const KEY_NEWS_LIMIT: usize = 5;
const NEUTRAL_SENTIMENT: f64 = 0.5;

pub const DISCLAIMER: &str =
    "For reference only; investing involves risk. Decide according to your own risk tolerance.";

/// Aggregate signals the summary texts are derived from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketSignals {
    /// Mean change percent across quotes.
    pub trend: f64,
    /// Population standard deviation of change percent.
    pub volatility: f64,
    /// Mean news sentiment; neutral when no item is scored.
    pub sentiment: f64,
    pub quote_count: usize,
}

impl MarketSignals {
    pub fn from_inputs(quotes: &[StockQuote], news: &[NewsItem]) -> Self {
        let changes: Vec<f64> = quotes.iter().map(|quote| quote.change_percent).collect();
        let trend = mean(&changes).unwrap_or(0.0);
        let volatility = mean(
            &changes
                .iter()
                .map(|change| (change - trend).powi(2))
                .collect::<Vec<_>>(),
        )
        .map_or(0.0, f64::sqrt);

        let scores: Vec<f64> = news.iter().filter_map(|item| item.sentiment).collect();
        let sentiment = mean(&scores).unwrap_or(NEUTRAL_SENTIMENT);

        Self {
            trend,
            volatility,
            sentiment,
            quote_count: quotes.len(),
        }
    }

    pub fn risk_level(&self) -> RiskLevel {
        if self.quote_count == 0 {
            return RiskLevel::Medium;
        }
        if self.volatility > 3.0 || self.sentiment < 0.3 {
            RiskLevel::High
        } else if self.volatility > 1.5 || self.sentiment < 0.5 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Build the summary for `date` from the day's quotes and news.
///
/// Empty inputs still produce a summary with placeholder texts.
pub fn synthesize(
    date: NaiveDate,
    quotes: &[StockQuote],
    news: &[NewsItem],
    generated_at: DateTime<Utc>,
) -> DailySummary {
    let signals = MarketSignals::from_inputs(quotes, news);
    let risk_level = signals.risk_level();

    DailySummary {
        summary_date: date,
        market_overview: market_overview(quotes, &signals),
        key_news: key_news(news),
        investment_advice: investment_advice(quotes, &signals, risk_level),
        risk_level,
        ingested_at: generated_at,
    }
}

fn market_overview(quotes: &[StockQuote], signals: &MarketSignals) -> String {
    if quotes.is_empty() {
        return String::from("No market data was collected today.");
    }

    let gainers = quotes.iter().filter(|quote| quote.change_percent > 0.0).count();
    let decliners = quotes.iter().filter(|quote| quote.change_percent < 0.0).count();
    let mut lines = vec![format!(
        "{} symbols tracked: {gainers} up, {decliners} down, {} flat. Average change {:+.2}%.",
        quotes.len(),
        quotes.len() - gainers - decliners,
        signals.trend
    )];

    let by_change = |a: &&StockQuote, b: &&StockQuote| a.change_percent.total_cmp(&b.change_percent);
    if let (Some(best), Some(worst)) = (quotes.iter().max_by(by_change), quotes.iter().min_by(by_change)) {
        lines.push(format!(
            "Best: {} {:+.2}% at {:.2}. Worst: {} {:+.2}% at {:.2}.",
            best.symbol, best.change_percent, best.price, worst.symbol, worst.change_percent, worst.price
        ));
    }

    lines.join("\n")
}

fn key_news(news: &[NewsItem]) -> String {
    if news.is_empty() {
        return String::from("No news was collected today.");
    }

    let mut newest: Vec<&NewsItem> = news.iter().collect();
    newest.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    newest
        .into_iter()
        .take(KEY_NEWS_LIMIT)
        .enumerate()
        .map(|(index, item)| format!("{}. {} ({})", index + 1, item.title, item.source))
        .collect::<Vec<_>>()
        .join("\n")
}

fn investment_advice(quotes: &[StockQuote], signals: &MarketSignals, risk: RiskLevel) -> String {
    let mut lines = vec![outlook(signals).to_owned()];

    if quotes.is_empty() {
        lines.push(String::from("Stay on the sidelines until more market signals arrive."));
    } else {
        lines.push(sector_view(quotes).to_owned());
        lines.push(positioning(risk).to_owned());
    }

    lines.push(DISCLAIMER.to_owned());
    lines.join("\n")
}

fn outlook(signals: &MarketSignals) -> &'static str {
    let (sentiment, trend) = (signals.sentiment, signals.trend);
    if sentiment > 0.6 && trend > 0.0 {
        "Sentiment is upbeat and prices are firm; the advance may extend near term."
    } else if sentiment < 0.4 && trend < 0.0 {
        "Sentiment is gloomy and prices are weak; trade cautiously."
    } else if sentiment > 0.6 && trend < 0.0 {
        "Sentiment is upbeat while prices lag; a rebound may be forming."
    } else if sentiment < 0.4 && trend > 0.0 {
        "Prices are firm despite gloomy sentiment; wait for confirmation."
    } else {
        "Sentiment is neutral and prices are range-bound; a wait-and-see stance fits."
    }
}

fn sector_view(quotes: &[StockQuote]) -> &'static str {
    let gainers = quotes.iter().filter(|quote| quote.change_percent > 0.0).count();
    let decliners = quotes.iter().filter(|quote| quote.change_percent < 0.0).count();
    match gainers.cmp(&decliners) {
        std::cmp::Ordering::Greater => {
            "Breadth is positive: growth sectors such as technology and new energy lead."
        }
        std::cmp::Ordering::Less => {
            "Breadth is negative: favour defensive sectors such as consumer staples and healthcare."
        }
        std::cmp::Ordering::Equal => "Breadth is mixed: keep allocations balanced.",
    }
}

fn positioning(risk: RiskLevel) -> &'static str {
    match risk {
        RiskLevel::High => "Keep positions small, cap any single name at 10% and honour stop losses.",
        RiskLevel::Medium => "Hold a moderate 50-70% allocation and build positions in stages.",
        RiskLevel::Low => "A 70-80% allocation is reasonable; favour fundamentally sound holdings.",
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}
