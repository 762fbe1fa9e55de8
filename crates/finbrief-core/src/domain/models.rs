use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{Symbol, ValidationError};

/// Market a symbol trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    Us,
    Cn,
    Hk,
    Other,
}

impl Market {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Us => "us",
            Self::Cn => "cn",
            Self::Hk => "hk",
            Self::Other => "other",
        }
    }

    /// Infer the market from the exchange suffix of a symbol.
    pub fn infer(symbol: &Symbol) -> Self {
        match symbol.suffix() {
            Some("SZ" | "SS" | "SH") => Self::Cn,
            Some("HK") => Self::Hk,
            Some(_) => Self::Other,
            None if symbol.as_str().chars().all(|ch| ch.is_ascii_alphabetic() || ch == '-') => {
                Self::Us
            }
            None => Self::Other,
        }
    }
}

impl Display for Market {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Market {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "us" => Ok(Self::Us),
            "cn" => Ok(Self::Cn),
            "hk" => Ok(Self::Hk),
            "other" => Ok(Self::Other),
            _ => Err(ValidationError::InvalidMarket {
                value: value.to_owned(),
            }),
        }
    }
}

/// One daily OHLCV bar as reported upstream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub ts: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<u64>,
}

/// Percentage change between two closes.
///
/// Returns `None` when either close is zero or non-finite, so callers never
/// observe NaN or infinity.
pub fn percent_change(previous_close: f64, latest_close: f64) -> Option<f64> {
    let usable = |value: f64| value.is_finite() && value != 0.0;
    if !usable(previous_close) || !usable(latest_close) {
        return None;
    }

    let change = (latest_close - previous_close) / previous_close * 100.0;
    change.is_finite().then_some(change)
}

/// Normalized stock quote produced by a quote fetcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockQuote {
    pub symbol: Symbol,
    pub market: Market,
    pub price: f64,
    pub change_percent: f64,
    pub volume: Option<u64>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub quoted_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
}

impl StockQuote {
    /// Build a quote from the latest bar; `price` is the bar's close.
    pub fn new(
        symbol: Symbol,
        market: Market,
        bar: PriceBar,
        change_percent: f64,
        ingested_at: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        validate_non_negative("open", bar.open)?;
        validate_non_negative("high", bar.high)?;
        validate_non_negative("low", bar.low)?;
        validate_non_negative("close", bar.close)?;
        validate_finite("change_percent", change_percent)?;

        Ok(Self {
            symbol,
            market,
            price: bar.close,
            change_percent,
            volume: bar.volume,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            quoted_at: bar.ts,
            ingested_at,
        })
    }
}

/// News article collected from an outlet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
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

impl NewsItem {
    /// Raw article without keywords or sentiment; the text pass fills those.
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        source: impl Into<String>,
        url: impl Into<String>,
        published_at: DateTime<Utc>,
        ingested_at: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }

        Ok(Self {
            title,
            content: content.into(),
            summary: String::new(),
            source: source.into(),
            url: url.into(),
            published_at,
            keywords: Vec::new(),
            sentiment: None,
            ingested_at,
        })
    }

    pub fn with_sentiment(mut self, sentiment: Option<f64>) -> Result<Self, ValidationError> {
        if let Some(value) = sentiment {
            if !(0.0..=1.0).contains(&value) {
                return Err(ValidationError::SentimentOutOfRange {
                    value: value.to_string(),
                });
            }
        }
        self.sentiment = sentiment;
        Ok(self)
    }
}

/// Risk classification attached to a daily summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Human-readable label used in notifications.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

impl Display for RiskLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(ValidationError::InvalidRiskLevel {
                value: value.to_owned(),
            }),
        }
    }
}

/// Synthesized summary for one calendar date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub summary_date: NaiveDate,
    pub market_overview: String,
    pub key_news: String,
    pub investment_advice: String,
    pub risk_level: RiskLevel,
    pub ingested_at: DateTime<Utc>,
}

fn validate_finite(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    Ok(())
}

fn validate_non_negative(field: &'static str, value: f64) -> Result<(), ValidationError> {
    validate_finite(field, value)?;
    if value < 0.0 {
        return Err(ValidationError::NegativeValue { field });
    }
    Ok(())
}
