//! Environment-driven pipeline configuration.
//!
//! `FINBRIEF_*` variables take precedence; the legacy webhook names
//! `WECHAT_WEBHOOK` and `FEISHU_WEBHOOK` are honoured as fallbacks.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use cron::Schedule;
use finbrief_warehouse::WarehouseConfig;
use serde::{Serialize, Serializer};

use crate::adapters::NewsOutlet;
use crate::error::ConfigError;
use crate::jobs::{Retention, DAILY_ANALYSIS, HOURLY_COLLECTION, WEEKLY_CLEANUP};
use crate::retry::RetryConfig;
use crate::scheduler::SchedulerConfig;
use crate::Symbol;

pub const DEFAULT_DAILY_SYMBOLS: &[&str] = &[
    "AAPL", "MSFT", "GOOGL", "AMZN", "TSLA", "000001.SZ", "000002.SZ", "600000.SH",
];
pub const DEFAULT_HOURLY_SYMBOLS: &[&str] = &["AAPL", "MSFT", "GOOGL"];
pub const DEFAULT_DAILY_CRON: &str = "0 0 8 * * *";
pub const DEFAULT_HOURLY_CRON: &str = "0 0 * * * *";
pub const DEFAULT_CLEANUP_CRON: &str = "0 0 2 * * Sun";

/// RSS 2.0 feeds used when `FINBRIEF_NEWS_FEEDS` is unset.
const DEFAULT_OUTLETS: &[(&str, &str)] = &[
    ("Sina Finance", "https://rss.sina.com.cn/roll/finance/hot_roll.xml"),
    ("CNBC", "https://www.cnbc.com/id/100003114/device/rss/rss.html"),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineConfig {
    pub finbrief_home: PathBuf,
    pub db_path: PathBuf,
    #[serde(serialize_with = "redacted")]
    pub wecom_webhook: String,
    #[serde(serialize_with = "redacted")]
    pub feishu_webhook: String,
    pub daily_symbols: Vec<Symbol>,
    pub hourly_symbols: Vec<Symbol>,
    pub news_feeds: Vec<NewsOutlet>,
    pub daily_cron: String,
    pub hourly_cron: String,
    pub cleanup_cron: String,
    pub utc_offset_hours: i32,
    pub retention: Retention,
    pub fetch_timeout_ms: u64,
    pub fetch_retries: u32,
    pub notify_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
}

fn redacted<S: Serializer>(value: &str, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_empty() {
        serializer.serialize_str("")
    } else {
        serializer.serialize_str("<redacted>")
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        let finbrief_home = get("FINBRIEF_HOME")
            .map(PathBuf::from)
            .or_else(|| get("HOME").map(|home| PathBuf::from(home).join(".finbrief")))
            .unwrap_or_else(|| PathBuf::from(".finbrief"));
        let db_path = get("FINBRIEF_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| finbrief_home.join("warehouse.duckdb"));

        let daily_symbols = match get("FINBRIEF_DAILY_SYMBOLS") {
            Some(raw) => parse_symbols("FINBRIEF_DAILY_SYMBOLS", &raw)?,
            None => default_symbols(DEFAULT_DAILY_SYMBOLS)?,
        };
        let hourly_symbols = match get("FINBRIEF_HOURLY_SYMBOLS") {
            Some(raw) => parse_symbols("FINBRIEF_HOURLY_SYMBOLS", &raw)?,
            None => default_symbols(DEFAULT_HOURLY_SYMBOLS)?,
        };
        let news_feeds = match get("FINBRIEF_NEWS_FEEDS") {
            Some(raw) => parse_feeds(&raw)?,
            None => DEFAULT_OUTLETS
                .iter()
                .map(|(name, url)| NewsOutlet::new(*name, *url))
                .collect(),
        };

        let daily_cron = get("FINBRIEF_DAILY_CRON").unwrap_or_else(|| DEFAULT_DAILY_CRON.to_owned());
        let hourly_cron =
            get("FINBRIEF_HOURLY_CRON").unwrap_or_else(|| DEFAULT_HOURLY_CRON.to_owned());
        let cleanup_cron =
            get("FINBRIEF_CLEANUP_CRON").unwrap_or_else(|| DEFAULT_CLEANUP_CRON.to_owned());
        validate_cron(DAILY_ANALYSIS, &daily_cron)?;
        validate_cron(HOURLY_COLLECTION, &hourly_cron)?;
        validate_cron(WEEKLY_CLEANUP, &cleanup_cron)?;

        let utc_offset_hours: i32 = parse_number(&get, "FINBRIEF_UTC_OFFSET_HOURS", 8)?;
        if !(-23..=23).contains(&utc_offset_hours) {
            return Err(ConfigError::InvalidValue {
                name: "FINBRIEF_UTC_OFFSET_HOURS",
                value: utc_offset_hours.to_string(),
                reason: String::from("offset must be within -23..=23 hours"),
            });
        }

        let retention = match get("FINBRIEF_RETENTION_DAYS") {
            Some(_) => Retention::Days(parse_number(&get, "FINBRIEF_RETENTION_DAYS", 0)?),
            None => Retention::default(),
        };

        Ok(Self {
            finbrief_home,
            db_path,
            wecom_webhook: get("FINBRIEF_WECOM_WEBHOOK")
                .or_else(|| get("WECHAT_WEBHOOK"))
                .unwrap_or_default(),
            feishu_webhook: get("FINBRIEF_FEISHU_WEBHOOK")
                .or_else(|| get("FEISHU_WEBHOOK"))
                .unwrap_or_default(),
            daily_symbols,
            hourly_symbols,
            news_feeds,
            daily_cron,
            hourly_cron,
            cleanup_cron,
            utc_offset_hours,
            retention,
            fetch_timeout_ms: parse_number(&get, "FINBRIEF_FETCH_TIMEOUT_MS", 30_000)?,
            fetch_retries: parse_number(&get, "FINBRIEF_FETCH_RETRIES", 3)?,
            notify_timeout_ms: parse_number(&get, "FINBRIEF_NOTIFY_TIMEOUT_MS", 10_000)?,
            shutdown_grace_ms: parse_number(&get, "FINBRIEF_SHUTDOWN_GRACE_MS", 30_000)?,
        })
    }

    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .unwrap_or_else(|| Utc.fix())
    }

    pub fn warehouse_config(&self) -> WarehouseConfig {
        let mut config = WarehouseConfig::in_dir(&self.finbrief_home);
        config.db_path = self.db_path.clone();
        config
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig::exponential(self.fetch_retries)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
            timezone: self.utc_offset(),
            ..SchedulerConfig::default()
        }
    }
}

fn default_symbols(raw: &[&str]) -> Result<Vec<Symbol>, ConfigError> {
    raw.iter()
        .map(|value| {
            Symbol::parse(value).map_err(|source| ConfigError::InvalidSymbol {
                name: "default symbols",
                source,
            })
        })
        .collect()
}

fn parse_symbols(name: &'static str, raw: &str) -> Result<Vec<Symbol>, ConfigError> {
    let mut symbols = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        let symbol = Symbol::parse(part).map_err(|source| ConfigError::InvalidSymbol { name, source })?;
        if !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    Ok(symbols)
}

fn parse_feeds(raw: &str) -> Result<Vec<NewsOutlet>, ConfigError> {
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((name, url)) if !name.trim().is_empty() && url.trim().starts_with("http") => {
                Ok(NewsOutlet::new(name.trim(), url.trim()))
            }
            _ => Err(ConfigError::InvalidFeed {
                entry: entry.to_owned(),
            }),
        })
        .collect()
}

fn validate_cron(job: &str, expression: &str) -> Result<(), ConfigError> {
    Schedule::from_str(expression)
        .map(|_| ())
        .map_err(|error| ConfigError::InvalidCron {
            job: job.to_owned(),
            expression: expression.to_owned(),
            reason: error.to_string(),
        })
}

fn parse_number<T>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|error: T::Err| ConfigError::InvalidValue {
            name,
            value: raw.clone(),
            reason: error.to_string(),
        }),
    }
}
