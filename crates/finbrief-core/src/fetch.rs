//! # Source Fetchers
//!
//! Every upstream (quote API, news outlet, fixture) implements [`Fetcher`].
//! A fetch either yields zero or more complete records or a single
//! [`FetchError`]; partial records are never returned.
//!
//! ```rust,ignore
//! use finbrief_core::{Fetcher, QuoteTarget, Symbol};
//!
//! let target = QuoteTarget::new(Symbol::parse("AAPL")?);
//! let quotes = fetcher.fetch(target).await?;
//! ```

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http_client::{HttpError, HttpResponse};
use crate::{Market, Symbol};

/// Boxed future returned by [`Fetcher::fetch`].
pub type FetchFuture<'a, R> = Pin<Box<dyn Future<Output = Result<Vec<R>, FetchError>> + Send + 'a>>;

/// Shared, type-erased fetcher handle.
pub type SharedFetcher<I, R> = Arc<dyn Fetcher<Input = I, Record = R>>;

/// Input accepted by a fetcher; describes itself for logs and errors.
pub trait FetchInput: Clone + Send + Sync + 'static {
    fn describe(&self) -> String;
}

impl FetchInput for () {
    fn describe(&self) -> String {
        String::from("-")
    }
}

/// Quote fetch target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteTarget {
    pub symbol: Symbol,
    pub market: Market,
}

impl QuoteTarget {
    /// Target with the market inferred from the symbol suffix.
    pub fn new(symbol: Symbol) -> Self {
        let market = Market::infer(&symbol);
        Self { symbol, market }
    }

    pub fn with_market(symbol: Symbol, market: Market) -> Self {
        Self { symbol, market }
    }
}

impl FetchInput for QuoteTarget {
    fn describe(&self) -> String {
        self.symbol.to_string()
    }
}

/// Contract implemented by every upstream source.
pub trait Fetcher: Send + Sync {
    type Input: FetchInput;
    type Record: Send + 'static;

    /// Stable source name used in logs and errors.
    fn source(&self) -> &str;

    fn fetch<'a>(&'a self, input: Self::Input) -> FetchFuture<'a, Self::Record>;
}

/// Fetch failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// Transport failure or retryable status after the retry budget.
    Unavailable,
    /// Definitive client error (4xx other than 408/429).
    Rejected,
    /// Response body could not be parsed.
    Malformed,
    /// Parsed, but not enough data to build a record.
    InsufficientData,
    Timeout,
    Internal,
}

impl FetchErrorKind {
    pub const fn code(self) -> &'static str {
        match self {
            Self::Unavailable => "fetch.unavailable",
            Self::Rejected => "fetch.rejected",
            Self::Malformed => "fetch.malformed",
            Self::InsufficientData => "fetch.insufficient_data",
            Self::Timeout => "fetch.timeout",
            Self::Internal => "fetch.internal",
        }
    }
}

impl Display for FetchErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Structured fetch error recovered at the aggregator boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{source_name} [{input}]: {message} ({kind})")]
pub struct FetchError {
    kind: FetchErrorKind,
    source_name: String,
    input: String,
    message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            source_name: String::new(),
            input: String::new(),
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Unavailable, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Rejected, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Malformed, message)
    }

    pub fn insufficient_data(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::InsufficientData, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Timeout, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Internal, message)
    }

    /// Classify a transport failure.
    pub fn from_transport(error: &HttpError) -> Self {
        if error.is_timeout() {
            Self::timeout(error.message())
        } else {
            Self::unavailable(error.message())
        }
    }

    /// Classify a non-2xx response that survived the retry budget.
    pub fn from_status(response: &HttpResponse) -> Self {
        match response.status {
            408 => Self::timeout("upstream returned status 408"),
            429 => Self::unavailable("upstream rate limited the request (429)"),
            400..=499 => Self::rejected(format!("upstream returned status {}", response.status)),
            status => Self::unavailable(format!("upstream returned status {status}")),
        }
    }

    /// Attach the source and input the error occurred for.
    pub fn with_context(mut self, source: &str, input: &impl FetchInput) -> Self {
        self.source_name = source.to_owned();
        self.input = input.describe();
        self
    }

    pub const fn kind(&self) -> FetchErrorKind {
        self.kind
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }
}
