//! # Domain Models
//!
//! Canonical records flowing through the collection pipeline.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Symbol`] | Validated ticker, exchange suffix included |
//! | [`Market`] | Market tag inferred from the symbol |
//! | [`StockQuote`] | Latest daily bar plus percent change |
//! | [`NewsItem`] | Normalized article with keywords and sentiment |
//! | [`DailySummary`] | One synthesized summary per calendar date |
//! | [`RiskLevel`] | Low / Medium / High |
//!
//! Construction validates invariants; an invalid price or sentiment is a
//! [`ValidationError`](crate::ValidationError), never a stored record.

mod models;
mod symbol;

pub use models::{
    percent_change, DailySummary, Market, NewsItem, PriceBar, RiskLevel, StockQuote,
};
pub use symbol::Symbol;
