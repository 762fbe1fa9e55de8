//! Concrete [`Fetcher`](crate::Fetcher) implementations.

pub mod fixture;
mod rss;
mod yahoo;

pub use fixture::{FixtureNewsFetcher, FixtureQuoteFetcher};
pub use rss::{NewsOutlet, RssNewsFetcher};
pub use yahoo::YahooChartFetcher;
pub(crate) use yahoo::QUOTE_REQUESTS_PER_SECOND;
