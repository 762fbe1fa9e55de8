//! # Finbrief Core
//!
//! Scheduled market-briefing pipeline: collect stock quotes and financial
//! news, persist them, synthesize a daily summary and push it to chat
//! webhooks.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Fetchers (Yahoo chart, RSS outlets, fixtures) |
//! | [`aggregator`] | Best-effort concurrent fan-out over fetchers |
//! | [`config`] | Environment-driven pipeline configuration |
//! | [`domain`] | Domain models (StockQuote, NewsItem, DailySummary) |
//! | [`error`] | Validation and configuration errors |
//! | [`fetch`] | Fetcher contract and structured fetch errors |
//! | [`http_client`] | HTTP client abstraction |
//! | [`jobs`] | Daily analysis, hourly collection and weekly cleanup |
//! | [`notify`] | WeCom / Feishu webhook dispatch |
//! | [`pipeline`] | Wiring from config to context and scheduler |
//! | [`repository`] | Persistence contract and implementations |
//! | [`retry`] | Retry policy for upstream calls |
//! | [`scheduler`] | Cron-driven job scheduler |
//! | [`synthesizer`] | Pure daily summary synthesis |
//! | [`text`] | News normalization, keywords and sentiment |
//!
//! ## Pipeline
//!
//! ```text
//! ┌─────────────┐   tick   ┌──────────────┐
//! │  Scheduler  │─────────▶│     Job      │
//! └─────────────┘          └──────┬───────┘
//!                                 │ collect
//!                                 ▼
//! ┌─────────────┐          ┌──────────────┐
//! │  Fetchers   │◀─────────│  Aggregator  │
//! └─────────────┘          └──────┬───────┘
//!                                 │ persist / synthesize
//!                                 ▼
//! ┌─────────────┐          ┌──────────────┐
//! │ Repository  │◀─────────│ Synthesizer  │──▶ Dispatcher ──▶ webhooks
//! └─────────────┘          └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use finbrief_core::{build_context, build_scheduler, FetchMode, MemoryRepository};
//! use finbrief_core::{PipelineConfig, ReqwestHttpClient};
//!
//! let config = PipelineConfig::from_env()?;
//! let context = build_context(
//!     &config,
//!     Arc::new(MemoryRepository::new()),
//!     Arc::new(ReqwestHttpClient::new()),
//!     FetchMode::Fixture,
//! );
//! let scheduler = build_scheduler(&config, context)?;
//! let run = scheduler.trigger("daily_analysis").await?;
//! ```

pub mod adapters;
pub mod aggregator;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod http_client;
pub mod jobs;
pub mod notify;
pub mod pipeline;
pub mod repository;
pub mod retry;
pub mod scheduler;
pub mod synthesizer;
pub mod text;

pub use adapters::{
    FixtureNewsFetcher, FixtureQuoteFetcher, NewsOutlet, RssNewsFetcher, YahooChartFetcher,
};
pub use aggregator::{collect_all, collect_news, CollectOptions, Collection, FetchFailure};
pub use config::PipelineConfig;
pub use domain::{
    percent_change, DailySummary, Market, NewsItem, PriceBar, RiskLevel, StockQuote, Symbol,
};
pub use error::{ConfigError, ValidationError};
pub use fetch::{
    FetchError, FetchErrorKind, FetchFuture, FetchInput, Fetcher, QuoteTarget, SharedFetcher,
};
pub use http_client::{
    execute_with_retry, HttpClient, HttpError, HttpErrorKind, HttpMethod, HttpRequest, HttpResponse,
    ReqwestHttpClient,
};
pub use jobs::{
    DailyAnalysisJob, HourlyCollectionJob, Job, JobError, JobFuture, JobReport, PipelineContext,
    Retention, WeeklyCleanupJob, DAILY_ANALYSIS, HOURLY_COLLECTION, WEEKLY_CLEANUP,
};
pub use notify::{
    Channel, ChannelKind, ChannelOutcome, ChannelReport, DeliveryError, DispatchReport,
    Dispatcher,
};
pub use pipeline::{build_context, build_scheduler, FetchMode};
pub use repository::{
    MemoryRepository, PersistenceError, RecordId, RecordKind, Repository, RepositoryFuture,
    Stored, WarehouseRepository,
};
pub use retry::{Backoff, RetryConfig, TRANSIENT_STATUSES};
pub use scheduler::{
    JobOutcome, JobRun, JobSchedule, ScheduledJob, Scheduler, SchedulerConfig, SchedulerError,
};
pub use synthesizer::{synthesize, MarketSignals, DISCLAIMER};
