//! CLI argument definitions for finbrief.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `serve` | Run the scheduler until Ctrl-C |
//! | `run` | Execute one job once and print its run record |
//! | `summary` | Print the latest (or a given day's) summary |
//! | `jobs` | List jobs with their cron and next fire time |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--mock` | `false` | Use fixture fetchers instead of the network |
//! | `--pretty` | `false` | Pretty-print JSON output |
//!
//! # Examples
//!
//! ```bash
//! finbrief run daily --mock --pretty
//! finbrief summary --date 2026-03-02
//! FINBRIEF_DAILY_CRON="0 30 7 * * *" finbrief serve
//! ```

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};

use finbrief_core::{DAILY_ANALYSIS, HOURLY_COLLECTION, WEEKLY_CLEANUP};

/// Finbrief - scheduled market briefings
///
/// Collects quotes and financial news, writes a daily summary and pushes it
/// to WeCom / Feishu webhooks. Configuration comes from `FINBRIEF_*`
/// environment variables.
#[derive(Debug, Parser)]
#[command(name = "finbrief", author, version, about = "Scheduled market briefings")]
pub struct Cli {
    /// Use deterministic fixture fetchers; no network access for data.
    #[arg(long, global = true, default_value_t = false)]
    pub mock: bool,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the scheduler and run until interrupted.
    Serve,

    /// Execute one job immediately.
    ///
    /// # Examples
    ///
    ///   finbrief run daily
    ///   finbrief run cleanup --pretty
    Run(RunArgs),

    /// Print the stored daily summary.
    Summary(SummaryArgs),

    /// List scheduled jobs.
    Jobs,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[arg(value_enum)]
    pub job: JobName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum JobName {
    Daily,
    Hourly,
    Cleanup,
}

impl JobName {
    pub const fn scheduler_name(self) -> &'static str {
        match self {
            Self::Daily => DAILY_ANALYSIS,
            Self::Hourly => HOURLY_COLLECTION,
            Self::Cleanup => WEEKLY_CLEANUP,
        }
    }
}

#[derive(Debug, Args)]
pub struct SummaryArgs {
    /// Day to print (YYYY-MM-DD); latest when omitted.
    #[arg(long)]
    pub date: Option<NaiveDate>,
}
