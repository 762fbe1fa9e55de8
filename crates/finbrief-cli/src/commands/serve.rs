use serde::Serialize;

use finbrief_core::{JobRun, PipelineConfig};

use crate::cli::Cli;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct ServeSummary {
    jobs: Vec<String>,
    runs: Vec<JobRun>,
}

pub async fn run(cli: &Cli, config: &PipelineConfig) -> Result<(), CliError> {
    let repository = super::open_repository(config)?;
    let scheduler = super::pipeline(cli, config, repository)?;

    scheduler.start()?;
    tracing::info!(
        daily = %config.daily_cron,
        hourly = %config.hourly_cron,
        cleanup = %config.cleanup_cron,
        utc_offset_hours = config.utc_offset_hours,
        "serving; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!(grace_ms = config.shutdown_grace_ms, "shutdown requested");
    scheduler.stop().await;

    let summary = ServeSummary {
        jobs: scheduler.job_names().into_iter().map(str::to_owned).collect(),
        runs: scheduler.history(),
    };
    output::render(&summary, cli.pretty)
}
