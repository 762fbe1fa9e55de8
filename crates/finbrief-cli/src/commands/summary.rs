use finbrief_core::PipelineConfig;

use crate::cli::{Cli, SummaryArgs};
use crate::error::CliError;
use crate::output;

pub async fn run(cli: &Cli, config: &PipelineConfig, args: &SummaryArgs) -> Result<(), CliError> {
    let repository = super::open_repository(config)?;

    let summary = match args.date {
        Some(date) => repository.summary_for(date).await?,
        None => repository.latest_summary().await?,
    };
    if summary.is_none() {
        tracing::warn!(date = ?args.date, "no summary stored");
    }
    output::render(&summary, cli.pretty)
}
