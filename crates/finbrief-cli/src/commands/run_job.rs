use finbrief_core::{JobOutcome, PipelineConfig};

use crate::cli::{Cli, RunArgs};
use crate::error::CliError;
use crate::output;

/// Run one job and print its `JobRun`. A failed run still prints its record
/// before the exit code reports the failure.
pub async fn run(cli: &Cli, config: &PipelineConfig, args: &RunArgs) -> Result<(), CliError> {
    let repository = super::open_repository(config)?;
    let scheduler = super::pipeline(cli, config, repository)?;

    let name = args.job.scheduler_name();
    let run = scheduler.trigger(name).await?;
    output::render(&run, cli.pretty)?;

    if run.outcome == JobOutcome::Failure {
        return Err(CliError::JobFailed {
            job: run.job,
            outcome: String::from("failure"),
        });
    }
    Ok(())
}
