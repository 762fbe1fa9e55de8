mod jobs;
mod run_job;
mod serve;
mod summary;

use std::sync::Arc;

use finbrief_core::{
    build_context, build_scheduler, FetchMode, PipelineConfig, ReqwestHttpClient,
    Repository, Scheduler, WarehouseRepository,
};
use finbrief_warehouse::Warehouse;

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub async fn run(cli: &Cli) -> Result<(), CliError> {
    let config = PipelineConfig::from_env()?;
    tracing::debug!(db_path = %config.db_path.display(), mock = cli.mock, "configuration loaded");

    match &cli.command {
        Command::Serve => serve::run(cli, &config).await,
        Command::Run(args) => run_job::run(cli, &config, args).await,
        Command::Summary(args) => summary::run(cli, &config, args).await,
        Command::Jobs => jobs::run(cli, &config).await,
    }
}

fn fetch_mode(cli: &Cli) -> FetchMode {
    if cli.mock {
        FetchMode::Fixture
    } else {
        FetchMode::Live
    }
}

fn open_repository(config: &PipelineConfig) -> Result<Arc<dyn Repository>, CliError> {
    let warehouse = Warehouse::open(config.warehouse_config())?;
    Ok(Arc::new(WarehouseRepository::new(warehouse)))
}

fn pipeline(
    cli: &Cli,
    config: &PipelineConfig,
    repository: Arc<dyn Repository>,
) -> Result<Scheduler, CliError> {
    let context = build_context(
        config,
        repository,
        Arc::new(ReqwestHttpClient::new()),
        fetch_mode(cli),
    );
    Ok(build_scheduler(config, context)?)
}
