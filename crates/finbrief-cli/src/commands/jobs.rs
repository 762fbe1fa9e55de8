use std::sync::Arc;

use chrono::Utc;

use finbrief_core::{MemoryRepository, PipelineConfig};

use crate::cli::Cli;
use crate::error::CliError;
use crate::output;

/// Next fire times are computed without touching the warehouse.
pub async fn run(cli: &Cli, config: &PipelineConfig) -> Result<(), CliError> {
    let scheduler = super::pipeline(cli, config, Arc::new(MemoryRepository::new()))?;
    output::render(&scheduler.schedules(Utc::now()), cli.pretty)
}
