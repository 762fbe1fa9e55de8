use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] finbrief_core::ConfigError),

    #[error(transparent)]
    Scheduler(#[from] finbrief_core::SchedulerError),

    #[error("job '{job}' finished with outcome {outcome}")]
    JobFailed { job: String, outcome: String },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] finbrief_warehouse::WarehouseError),

    #[error(transparent)]
    Persistence(#[from] finbrief_core::PersistenceError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::Scheduler(_) => 2,
            Self::JobFailed { .. } => 3,
            Self::Serialization(_) => 4,
            Self::Storage(_) => 10,
            Self::Persistence(_) => 10,
            Self::Io(_) => 10,
        }
    }
}
