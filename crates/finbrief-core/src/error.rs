use thiserror::Error;

/// Validation errors raised while constructing domain values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },

    #[error("invalid market '{value}', expected one of us, cn, hk, other")]
    InvalidMarket { value: String },
    #[error("invalid risk level '{value}', expected one of low, medium, high")]
    InvalidRiskLevel { value: String },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be non-negative")]
    NegativeValue { field: &'static str },
    #[error("sentiment must be within [0, 1], got {value}")]
    SentimentOutOfRange { value: String },

    #[error("news title cannot be empty")]
    EmptyTitle,
}

/// Configuration errors surfaced at startup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {name} has invalid value '{value}': {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid cron expression for job '{job}': '{expression}' ({reason})")]
    InvalidCron {
        job: String,
        expression: String,
        reason: String,
    },

    #[error("invalid symbol in {name}: {source}")]
    InvalidSymbol {
        name: &'static str,
        #[source]
        source: ValidationError,
    },

    #[error("invalid news feed entry '{entry}', expected name=url")]
    InvalidFeed { entry: String },
}
