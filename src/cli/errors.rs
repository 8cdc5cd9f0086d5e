use thiserror::Error;

/// Application-specific errors for the CLI
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Missing required argument: {arg}")]
    MissingArgument { arg: String },

    #[error("Invalid {arg}: {value}. Expected {expected}")]
    InvalidArgument {
        arg: String,
        value: String,
        expected: &'static str,
    },

    #[error("Conflicting arguments: {0}")]
    Conflict(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Run file error: {0}")]
    RunFile(#[from] serde_json::Error),

    #[error(transparent)]
    Pipeline(#[from] satmosaic::Error),
}
