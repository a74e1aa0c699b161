use thiserror::Error;

/// Failures callers match on. Everything else travels as plain
/// `anyhow::Error` context.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StudioError {
    #[error("Missing {0}")]
    MissingCredential(&'static str),
    #[error("{0}")]
    MissingInput(&'static str),
    #[error("{operation} failed: {reason}")]
    PredictionFailed { operation: String, reason: String },
    #[error("{operation} timed out after {attempts} poll attempts")]
    TimedOut { operation: String, attempts: u32 },
    #[error("Unexpected output format from {model}")]
    UnexpectedOutput { model: String },
    #[error("No changes detected in the analysis")]
    NoChanges,
}
