use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    /// The history file exists but one of its rows could not be read.
    /// The file is left untouched when this is returned.
    #[error("corrupt history file {path:?}: {reason}")]
    CorruptHistory { path: PathBuf, reason: String },

    #[error("symbol source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("moving average window must be at least 1 (got {0})")]
    InvalidWindow(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
