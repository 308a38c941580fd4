//! Error types for the ingest engine

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ingest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the ingest engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown category '{0}'")]
    UnknownCategory(String),

    #[error("Row {row} does not exist in category '{category}'")]
    RowOutOfRange { category: String, row: usize },

    #[error("Category '{category}' has no column '{column}'")]
    UnknownColumn { category: String, column: String },

    #[error("Column '{column}' of category '{category}' is derived and cannot be edited")]
    ReadOnlyColumn { category: String, column: String },

    #[error("Invalid path template '{template}': {message}")]
    Template { template: String, message: String },

    #[error("Path template '{template}' references missing field '{field}'")]
    MissingField { template: String, field: String },

    #[error("Failed to probe resolution of {path}: {message}")]
    Probe { path: PathBuf, message: String },

    #[error("FFprobe not found. Please install FFmpeg and ensure ffprobe is in PATH")]
    FfprobeNotFound,

    #[error("Destination file already exists and cannot be replaced: {0}")]
    DestinationExists(PathBuf),

    #[error("Publish failed for {path}: {message}")]
    Publish { path: PathBuf, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Directory traversal error: {0}")]
    WalkDir(#[from] walkdir::Error),
}
