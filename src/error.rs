use thiserror::Error;

/// Failure taxonomy for the ingestion pipeline.
///
/// Row-level problems are counted, never raised: only file-level and
/// precondition failures surface as errors. A detected duplicate import is
/// advisory data (`model::PriorImportRef`), not an error.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// File unreadable, empty, or missing a header row.
    #[error("analysis failed for {file}: {reason}")]
    Analysis { file: String, reason: String },

    /// Mapping does not line up with the columns seen at analysis time.
    #[error("mapping error for {file}: {reason}")]
    Mapping { file: String, reason: String },

    /// A record or staged entry is missing a required field.
    #[error("validation error: {0}")]
    Validation(String),

    /// A file may be committed at most once.
    #[error("import {0} has already been committed")]
    AlreadyCommitted(String),

    /// Artist catalog rejected an append (e.g. name already exists).
    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("database error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
