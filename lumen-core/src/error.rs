use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cannot decode image: {0}")]
    Decode(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("photo root missing: {0}")]
    PhotosRootMissing(PathBuf),

    #[error("a scan is already running")]
    ScanAlreadyRunning,

    #[error("operation cancelled")]
    Cancelled,

    #[error("external endpoint error: {0}")]
    External(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, IndexError>;

/// Classification of a stage body failure. Drives the worker's retry and
/// ledger policy: transient errors retry with backoff, everything else goes
/// terminal on the first occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// File temporarily unreadable, disk full, endpoint timeout. Retried.
    Transient,
    /// Corrupt or unsupported image data. Marked skipped, never retried.
    Decode,
    /// A declared input is absent (no GPS, no thumbnail). Skipped, silent.
    MissingPrecondition,
    /// The external endpoint is disabled or in cool-down. Skipped.
    ExternalDisabled,
    /// Cooperative stop; the ledger row is left pending.
    Cancelled,
}

impl IndexError {
    /// Map an error to its retry class. Database and unknown internal errors
    /// count as transient so a busy catalog does not poison ledger rows.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            IndexError::Decode(_) => FailureKind::Decode,
            IndexError::NotFound(_) => FailureKind::MissingPrecondition,
            IndexError::Cancelled => FailureKind::Cancelled,
            IndexError::External(_) => FailureKind::ExternalDisabled,
            _ => FailureKind::Transient,
        }
    }
}
