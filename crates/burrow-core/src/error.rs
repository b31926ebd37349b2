use thiserror::Error;

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Failures of the underlying storage medium.
///
/// Expected outcomes such as an unknown code, a soft-deleted record or an
/// already shortened URL are not errors; see [`Lookup`](crate::Lookup) and
/// [`Insertion`](crate::Insertion).
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
    #[error("journal i/o failed: {0}")]
    Io(String),
    #[error("no free short code after {attempts} attempts")]
    CodeSpaceExhausted { attempts: usize },
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Errors surfaced by the shortener facade.
#[derive(Debug, Clone, Error)]
pub enum ShortenerError {
    #[error("invalid short code: {0}")]
    InvalidShortCode(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("delete queue is full")]
    QueueFull,
    #[error("delete worker is stopped")]
    WorkerStopped,
}
