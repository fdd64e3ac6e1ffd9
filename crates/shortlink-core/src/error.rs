use thiserror::Error;

/// Errors related to validating input handed to the storage engine.
pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("invalid short code: {0}")]
    InvalidShortCode(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

/// Errors raised by a storage backend.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("no free short code after {attempts} attempts")]
    GenerationExhausted { attempts: u32 },
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
    #[error("storage i/o failed: {0}")]
    Io(String),
    #[error("storage is closed")]
    Closed,
}

impl From<std::io::Error> for StorageError {
    fn from(value: std::io::Error) -> Self {
        StorageError::Io(value.to_string())
    }
}

/// Errors surfaced by the storage facade to its callers.
///
/// `NotFound` and `NoRecordsForOwner` are lookup outcomes rather than
/// faults; callers usually turn them into a 404/204 style response.
#[derive(Debug, Clone, Error)]
pub enum ShortLinkError {
    #[error("short code not found: {0}")]
    NotFound(String),
    #[error("owner {0} has no short links")]
    NoRecordsForOwner(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid short code: {0}")]
    InvalidShortCode(String),
    #[error("no free short code after {attempts} attempts")]
    GenerationExhausted { attempts: u32 },
    #[error("operation cancelled: {0}")]
    Cancelled(String),
    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl From<CoreError> for ShortLinkError {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::InvalidShortCode(message) => Self::InvalidShortCode(message),
            CoreError::InvalidUrl(message) => Self::InvalidUrl(message),
        }
    }
}

impl From<StorageError> for ShortLinkError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::GenerationExhausted { attempts } => Self::GenerationExhausted { attempts },
            other => Self::Storage(other),
        }
    }
}
