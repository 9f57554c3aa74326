//! Error types for the index crate.

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("invalid index configuration: {0}")]
    InvalidConfig(String),

    /// The query itself is malformed (e.g. an inverted time range).
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("index lock poisoned")]
    LockPoisoned,

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] cal_store::StoreError),
}

/// Convenience alias for index results.
pub type IndexResult<T> = Result<T, IndexError>;
