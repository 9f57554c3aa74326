use cal_crypto::CodecError;
use cal_types::CheckpointId;

/// Errors from page and rollup store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The head moved between reading it and committing against it.
    #[error("concurrent write conflict: expected head {expected}, found {actual}")]
    ConcurrentWriteConflict { expected: u64, actual: u64 },

    /// A stored record failed its checksum or could not be decoded.
    #[error("corrupt record{}: {reason}", index_suffix(*index))]
    CorruptRecord { index: Option<u64>, reason: String },

    /// Persisted state contradicts itself (e.g. header vs. log contents).
    #[error("integrity violation at index {index}: {reason}")]
    IntegrityViolation { index: u64, reason: String },

    /// A rollup record conflicts with what is already committed.
    #[error("rollup inconsistency at {checkpoint}: {reason}")]
    RollupInconsistency {
        checkpoint: CheckpointId,
        reason: String,
    },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A store lock was poisoned by a panicking holder.
    #[error("store lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

fn index_suffix(index: Option<u64>) -> String {
    index.map(|i| format!(" at index {i}")).unwrap_or_default()
}

impl From<CodecError> for StoreError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::CorruptRecord(reason) => Self::CorruptRecord {
                index: None,
                reason,
            },
        }
    }
}

impl StoreError {
    /// Attach a page index to a corruption error that lacks one.
    pub fn at_index(self, at: u64) -> Self {
        match self {
            Self::CorruptRecord { index: None, reason } => Self::CorruptRecord {
                index: Some(at),
                reason,
            },
            other => other,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrentWriteConflict { .. })
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
