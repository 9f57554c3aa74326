use cal_crypto::CodecError;
use cal_index::IndexError;
use cal_rollup::RollupError;
use cal_store::StoreError;
use cal_types::CheckpointId;
use cal_verify::VerifyError;

/// Errors surfaced by the ledger facade.
///
/// Append conflicts never appear here: they are retried inside
/// [`Ledger::append`](crate::Ledger::append).
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// A stored page no longer matches its recomputed hash or link.
    #[error("integrity violation at index {index}: {reason}")]
    IntegrityViolation { index: u64, reason: String },

    /// A payload cannot be canonically encoded, or a stored record cannot
    /// be decoded.
    #[error("corrupt record{}: {reason}", index_suffix(*index))]
    CorruptRecord { index: Option<u64>, reason: String },

    /// A chapter or book hash does not match what it claims to cover.
    #[error("rollup inconsistency at {checkpoint}: {reason}")]
    RollupInconsistency {
        checkpoint: CheckpointId,
        reason: String,
    },

    #[error("{author} is not authorized to record {action_type}")]
    Unauthorized { author: String, action_type: String },

    /// The ledger is validating its tail and accepts no appends.
    #[error("ledger is recovering")]
    Recovering,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

fn index_suffix(index: Option<u64>) -> String {
    index.map(|i| format!(" at index {i}")).unwrap_or_default()
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::CorruptRecord { index, reason } => Self::CorruptRecord { index, reason },
            StoreError::IntegrityViolation { index, reason } => {
                Self::IntegrityViolation { index, reason }
            }
            StoreError::RollupInconsistency { checkpoint, reason } => {
                Self::RollupInconsistency { checkpoint, reason }
            }
            StoreError::Serialization(reason) => Self::CorruptRecord {
                index: None,
                reason,
            },
            StoreError::Io(e) => Self::Io(e),
            conflict @ StoreError::ConcurrentWriteConflict { .. } => {
                Self::Internal(conflict.to_string())
            }
            StoreError::LockPoisoned(what) => Self::Internal(format!("{what} lock poisoned")),
        }
    }
}

impl From<CodecError> for LedgerError {
    fn from(e: CodecError) -> Self {
        StoreError::from(e).into()
    }
}

impl From<RollupError> for LedgerError {
    fn from(e: RollupError) -> Self {
        match e {
            RollupError::InvalidConfig(msg) => Self::Config(msg),
            RollupError::BrokenChain { index, reason } => {
                Self::IntegrityViolation { index, reason }
            }
            RollupError::Missing {
                kind: "chapter",
                ordinal,
            } => Self::RollupInconsistency {
                checkpoint: CheckpointId::Chapter(ordinal),
                reason: "chapter is missing below the rollup cursor".into(),
            },
            RollupError::Missing { kind, ordinal } => Self::IntegrityViolation {
                index: ordinal,
                reason: format!("{kind} {ordinal} is missing below the rollup cursor"),
            },
            RollupError::LockPoisoned => Self::Internal("rollup lock poisoned".into()),
            RollupError::Store(e) => e.into(),
        }
    }
}

impl From<VerifyError> for LedgerError {
    fn from(e: VerifyError) -> Self {
        match e {
            VerifyError::IntegrityViolation { index, reason } => {
                Self::IntegrityViolation { index, reason }
            }
            VerifyError::RollupInconsistency { checkpoint, reason } => {
                Self::RollupInconsistency { checkpoint, reason }
            }
            invalid @ VerifyError::InvalidRange { .. } => {
                Self::InvalidArgument(invalid.to_string())
            }
            VerifyError::Store(e) => e.into(),
        }
    }
}

impl From<IndexError> for LedgerError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::InvalidConfig(msg) => Self::Config(msg),
            IndexError::InvalidQuery(msg) => Self::InvalidArgument(msg),
            IndexError::LockPoisoned => Self::Internal("index lock poisoned".into()),
            IndexError::Store(e) => e.into(),
        }
    }
}

impl From<toml::de::Error> for LedgerError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for LedgerError {
    fn from(e: toml::ser::Error) -> Self {
        Self::Config(e.to_string())
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
