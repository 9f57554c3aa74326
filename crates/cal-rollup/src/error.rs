use cal_crypto::LinkError;
use cal_store::StoreError;

/// Errors from the rollup engine.
#[derive(Debug, thiserror::Error)]
pub enum RollupError {
    #[error("invalid rollup configuration: {0}")]
    InvalidConfig(String),

    /// A page about to be sealed into a chapter does not link correctly.
    #[error("cannot roll up page {index}: {reason}")]
    BrokenChain { index: u64, reason: String },

    /// A page or chapter inside a closed range is missing from the store.
    #[error("missing {kind} {ordinal} while rolling up")]
    Missing { kind: &'static str, ordinal: u64 },

    #[error("rollup lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<LinkError> for RollupError {
    fn from(e: LinkError) -> Self {
        Self::BrokenChain {
            index: e.index(),
            reason: e.to_string(),
        }
    }
}

pub type RollupResult<T> = Result<T, RollupError>;
