use cal_store::StoreError;
use cal_types::CheckpointId;

/// Errors from verification.
///
/// A failed check is not an error by itself: it is a
/// [`VerificationReport`](crate::VerificationReport) with `ok == false`.
/// These variants are what [`into_result`](crate::VerificationReport::into_result)
/// turns such a report into, plus failures to run the check at all.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("integrity violation at index {index}: {reason}")]
    IntegrityViolation { index: u64, reason: String },

    #[error("rollup inconsistency at {checkpoint}: {reason}")]
    RollupInconsistency {
        checkpoint: CheckpointId,
        reason: String,
    },

    #[error("invalid range {from}..={to}")]
    InvalidRange { from: u64, to: u64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type VerifyResult<T> = Result<T, VerifyError>;
