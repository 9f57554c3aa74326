use std::fmt;

use serde::{Deserialize, Serialize};

use cal_crypto::LinkError;
use cal_types::CheckpointId;

use crate::error::VerifyError;

/// What a verification covered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerifyScope {
    Full,
    Range { from: u64, to: u64 },
    Checkpoint(CheckpointId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViolationKind {
    /// Stored hash differs from the hash recomputed from the page's fields.
    HashMismatch,
    /// `prev_hash` does not match the preceding page's hash.
    BrokenLink,
    /// A page is missing or out of place.
    SequenceGap,
    /// A page's timestamp is earlier than its predecessor's.
    TimestampRegression,
    /// The chain does not end at the recorded head.
    HeadMismatch,
    /// A stored record could not be read or decoded.
    CorruptRecord,
    /// A chapter or book hash differs from the recomputed aggregate.
    AggregateMismatch,
    /// A chapter or book does not cover the range it claims.
    RangeMismatch,
}

impl ViolationKind {
    /// Whether this kind is a fault in a rollup record rather than a page.
    pub fn is_rollup(&self) -> bool {
        matches!(self, Self::AggregateMismatch | Self::RangeMismatch)
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::HashMismatch => "hash mismatch",
            Self::BrokenLink => "broken link",
            Self::SequenceGap => "sequence gap",
            Self::TimestampRegression => "timestamp regression",
            Self::HeadMismatch => "head mismatch",
            Self::CorruptRecord => "corrupt record",
            Self::AggregateMismatch => "aggregate mismatch",
            Self::RangeMismatch => "range mismatch",
        };
        f.write_str(name)
    }
}

impl From<&LinkError> for ViolationKind {
    fn from(e: &LinkError) -> Self {
        match e {
            LinkError::SequenceGap { .. } => Self::SequenceGap,
            LinkError::BrokenLink { .. } => Self::BrokenLink,
            LinkError::HashMismatch { .. } => Self::HashMismatch,
            LinkError::TimestampRegression { .. } => Self::TimestampRegression,
            LinkError::Undecodable { .. } => Self::CorruptRecord,
        }
    }
}

/// Outcome of a verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub scope: VerifyScope,
    pub ok: bool,
    /// Index of the first bad page, when the fault is in a page.
    pub first_bad_index: Option<u64>,
    /// Chapter or book at fault, when the fault is in a rollup record.
    pub checkpoint: Option<CheckpointId>,
    pub kind: Option<ViolationKind>,
    pub reason: Option<String>,
    /// Number of pages (or chapters, for a book) examined.
    pub checked: u64,
}

impl VerificationReport {
    pub fn passed(scope: VerifyScope, checked: u64) -> Self {
        Self {
            scope,
            ok: true,
            first_bad_index: None,
            checkpoint: None,
            kind: None,
            reason: None,
            checked,
        }
    }

    /// A fault in page `index`.
    pub fn page_fault(
        scope: VerifyScope,
        checked: u64,
        index: u64,
        kind: ViolationKind,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            scope,
            ok: false,
            first_bad_index: Some(index),
            checkpoint: None,
            kind: Some(kind),
            reason: Some(reason.into()),
            checked,
        }
    }

    /// A fault in a chapter or book record.
    pub fn checkpoint_fault(
        scope: VerifyScope,
        checked: u64,
        checkpoint: CheckpointId,
        kind: ViolationKind,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            scope,
            ok: false,
            first_bad_index: None,
            checkpoint: Some(checkpoint),
            kind: Some(kind),
            reason: Some(reason.into()),
            checked,
        }
    }

    pub(crate) fn from_link(scope: VerifyScope, checked: u64, e: &LinkError) -> Self {
        Self::page_fault(scope, checked, e.index(), e.into(), e.to_string())
    }

    pub fn is_ok(&self) -> bool {
        self.ok
    }

    /// Surface a failed report as an error.
    pub fn into_result(self) -> Result<Self, VerifyError> {
        if self.ok {
            return Ok(self);
        }
        let reason = self.reason.unwrap_or_default();
        match (self.checkpoint, self.kind) {
            (Some(checkpoint), Some(kind)) if kind.is_rollup() => {
                Err(VerifyError::RollupInconsistency { checkpoint, reason })
            }
            _ => Err(VerifyError::IntegrityViolation {
                index: self.first_bad_index.unwrap_or_default(),
                reason,
            }),
        }
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ok {
            return write!(f, "ok ({} checked)", self.checked);
        }
        write!(f, "FAILED")?;
        if let Some(kind) = self.kind {
            write!(f, " [{kind}]")?;
        }
        if let Some(index) = self.first_bad_index {
            write!(f, " at index {index}")?;
        }
        if let Some(checkpoint) = self.checkpoint {
            write!(f, " at {checkpoint}")?;
        }
        if let Some(reason) = &self.reason {
            write!(f, ": {reason}")?;
        }
        Ok(())
    }
}
