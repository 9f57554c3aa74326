use cal_types::{Head, Page};

use crate::codec;

/// Hash chain link checker.
///
/// A page links correctly onto a head when:
/// 1. its index is exactly `head.index + 1`
/// 2. its `prev_hash` equals the head's hash
/// 3. its stored hash equals the hash recomputed from its fields
/// 4. its timestamp is not earlier than the head's
pub struct ChainVerifier;

impl ChainVerifier {
    /// Check a single page against the head it claims to extend.
    pub fn check_link(prev: &Head, page: &Page) -> Result<(), LinkError> {
        let expected = prev.next_index();
        if page.index != expected {
            return Err(LinkError::SequenceGap {
                expected,
                found: page.index,
            });
        }

        if page.prev_hash != prev.hash {
            return Err(LinkError::BrokenLink { index: page.index });
        }

        let computed = codec::recompute_hash(page).map_err(|e| LinkError::Undecodable {
            index: page.index,
            reason: e.to_string(),
        })?;
        if computed != page.hash {
            return Err(LinkError::HashMismatch { index: page.index });
        }

        if page.timestamp < prev.timestamp {
            return Err(LinkError::TimestampRegression { index: page.index });
        }

        Ok(())
    }

    /// Verify a run of pages starting right after `anchor`.
    ///
    /// Returns the head established by the last page (or `anchor` for an
    /// empty run).
    pub fn verify_chain<'a>(
        anchor: Head,
        pages: impl IntoIterator<Item = &'a Page>,
    ) -> Result<Head, LinkError> {
        let mut head = anchor;
        for page in pages {
            Self::check_link(&head, page)?;
            head = page.as_head();
        }
        Ok(head)
    }
}

/// Errors from chain link checks.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("sequence gap: expected index {expected}, found {found}")]
    SequenceGap { expected: u64, found: u64 },

    #[error("broken link at index {index}: prev_hash does not match the preceding page")]
    BrokenLink { index: u64 },

    #[error("hash mismatch at index {index}: computed hash differs from stored")]
    HashMismatch { index: u64 },

    #[error("timestamp regression at index {index}")]
    TimestampRegression { index: u64 },

    #[error("page {index} cannot be encoded: {reason}")]
    Undecodable { index: u64, reason: String },
}

impl LinkError {
    /// Index of the first page found to be bad.
    pub fn index(&self) -> u64 {
        match self {
            Self::SequenceGap { expected, .. } => *expected,
            Self::BrokenLink { index }
            | Self::HashMismatch { index }
            | Self::TimestampRegression { index }
            | Self::Undecodable { index, .. } => *index,
        }
    }
}
