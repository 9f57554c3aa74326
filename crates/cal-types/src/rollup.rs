use std::fmt;

use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::error::TypeError;
use crate::temporal::Timestamp;

/// Inclusive, non-empty range of ordinals (`start..=end`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexRange {
    pub start: u64,
    pub end: u64,
}

impl IndexRange {
    pub fn new(start: u64, end: u64) -> Result<Self, TypeError> {
        if start == 0 || start > end {
            return Err(TypeError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, ordinal: u64) -> bool {
        self.start <= ordinal && ordinal <= self.end
    }

    /// Returns `true` if `next` starts immediately after this range.
    pub fn is_followed_by(&self, next: &IndexRange) -> bool {
        next.start == self.end + 1
    }
}

impl fmt::Display for IndexRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Rollup over a contiguous, non-overlapping range of pages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    /// Ordinal of this chapter, starting at 1.
    pub chapter_index: u64,
    pub page_range: IndexRange,
    /// Ordered aggregate over every page hash in `page_range`.
    pub chapter_hash: Digest,
    /// Timestamp of the last covered page.
    pub created_at: Timestamp,
}

/// Rollup over a contiguous, non-overlapping range of chapters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    /// Ordinal of this book, starting at 1.
    pub book_index: u64,
    pub chapter_range: IndexRange,
    /// Ordered aggregate over every chapter hash in `chapter_range`.
    pub book_hash: Digest,
    /// `created_at` of the last covered chapter.
    pub created_at: Timestamp,
}

/// Names a chapter or book whose aggregate can be checked on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckpointId {
    Chapter(u64),
    Book(u64),
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chapter(n) => write!(f, "chapter:{n}"),
            Self::Book(n) => write!(f, "book:{n}"),
        }
    }
}
