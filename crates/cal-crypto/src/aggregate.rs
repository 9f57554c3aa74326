//! Ordered hash-of-hashes aggregate for chapters and books.
//!
//! ```text
//! aggregate = BLAKE3(domain ":" ordinal start end count h[start] .. h[end])
//! ```
//!
//! All integers are little-endian `u64`. The aggregate commits to the exact
//! sequence of member hashes and the range they claim to cover. It is not a
//! Merkle tree and offers no inclusion proofs.

use cal_types::{Digest, IndexRange};

use crate::hasher::ContentHasher;

/// Streaming aggregate builder.
pub struct AggregateHasher {
    hasher: blake3::Hasher,
    range: IndexRange,
    pushed: u64,
}

impl AggregateHasher {
    pub fn chapter(chapter_index: u64, page_range: IndexRange) -> Self {
        Self::new(ContentHasher::CHAPTER, chapter_index, page_range)
    }

    pub fn book(book_index: u64, chapter_range: IndexRange) -> Self {
        Self::new(ContentHasher::BOOK, book_index, chapter_range)
    }

    fn new(domain: ContentHasher, ordinal: u64, range: IndexRange) -> Self {
        let mut hasher = domain.start();
        hasher.update(&ordinal.to_le_bytes());
        hasher.update(&range.start.to_le_bytes());
        hasher.update(&range.end.to_le_bytes());
        hasher.update(&range.len().to_le_bytes());
        Self {
            hasher,
            range,
            pushed: 0,
        }
    }

    /// Feed the next member hash, in ascending ordinal order.
    pub fn push(&mut self, member: &Digest) {
        self.hasher.update(member.as_bytes());
        self.pushed += 1;
    }

    /// Number of member hashes fed so far.
    pub fn pushed(&self) -> u64 {
        self.pushed
    }

    /// Finish the aggregate.
    ///
    /// Returns `None` if the number of members fed does not match the range.
    pub fn finish(self) -> Option<Digest> {
        if self.pushed != self.range.len() {
            return None;
        }
        Some(Digest::from_hash(*self.hasher.finalize().as_bytes()))
    }
}

/// Aggregate a complete slice of page hashes into a chapter hash.
pub fn chapter_hash(
    chapter_index: u64,
    page_range: IndexRange,
    page_hashes: &[Digest],
) -> Option<Digest> {
    let mut agg = AggregateHasher::chapter(chapter_index, page_range);
    page_hashes.iter().for_each(|h| agg.push(h));
    agg.finish()
}

/// Aggregate a complete slice of chapter hashes into a book hash.
pub fn book_hash(
    book_index: u64,
    chapter_range: IndexRange,
    chapter_hashes: &[Digest],
) -> Option<Digest> {
    let mut agg = AggregateHasher::book(book_index, chapter_range);
    chapter_hashes.iter().for_each(|h| agg.push(h));
    agg.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hashes(n: u8) -> Vec<Digest> {
        (0..n).map(|i| Digest::from_hash([i; 32])).collect()
    }

    fn range(start: u64, end: u64) -> IndexRange {
        IndexRange::new(start, end).unwrap()
    }

    #[test]
    fn aggregate_is_deterministic() {
        let h = hashes(4);
        assert_eq!(
            chapter_hash(1, range(1, 4), &h),
            chapter_hash(1, range(1, 4), &h)
        );
    }

    #[test]
    fn order_matters() {
        let h = hashes(4);
        let mut reversed = h.clone();
        reversed.reverse();
        assert_ne!(
            chapter_hash(1, range(1, 4), &h),
            chapter_hash(1, range(1, 4), &reversed)
        );
    }

    #[test]
    fn range_and_ordinal_are_committed() {
        let h = hashes(4);
        let base = chapter_hash(1, range(1, 4), &h);
        assert_ne!(base, chapter_hash(2, range(1, 4), &h));
        assert_ne!(base, chapter_hash(1, range(5, 8), &h));
    }

    #[test]
    fn chapter_and_book_domains_differ() {
        let h = hashes(3);
        assert_ne!(
            chapter_hash(1, range(1, 3), &h),
            book_hash(1, range(1, 3), &h)
        );
    }

    #[test]
    fn member_count_must_match_range() {
        let h = hashes(3);
        assert!(chapter_hash(1, range(1, 4), &h).is_none());

        let mut agg = AggregateHasher::book(1, range(1, 2));
        agg.push(&h[0]);
        assert_eq!(agg.pushed(), 1);
        assert!(agg.finish().is_none());
    }

    #[test]
    fn streaming_matches_slice() {
        let h = hashes(5);
        let mut agg = AggregateHasher::chapter(3, range(11, 15));
        for digest in &h {
            agg.push(digest);
        }
        assert_eq!(agg.finish(), chapter_hash(3, range(11, 15), &h));
    }
}
