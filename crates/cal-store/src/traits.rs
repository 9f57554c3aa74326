//! The [`PageStore`] and [`RollupStore`] traits defining the storage interface.
//!
//! Any backend implements both to back a ledger. The rules shared by every
//! backend (what a valid append or rollup commit looks like) live here so
//! that backends only differ in how they persist.

use cal_types::{Book, Chapter, CheckpointId, Head, Page};

use crate::error::{StoreError, StoreResult};

/// Lazy iterator over committed pages in ascending index order.
pub type PageIter<'a> = Box<dyn Iterator<Item = StoreResult<Page>> + Send + 'a>;

/// Storage backend for the page chain.
///
/// Implementations must be thread-safe (`Send + Sync`). Appends are
/// serialized by the store; reads never wait on an append in progress.
pub trait PageStore: Send + Sync {
    /// The last committed page's position, or the genesis head when empty.
    fn head(&self) -> StoreResult<Head>;

    /// Commit `page` if and only if the head is still `expected`.
    ///
    /// Fails with [`StoreError::ConcurrentWriteConflict`] when another
    /// append won the race. The page must already be sealed onto
    /// `expected`.
    fn try_append(&self, expected: &Head, page: Page) -> StoreResult<Page>;

    /// Read a page by index. Returns `Ok(None)` past the head or for 0.
    fn get(&self, index: u64) -> StoreResult<Option<Page>>;

    /// Lazily read pages `from..=to`, clamped to the head at call time.
    fn scan(&self, from: u64, to: u64) -> StoreResult<PageIter<'_>>;

    /// Number of committed pages.
    fn len(&self) -> StoreResult<u64> {
        Ok(self.head()?.index)
    }

    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// Progress of the rollup engine, derived from what is committed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RollupCursors {
    /// Last page covered by a committed chapter (0 if none).
    pub pages: u64,
    /// Last chapter covered by a committed book (0 if none).
    pub chapters: u64,
    pub chapter_count: u64,
    pub book_count: u64,
}

/// Result of committing a rollup record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// An identical record was already committed; nothing was written.
    AlreadyPresent,
}

/// Storage backend for chapters and books.
///
/// A commit writes the record and advances the matching cursor as one
/// durable step. Committing a record identical to one already present is
/// a no-op; committing a different record at the same ordinal is a
/// [`StoreError::RollupInconsistency`].
pub trait RollupStore: Send + Sync {
    fn cursors(&self) -> StoreResult<RollupCursors>;

    fn commit_chapter(&self, chapter: &Chapter) -> StoreResult<CommitOutcome>;

    fn commit_book(&self, book: &Book) -> StoreResult<CommitOutcome>;

    fn chapter(&self, chapter_index: u64) -> StoreResult<Option<Chapter>>;

    fn book(&self, book_index: u64) -> StoreResult<Option<Book>>;

    /// All committed chapters in ascending order.
    fn chapters(&self) -> StoreResult<Vec<Chapter>>;

    /// All committed books in ascending order.
    fn books(&self) -> StoreResult<Vec<Book>>;

    /// The most recently committed chapter.
    fn last_chapter(&self) -> StoreResult<Option<Chapter>> {
        let count = self.cursors()?.chapter_count;
        if count == 0 {
            return Ok(None);
        }
        self.chapter(count)
    }
}

/// A complete ledger backend.
pub trait LedgerStore: PageStore + RollupStore {}

impl<T: PageStore + RollupStore + ?Sized> LedgerStore for T {}

/// Check that `page` may be committed on top of `current`.
pub(crate) fn check_append(current: &Head, expected: &Head, page: &Page) -> StoreResult<()> {
    if current != expected {
        return Err(StoreError::ConcurrentWriteConflict {
            expected: expected.index,
            actual: current.index,
        });
    }
    if page.index != current.next_index() || page.prev_hash != current.hash {
        return Err(StoreError::IntegrityViolation {
            index: page.index,
            reason: format!("page does not extend head {}", current.index),
        });
    }
    if page.timestamp < current.timestamp {
        return Err(StoreError::IntegrityViolation {
            index: page.index,
            reason: format!(
                "timestamp {} precedes head timestamp {}",
                page.timestamp, current.timestamp
            ),
        });
    }
    Ok(())
}

/// Decide whether `chapter` is new, a duplicate, or inconsistent.
///
/// Returns `Some(AlreadyPresent)` for an identical duplicate and `None` when
/// the chapter should be written.
pub(crate) fn check_chapter(
    committed: &[Chapter],
    chapter: &Chapter,
    head_index: u64,
) -> StoreResult<Option<CommitOutcome>> {
    let id = CheckpointId::Chapter(chapter.chapter_index);
    if let Some(existing) = ordinal_slot(committed, chapter.chapter_index) {
        return if existing == chapter {
            Ok(Some(CommitOutcome::AlreadyPresent))
        } else {
            Err(inconsistency(id, "differs from the committed chapter"))
        };
    }
    if chapter.chapter_index != committed.len() as u64 + 1 {
        return Err(inconsistency(id, "chapter ordinal is out of sequence"));
    }
    let expected_start = committed.last().map_or(1, |c| c.page_range.end + 1);
    if chapter.page_range.start != expected_start {
        return Err(inconsistency(
            id,
            &format!("page range {} does not start at {expected_start}", chapter.page_range),
        ));
    }
    if chapter.page_range.end > head_index {
        return Err(inconsistency(
            id,
            &format!("page range {} extends past head {head_index}", chapter.page_range),
        ));
    }
    Ok(None)
}

/// Book counterpart of [`check_chapter`].
pub(crate) fn check_book(
    committed: &[Book],
    book: &Book,
    chapter_count: u64,
) -> StoreResult<Option<CommitOutcome>> {
    let id = CheckpointId::Book(book.book_index);
    if let Some(existing) = ordinal_slot(committed, book.book_index) {
        return if existing == book {
            Ok(Some(CommitOutcome::AlreadyPresent))
        } else {
            Err(inconsistency(id, "differs from the committed book"))
        };
    }
    if book.book_index != committed.len() as u64 + 1 {
        return Err(inconsistency(id, "book ordinal is out of sequence"));
    }
    let expected_start = committed.last().map_or(1, |b| b.chapter_range.end + 1);
    if book.chapter_range.start != expected_start {
        return Err(inconsistency(
            id,
            &format!("chapter range {} does not start at {expected_start}", book.chapter_range),
        ));
    }
    if book.chapter_range.end > chapter_count {
        return Err(inconsistency(
            id,
            &format!(
                "chapter range {} extends past committed chapter {chapter_count}",
                book.chapter_range
            ),
        ));
    }
    Ok(None)
}

/// Cursors implied by committed chapters and books.
pub(crate) fn cursors_of(chapters: &[Chapter], books: &[Book]) -> RollupCursors {
    RollupCursors {
        pages: chapters.last().map_or(0, |c| c.page_range.end),
        chapters: books.last().map_or(0, |b| b.chapter_range.end),
        chapter_count: chapters.len() as u64,
        book_count: books.len() as u64,
    }
}

/// The 1-based `ordinal` slot of `items`, if committed.
pub(crate) fn ordinal_slot<T>(items: &[T], ordinal: u64) -> Option<&T> {
    let slot = usize::try_from(ordinal.checked_sub(1)?).ok()?;
    items.get(slot)
}

fn inconsistency(checkpoint: CheckpointId, reason: &str) -> StoreError {
    StoreError::RollupInconsistency {
        checkpoint,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use cal_types::{Digest, IndexRange, Timestamp};

    use super::*;

    fn chapter(n: u64, start: u64, end: u64) -> Chapter {
        Chapter {
            chapter_index: n,
            page_range: IndexRange::new(start, end).unwrap(),
            chapter_hash: Digest::from_hash([n as u8; 32]),
            created_at: Timestamp::new(end, 0),
        }
    }

    #[test]
    fn conflict_when_head_moved() {
        let genesis = Head::genesis();
        let moved = Head {
            index: 1,
            hash: Digest::from_hash([1; 32]),
            timestamp: Timestamp::new(1, 0),
        };
        let page = Page {
            index: 1,
            timestamp: Timestamp::new(2, 0),
            action_type: "vote_cast".into(),
            payload: Default::default(),
            author_identity: "member:9".into(),
            prev_hash: genesis.hash,
            hash: Digest::from_hash([2; 32]),
        };
        let err = check_append(&moved, &genesis, &page).unwrap_err();
        assert!(err.is_conflict());
        assert!(check_append(&genesis, &genesis, &page).is_ok());
    }

    #[test]
    fn first_chapter_must_start_at_one() {
        assert!(check_chapter(&[], &chapter(1, 1, 100), 150).unwrap().is_none());
        assert!(check_chapter(&[], &chapter(1, 2, 100), 150).is_err());
    }

    #[test]
    fn chapters_must_tile_and_stay_below_head() {
        let committed = vec![chapter(1, 1, 100)];
        assert!(check_chapter(&committed, &chapter(2, 101, 200), 200).unwrap().is_none());
        assert!(check_chapter(&committed, &chapter(2, 102, 200), 200).is_err());
        assert!(check_chapter(&committed, &chapter(2, 101, 200), 150).is_err());
        assert!(check_chapter(&committed, &chapter(3, 101, 200), 200).is_err());
    }

    #[test]
    fn duplicate_is_idempotent_but_divergence_is_not() {
        let committed = vec![chapter(1, 1, 100)];
        assert_eq!(
            check_chapter(&committed, &chapter(1, 1, 100), 100).unwrap(),
            Some(CommitOutcome::AlreadyPresent)
        );
        let mut diverged = chapter(1, 1, 100);
        diverged.chapter_hash = Digest::from_hash([0xee; 32]);
        assert!(matches!(
            check_chapter(&committed, &diverged, 100),
            Err(StoreError::RollupInconsistency { checkpoint: CheckpointId::Chapter(1), .. })
        ));
    }

    #[test]
    fn cursors_follow_last_records() {
        let chapters = vec![chapter(1, 1, 100), chapter(2, 101, 200)];
        let cursors = cursors_of(&chapters, &[]);
        assert_eq!(cursors.pages, 200);
        assert_eq!(cursors.chapters, 0);
        assert_eq!(cursors.chapter_count, 2);
    }

    #[test]
    fn ordinal_zero_has_no_slot() {
        let chapters = vec![chapter(1, 1, 10)];
        assert!(ordinal_slot(&chapters, 0).is_none());
        assert!(ordinal_slot(&chapters, 1).is_some());
        assert!(ordinal_slot(&chapters, 2).is_none());
    }
}
