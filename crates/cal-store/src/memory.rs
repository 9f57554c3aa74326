use std::sync::{Arc, Mutex, RwLock};

use cal_types::{Book, Chapter, Head, Page};

use crate::error::{StoreError, StoreResult};
use crate::traits::{
    check_append, check_book, check_chapter, cursors_of, ordinal_slot, CommitOutcome, PageIter,
    PageStore, RollupCursors, RollupStore,
};

/// In-memory store for tests, isolated ledgers, and embedding.
///
/// Pages are shared behind `Arc` so scans clone a cheap snapshot of the
/// chain and never hold a lock while the caller iterates.
pub struct InMemoryStore {
    append: Mutex<()>,
    pages: RwLock<Vec<Arc<Page>>>,
    rollups: RwLock<RollupState>,
}

#[derive(Default)]
pub(crate) struct RollupState {
    pub(crate) chapters: Vec<Chapter>,
    pub(crate) books: Vec<Book>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            append: Mutex::new(()),
            pages: RwLock::new(Vec::new()),
            rollups: RwLock::new(RollupState::default()),
        }
    }

    fn read_pages(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, Vec<Arc<Page>>>> {
        self.pages
            .read()
            .map_err(|_| StoreError::LockPoisoned("page read lock"))
    }

    fn read_rollups(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, RollupState>> {
        self.rollups
            .read()
            .map_err(|_| StoreError::LockPoisoned("rollup read lock"))
    }

    fn write_rollups(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, RollupState>> {
        self.rollups
            .write()
            .map_err(|_| StoreError::LockPoisoned("rollup write lock"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PageStore for InMemoryStore {
    fn head(&self) -> StoreResult<Head> {
        Ok(self
            .read_pages()?
            .last()
            .map_or_else(Head::genesis, |page| page.as_head()))
    }

    fn try_append(&self, expected: &Head, page: Page) -> StoreResult<Page> {
        let _append = self
            .append
            .lock()
            .map_err(|_| StoreError::LockPoisoned("append lock"))?;
        check_append(&self.head()?, expected, &page)?;

        self.pages
            .write()
            .map_err(|_| StoreError::LockPoisoned("page write lock"))?
            .push(Arc::new(page.clone()));
        Ok(page)
    }

    fn get(&self, index: u64) -> StoreResult<Option<Page>> {
        Ok(ordinal_slot(&self.read_pages()?, index).map(|page| Page::clone(page)))
    }

    fn scan(&self, from: u64, to: u64) -> StoreResult<PageIter<'_>> {
        let pages = self.read_pages()?;
        let start = from.max(1);
        let end = to.min(pages.len() as u64);
        let snapshot: Vec<Arc<Page>> = if start > end {
            Vec::new()
        } else {
            pages[(start - 1) as usize..end as usize].to_vec()
        };
        Ok(Box::new(
            snapshot.into_iter().map(|page| Ok(Page::clone(&page))),
        ))
    }
}

impl RollupStore for InMemoryStore {
    fn cursors(&self) -> StoreResult<RollupCursors> {
        let state = self.read_rollups()?;
        Ok(cursors_of(&state.chapters, &state.books))
    }

    fn commit_chapter(&self, chapter: &Chapter) -> StoreResult<CommitOutcome> {
        let head_index = self.head()?.index;
        let mut state = self.write_rollups()?;
        if let Some(outcome) = check_chapter(&state.chapters, chapter, head_index)? {
            return Ok(outcome);
        }
        state.chapters.push(chapter.clone());
        Ok(CommitOutcome::Committed)
    }

    fn commit_book(&self, book: &Book) -> StoreResult<CommitOutcome> {
        let mut state = self.write_rollups()?;
        let chapter_count = state.chapters.len() as u64;
        if let Some(outcome) = check_book(&state.books, book, chapter_count)? {
            return Ok(outcome);
        }
        state.books.push(book.clone());
        Ok(CommitOutcome::Committed)
    }

    fn chapter(&self, chapter_index: u64) -> StoreResult<Option<Chapter>> {
        Ok(ordinal_slot(&self.read_rollups()?.chapters, chapter_index).cloned())
    }

    fn book(&self, book_index: u64) -> StoreResult<Option<Book>> {
        Ok(ordinal_slot(&self.read_rollups()?.books, book_index).cloned())
    }

    fn chapters(&self) -> StoreResult<Vec<Chapter>> {
        Ok(self.read_rollups()?.chapters.clone())
    }

    fn books(&self) -> StoreResult<Vec<Book>> {
        Ok(self.read_rollups()?.books.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use cal_crypto::{codec, PageFields};
    use cal_types::{Digest, IndexRange, Payload, Timestamp};
    use serde_json::json;

    use super::*;

    fn sealed_on(head: &Head, action: &str) -> Page {
        let payload: Payload = [("ward".to_string(), json!(4))].into_iter().collect();
        codec::seal(&PageFields {
            index: head.next_index(),
            timestamp: Timestamp::new(head.timestamp.physical_ms + 1, 0),
            action_type: action,
            payload: &payload,
            author_identity: "member:12",
            prev_hash: head.hash,
        })
        .unwrap()
    }

    fn append(store: &InMemoryStore, action: &str) -> Page {
        let head = store.head().unwrap();
        store.try_append(&head, sealed_on(&head, action)).unwrap()
    }

    #[test]
    fn empty_store_has_genesis_head() {
        let store = InMemoryStore::new();
        assert!(store.head().unwrap().is_genesis());
        assert!(store.is_empty().unwrap());
        assert!(store.get(0).unwrap().is_none());
        assert!(store.get(1).unwrap().is_none());
    }

    #[test]
    fn append_and_read_back() {
        let store = InMemoryStore::new();
        let first = append(&store, "petition_signed");
        let second = append(&store, "petition_withdrawn");
        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.head().unwrap(), second.as_head());
        assert_eq!(store.get(1).unwrap().unwrap(), first);
        assert_eq!(second.prev_hash, first.hash);
    }

    #[test]
    fn stale_head_conflicts_without_writing() {
        let store = InMemoryStore::new();
        let stale = store.head().unwrap();
        append(&store, "vote_cast");
        let err = store
            .try_append(&stale, sealed_on(&stale, "vote_cast"))
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn scan_is_clamped_to_head() {
        let store = InMemoryStore::new();
        for _ in 0..5 {
            append(&store, "survey_submitted");
        }
        let indices: Vec<u64> = store
            .scan(2, 100)
            .unwrap()
            .map(|p| p.unwrap().index)
            .collect();
        assert_eq!(indices, vec![2, 3, 4, 5]);
        assert_eq!(store.scan(6, 9).unwrap().count(), 0);
        assert_eq!(store.scan(0, 1).unwrap().count(), 1);
    }

    #[test]
    fn scan_snapshot_ignores_later_appends() {
        let store = InMemoryStore::new();
        append(&store, "meeting_scheduled");
        let iter = store.scan(1, u64::MAX).unwrap();
        append(&store, "meeting_scheduled");
        assert_eq!(iter.count(), 1);
    }

    #[test]
    fn racing_appenders_never_fork_the_chain() {
        let store = Arc::new(InMemoryStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..25 {
                        loop {
                            let head = store.head().unwrap();
                            match store.try_append(&head, sealed_on(&head, "ballot_cast")) {
                                Ok(_) => break,
                                Err(e) if e.is_conflict() => continue,
                                Err(e) => panic!("unexpected error: {e}"),
                            }
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len().unwrap(), 200);
        let pages: Vec<Page> = store.scan(1, 200).unwrap().map(Result::unwrap).collect();
        for pair in pages.windows(2) {
            assert_eq!(pair[1].index, pair[0].index + 1);
            assert_eq!(pair[1].prev_hash, pair[0].hash);
        }
    }

    #[test]
    fn rollup_commits_are_idempotent() {
        let store = InMemoryStore::new();
        for _ in 0..4 {
            append(&store, "document_uploaded");
        }
        let chapter = Chapter {
            chapter_index: 1,
            page_range: IndexRange::new(1, 4).unwrap(),
            chapter_hash: Digest::from_hash([5; 32]),
            created_at: store.head().unwrap().timestamp,
        };
        assert_eq!(store.commit_chapter(&chapter).unwrap(), CommitOutcome::Committed);
        assert_eq!(
            store.commit_chapter(&chapter).unwrap(),
            CommitOutcome::AlreadyPresent
        );
        assert_eq!(store.chapters().unwrap(), vec![chapter.clone()]);
        assert_eq!(store.last_chapter().unwrap(), Some(chapter));
        assert_eq!(store.cursors().unwrap().pages, 4);

        let book = Book {
            book_index: 1,
            chapter_range: IndexRange::new(1, 2).unwrap(),
            book_hash: Digest::from_hash([6; 32]),
            created_at: Timestamp::new(1, 0),
        };
        assert!(matches!(
            store.commit_book(&book),
            Err(StoreError::RollupInconsistency { .. })
        ));
        assert!(store.books().unwrap().is_empty());
    }
}
