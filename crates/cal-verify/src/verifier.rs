use std::sync::Arc;

use tracing::{debug, warn};

use cal_crypto::{AggregateHasher, ChainVerifier};
use cal_store::{LedgerStore, StoreError};
use cal_types::{Book, Chapter, CheckpointId, Digest, Head, Timestamp};

use crate::error::{VerifyError, VerifyResult};
use crate::report::{VerificationReport, VerifyScope, ViolationKind};

/// Recomputes hashes over the stored chain and its checkpoints.
///
/// Reads go through the store's read path only, so verification runs
/// concurrently with appends against the head observed when it started.
pub struct Verifier {
    store: Arc<dyn LedgerStore>,
}

/// Result of walking a run of pages.
enum Walk {
    Done { checked: u64, last: Head },
    Fault(VerificationReport),
}

impl Verifier {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Walk genesis to head recomputing every page hash, then check every
    /// committed chapter and book aggregate.
    pub fn verify_full(&self) -> VerifyResult<VerificationReport> {
        let scope = VerifyScope::Full;
        let head = self.store.head()?;
        let chapters: Vec<Chapter> = self
            .store
            .chapters()?
            .into_iter()
            .filter(|c| c.page_range.end <= head.index)
            .collect();
        if let Some(report) = check_chapter_tiling(scope, &chapters) {
            return Ok(log(report));
        }

        let (checked, last) = match self.walk(scope, Head::genesis(), 1, head.index, &chapters)? {
            Walk::Done { checked, last } => (checked, last),
            Walk::Fault(report) => return Ok(log(report)),
        };
        if last != head {
            return Ok(log(VerificationReport::page_fault(
                scope,
                checked,
                head.index,
                ViolationKind::HeadMismatch,
                format!(
                    "chain ends at {} ({}) but the head is {} ({})",
                    last.index,
                    last.hash.short_hex(),
                    head.index,
                    head.hash.short_hex()
                ),
            )));
        }

        let chapter_count = chapters.len() as u64;
        for book in self.store.books()? {
            if book.chapter_range.end > chapter_count {
                continue;
            }
            let report = self.check_book(scope, &book)?;
            if !report.ok {
                return Ok(log(report));
            }
        }

        Ok(log(VerificationReport::passed(scope, checked)))
    }

    /// Walk pages `from..=to` (clamped to the head), anchored on the stored
    /// hash of page `from - 1`.
    pub fn verify_range(&self, from: u64, to: u64) -> VerifyResult<VerificationReport> {
        if from == 0 || from > to {
            return Err(VerifyError::InvalidRange { from, to });
        }
        let to = to.min(self.store.head()?.index);
        let scope = VerifyScope::Range { from, to };
        if from > to {
            return Ok(VerificationReport::passed(scope, 0));
        }

        let anchor = if from == 1 {
            Head::genesis()
        } else {
            match self.store.get(from - 1) {
                Ok(Some(page)) => page.as_head(),
                Ok(None) => {
                    return Ok(log(VerificationReport::page_fault(
                        scope,
                        0,
                        from - 1,
                        ViolationKind::SequenceGap,
                        "anchor page is missing",
                    )))
                }
                Err(StoreError::CorruptRecord { index, reason }) => {
                    return Ok(log(VerificationReport::page_fault(
                        scope,
                        0,
                        index.unwrap_or(from - 1),
                        ViolationKind::CorruptRecord,
                        reason,
                    )))
                }
                Err(e) => return Err(e.into()),
            }
        };

        match self.walk(scope, anchor, from, to, &[])? {
            Walk::Done { checked, .. } => Ok(log(VerificationReport::passed(scope, checked))),
            Walk::Fault(report) => Ok(log(report)),
        }
    }

    /// Recheck a single chapter or book without replaying history.
    ///
    /// A chapter reads exactly the pages it covers, recomputing each page
    /// hash from its fields and then the aggregate. A book reads only its
    /// chapters' stored hashes.
    ///
    /// Returns `None` if no such checkpoint has been committed.
    pub fn verify_checkpoint(&self, id: CheckpointId) -> VerifyResult<Option<VerificationReport>> {
        let scope = VerifyScope::Checkpoint(id);
        let report = match id {
            CheckpointId::Chapter(n) => match self.store.chapter(n)? {
                Some(chapter) => self.check_chapter(scope, &chapter)?,
                None => return Ok(None),
            },
            CheckpointId::Book(n) => match self.store.book(n)? {
                Some(book) => self.check_book(scope, &book)?,
                None => return Ok(None),
            },
        };
        Ok(Some(log(report)))
    }

    fn walk(
        &self,
        scope: VerifyScope,
        anchor: Head,
        from: u64,
        to: u64,
        chapters: &[Chapter],
    ) -> VerifyResult<Walk> {
        let mut prev = anchor;
        let mut checked = 0u64;
        let mut pending = chapters.iter().peekable();
        let mut open: Option<(&Chapter, AggregateHasher)> = None;

        for item in self.store.scan(from, to)? {
            let page = match item {
                Ok(page) => page,
                Err(StoreError::CorruptRecord { index, reason }) => {
                    return Ok(Walk::Fault(VerificationReport::page_fault(
                        scope,
                        checked,
                        index.unwrap_or(prev.next_index()),
                        ViolationKind::CorruptRecord,
                        reason,
                    )));
                }
                Err(e) => return Err(e.into()),
            };
            if let Err(e) = ChainVerifier::check_link(&prev, &page) {
                return Ok(Walk::Fault(VerificationReport::from_link(scope, checked, &e)));
            }
            checked += 1;
            prev = page.as_head();

            if open.is_none() {
                open = pending
                    .next_if(|c| c.page_range.start == page.index)
                    .map(|c| (c, AggregateHasher::chapter(c.chapter_index, c.page_range)));
            }
            if let Some((chapter, mut aggregate)) = open.take() {
                aggregate.push(&page.hash);
                if page.index < chapter.page_range.end {
                    open = Some((chapter, aggregate));
                } else if let Some(report) =
                    compare_chapter(scope, checked, chapter, aggregate.finish(), prev.timestamp)
                {
                    return Ok(Walk::Fault(report));
                }
            }
        }

        let expected_last = if to >= from { to } else { anchor.index };
        if prev.index != expected_last {
            return Ok(Walk::Fault(VerificationReport::page_fault(
                scope,
                checked,
                prev.next_index(),
                ViolationKind::SequenceGap,
                format!("page {} is missing from the store", prev.next_index()),
            )));
        }
        Ok(Walk::Done {
            checked,
            last: prev,
        })
    }

    fn check_chapter(
        &self,
        scope: VerifyScope,
        chapter: &Chapter,
    ) -> VerifyResult<VerificationReport> {
        let range = chapter.page_range;
        let mut aggregate = AggregateHasher::chapter(chapter.chapter_index, range);
        let mut prev: Option<Head> = None;
        let mut checked = 0u64;

        for item in self.store.scan(range.start, range.end)? {
            let page = match item {
                Ok(page) => page,
                Err(StoreError::CorruptRecord { index, reason }) => {
                    return Ok(VerificationReport::page_fault(
                        scope,
                        checked,
                        index.unwrap_or(range.start + checked),
                        ViolationKind::CorruptRecord,
                        reason,
                    ));
                }
                Err(e) => return Err(e.into()),
            };
            // The first page is taken on its own word for its predecessor;
            // the aggregate pins it down.
            let anchor = prev.unwrap_or(Head {
                index: range.start - 1,
                hash: page.prev_hash,
                timestamp: page.timestamp,
            });
            if let Err(e) = ChainVerifier::check_link(&anchor, &page) {
                return Ok(VerificationReport::from_link(scope, checked, &e));
            }
            aggregate.push(&page.hash);
            checked += 1;
            prev = Some(page.as_head());
        }

        if checked != range.len() {
            return Ok(VerificationReport::checkpoint_fault(
                scope,
                checked,
                CheckpointId::Chapter(chapter.chapter_index),
                ViolationKind::RangeMismatch,
                format!("chapter covers {range} but only {checked} pages were found"),
            ));
        }
        let last_timestamp = prev.map_or(Timestamp::zero(), |h| h.timestamp);
        Ok(
            compare_chapter(scope, checked, chapter, aggregate.finish(), last_timestamp)
                .unwrap_or_else(|| VerificationReport::passed(scope, checked)),
        )
    }

    fn check_book(&self, scope: VerifyScope, book: &Book) -> VerifyResult<VerificationReport> {
        let id = CheckpointId::Book(book.book_index);
        let range = book.chapter_range;
        let mut aggregate = AggregateHasher::book(book.book_index, range);
        let mut previous: Option<Chapter> = None;

        for ordinal in range.start..=range.end {
            let Some(chapter) = self.store.chapter(ordinal)? else {
                return Ok(VerificationReport::checkpoint_fault(
                    scope,
                    aggregate.pushed(),
                    id,
                    ViolationKind::RangeMismatch,
                    format!("book covers {range} but chapter {ordinal} is missing"),
                ));
            };
            if let Some(prev) = &previous {
                if !prev.page_range.is_followed_by(&chapter.page_range) {
                    return Ok(VerificationReport::checkpoint_fault(
                        scope,
                        aggregate.pushed(),
                        id,
                        ViolationKind::RangeMismatch,
                        format!(
                            "chapter {} ({}) does not follow chapter {} ({})",
                            chapter.chapter_index,
                            chapter.page_range,
                            prev.chapter_index,
                            prev.page_range
                        ),
                    ));
                }
            }
            aggregate.push(&chapter.chapter_hash);
            previous = Some(chapter);
        }

        let checked = aggregate.pushed();
        if aggregate.finish() != Some(book.book_hash) {
            return Ok(VerificationReport::checkpoint_fault(
                scope,
                checked,
                id,
                ViolationKind::AggregateMismatch,
                format!(
                    "stored book hash {} does not match its chapters",
                    book.book_hash.short_hex()
                ),
            ));
        }
        if previous.map(|c| c.created_at) != Some(book.created_at) {
            return Ok(VerificationReport::checkpoint_fault(
                scope,
                checked,
                id,
                ViolationKind::AggregateMismatch,
                "book created_at does not match its last chapter",
            ));
        }
        Ok(VerificationReport::passed(scope, checked))
    }
}

fn compare_chapter(
    scope: VerifyScope,
    checked: u64,
    chapter: &Chapter,
    computed: Option<Digest>,
    last_timestamp: Timestamp,
) -> Option<VerificationReport> {
    let id = CheckpointId::Chapter(chapter.chapter_index);
    if computed != Some(chapter.chapter_hash) {
        return Some(VerificationReport::checkpoint_fault(
            scope,
            checked,
            id,
            ViolationKind::AggregateMismatch,
            format!(
                "stored chapter hash {} does not match pages {}",
                chapter.chapter_hash.short_hex(),
                chapter.page_range
            ),
        ));
    }
    if chapter.created_at != last_timestamp {
        return Some(VerificationReport::checkpoint_fault(
            scope,
            checked,
            id,
            ViolationKind::AggregateMismatch,
            "chapter created_at does not match its last page",
        ));
    }
    None
}

/// Committed chapters must be numbered from 1 and tile the chain from page 1.
fn check_chapter_tiling(scope: VerifyScope, chapters: &[Chapter]) -> Option<VerificationReport> {
    let mut next_start = 1;
    for (slot, chapter) in chapters.iter().enumerate() {
        let id = CheckpointId::Chapter(chapter.chapter_index);
        if chapter.chapter_index != slot as u64 + 1 || chapter.page_range.start != next_start {
            return Some(VerificationReport::checkpoint_fault(
                scope,
                0,
                id,
                ViolationKind::RangeMismatch,
                format!(
                    "chapter {} covers {} but should start at page {next_start}",
                    chapter.chapter_index, chapter.page_range
                ),
            ));
        }
        next_start = chapter.page_range.end + 1;
    }
    None
}

fn log(report: VerificationReport) -> VerificationReport {
    if report.ok {
        debug!(scope = ?report.scope, checked = report.checked, "verification passed");
    } else {
        warn!(scope = ?report.scope, %report, "verification failed");
    }
    report
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use cal_crypto::{codec, PageFields};
    use cal_rollup::{RollupConfig, RollupEngine};
    use cal_store::{
        CommitOutcome, InMemoryStore, PageIter, PageStore, RollupCursors, RollupStore, StoreResult,
    };
    use cal_types::{Page, Payload};
    use serde_json::json;

    use super::*;

    /// In-memory store whose reads can be tampered with and are logged.
    #[derive(Default)]
    struct TamperStore {
        inner: InMemoryStore,
        pages: Mutex<HashMap<u64, Page>>,
        corrupt: Mutex<HashSet<u64>>,
        chapters: Mutex<HashMap<u64, Chapter>>,
        fake_head: Mutex<Option<Head>>,
        reads: Mutex<Vec<u64>>,
    }

    impl TamperStore {
        fn tamper(&self, index: u64, edit: impl FnOnce(&mut Page)) {
            let mut page = self.inner.get(index).unwrap().unwrap();
            edit(&mut page);
            self.pages.lock().unwrap().insert(index, page);
        }

        fn reads(&self) -> Vec<u64> {
            std::mem::take(&mut *self.reads.lock().unwrap())
        }

        fn filter(&self, page: Page) -> StoreResult<Page> {
            self.reads.lock().unwrap().push(page.index);
            if self.corrupt.lock().unwrap().contains(&page.index) {
                return Err(StoreError::CorruptRecord {
                    index: Some(page.index),
                    reason: "checksum mismatch".into(),
                });
            }
            Ok(self
                .pages
                .lock()
                .unwrap()
                .get(&page.index)
                .cloned()
                .unwrap_or(page))
        }
    }

    impl PageStore for TamperStore {
        fn head(&self) -> StoreResult<Head> {
            match *self.fake_head.lock().unwrap() {
                Some(head) => Ok(head),
                None => self.inner.head(),
            }
        }

        fn try_append(&self, expected: &Head, page: Page) -> StoreResult<Page> {
            self.inner.try_append(expected, page)
        }

        fn get(&self, index: u64) -> StoreResult<Option<Page>> {
            self.inner.get(index)?.map(|p| self.filter(p)).transpose()
        }

        fn scan(&self, from: u64, to: u64) -> StoreResult<PageIter<'_>> {
            Ok(Box::new(
                self.inner.scan(from, to)?.map(move |p| self.filter(p?)),
            ))
        }
    }

    impl RollupStore for TamperStore {
        fn cursors(&self) -> StoreResult<RollupCursors> {
            self.inner.cursors()
        }

        fn commit_chapter(&self, chapter: &Chapter) -> StoreResult<CommitOutcome> {
            self.inner.commit_chapter(chapter)
        }

        fn commit_book(&self, book: &Book) -> StoreResult<CommitOutcome> {
            self.inner.commit_book(book)
        }

        fn chapter(&self, chapter_index: u64) -> StoreResult<Option<Chapter>> {
            if let Some(chapter) = self.chapters.lock().unwrap().get(&chapter_index) {
                return Ok(Some(chapter.clone()));
            }
            self.inner.chapter(chapter_index)
        }

        fn book(&self, book_index: u64) -> StoreResult<Option<Book>> {
            self.inner.book(book_index)
        }

        fn chapters(&self) -> StoreResult<Vec<Chapter>> {
            let overrides = self.chapters.lock().unwrap();
            Ok(self
                .inner
                .chapters()?
                .into_iter()
                .map(|c| overrides.get(&c.chapter_index).cloned().unwrap_or(c))
                .collect())
        }

        fn books(&self) -> StoreResult<Vec<Book>> {
            self.inner.books()
        }
    }

    fn append_n(store: &dyn LedgerStore, n: u64) {
        for _ in 0..n {
            let head = store.head().unwrap();
            let payload: Payload = [
                ("petition_id".to_string(), json!(head.index / 3)),
                ("signatures".to_string(), json!(head.index * 10)),
            ]
            .into_iter()
            .collect();
            let page = codec::seal(&PageFields {
                index: head.next_index(),
                timestamp: Timestamp::new(10_000 + head.index * 5, 0),
                action_type: "petition_signed",
                payload: &payload,
                author_identity: "citizen:44",
                prev_hash: head.hash,
            })
            .unwrap();
            store.try_append(&head, page).unwrap();
        }
    }

    /// A store with `pages` pages rolled into chapters of `per_chapter`
    /// and books of `per_book`, plus a verifier over it.
    fn setup(pages: u64, per_chapter: u64, per_book: u64) -> (Arc<TamperStore>, Verifier) {
        let store = Arc::new(TamperStore::default());
        append_n(store.as_ref(), pages);
        let shared: Arc<dyn LedgerStore> = store.clone();
        let config = RollupConfig {
            pages_per_chapter: per_chapter,
            chapters_per_book: per_book,
            auto: true,
        };
        RollupEngine::new(Arc::clone(&shared), config)
            .unwrap()
            .run()
            .unwrap();
        store.reads();
        (store, Verifier::new(shared))
    }

    #[test]
    fn clean_ledger_verifies() {
        let (_, verifier) = setup(35, 10, 2);
        let report = verifier.verify_full().unwrap();
        assert!(report.ok, "{report}");
        assert_eq!(report.checked, 35);
        assert!(verifier.verify_checkpoint(CheckpointId::Chapter(3)).unwrap().unwrap().ok);
        assert!(verifier.verify_checkpoint(CheckpointId::Book(1)).unwrap().unwrap().ok);
    }

    #[test]
    fn empty_ledger_verifies() {
        let (_, verifier) = setup(0, 10, 2);
        let report = verifier.verify_full().unwrap();
        assert!(report.ok);
        assert_eq!(report.checked, 0);
    }

    #[test]
    fn any_field_change_is_caught_at_that_index() {
        let edits: Vec<Box<dyn Fn(&mut Page)>> = vec![
            Box::new(|p: &mut Page| {
                p.payload.insert("signatures".into(), json!(1));
            }),
            Box::new(|p: &mut Page| {
                p.timestamp = Timestamp::new(p.timestamp.physical_ms + 1, 0);
            }),
            Box::new(|p: &mut Page| p.author_identity = "citizen:45".into()),
            Box::new(|p: &mut Page| p.action_type = "petition_withdrawn".into()),
        ];
        for edit in edits {
            let (store, verifier) = setup(12, 100, 10);
            store.tamper(7, |p| edit(p));
            let report = verifier.verify_full().unwrap();
            assert!(!report.ok);
            assert_eq!(report.first_bad_index, Some(7));
            assert_eq!(report.kind, Some(ViolationKind::HashMismatch));
            assert!(matches!(
                report.into_result(),
                Err(VerifyError::IntegrityViolation { index: 7, .. })
            ));
        }
    }

    #[test]
    fn resealed_page_breaks_the_next_link() {
        let (store, verifier) = setup(12, 100, 10);
        store.tamper(4, |p| {
            p.payload.insert("signatures".into(), json!(0));
            p.hash = codec::recompute_hash(p).unwrap();
        });
        let report = verifier.verify_full().unwrap();
        assert_eq!(report.first_bad_index, Some(5));
        assert_eq!(report.kind, Some(ViolationKind::BrokenLink));
    }

    #[test]
    fn unreadable_page_is_reported_as_corrupt() {
        let (store, verifier) = setup(6, 100, 10);
        store.corrupt.lock().unwrap().insert(3);
        let report = verifier.verify_full().unwrap();
        assert_eq!(report.first_bad_index, Some(3));
        assert_eq!(report.kind, Some(ViolationKind::CorruptRecord));
    }

    #[test]
    fn head_must_match_the_chain() {
        let (store, verifier) = setup(6, 100, 10);
        let mut head = store.inner.head().unwrap();
        head.hash = Digest::from_hash([0xab; 32]);
        *store.fake_head.lock().unwrap() = Some(head);
        let report = verifier.verify_full().unwrap();
        assert_eq!(report.kind, Some(ViolationKind::HeadMismatch));
        assert_eq!(report.first_bad_index, Some(6));
    }

    #[test]
    fn range_is_anchored_on_its_predecessor() {
        let (store, verifier) = setup(20, 100, 10);
        store.tamper(3, |p| {
            p.payload.insert("petition_id".into(), json!(-1));
        });

        assert!(verifier.verify_range(5, 10).unwrap().ok);
        let report = verifier.verify_range(1, 10).unwrap();
        assert_eq!(report.first_bad_index, Some(3));
        assert!(verifier.verify_range(4, 6).unwrap().ok);

        let clamped = verifier.verify_range(15, 1_000).unwrap();
        assert!(clamped.ok);
        assert_eq!(clamped.scope, VerifyScope::Range { from: 15, to: 20 });
        assert_eq!(clamped.checked, 6);
        assert_eq!(verifier.verify_range(25, 30).unwrap().checked, 0);
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        let (_, verifier) = setup(5, 100, 10);
        assert!(matches!(
            verifier.verify_range(0, 3),
            Err(VerifyError::InvalidRange { from: 0, to: 3 })
        ));
        assert!(verifier.verify_range(4, 2).is_err());
    }

    #[test]
    fn chapter_check_reads_only_its_own_pages() {
        let (store, verifier) = setup(30, 10, 10);
        store.tamper(13, |p| {
            p.payload.insert("signatures".into(), json!(999_999));
        });

        assert!(verifier.verify_checkpoint(CheckpointId::Chapter(1)).unwrap().unwrap().ok);
        store.reads();

        let report = verifier.verify_checkpoint(CheckpointId::Chapter(2)).unwrap().unwrap();
        assert!(!report.ok);
        assert_eq!(report.first_bad_index, Some(13));
        assert_eq!(report.kind, Some(ViolationKind::HashMismatch));
        assert!(store.reads().iter().all(|i| (11..=20).contains(i)));
    }

    #[test]
    fn resealed_last_page_fails_the_aggregate() {
        let (store, verifier) = setup(20, 10, 10);
        store.tamper(10, |p| {
            p.payload.insert("signatures".into(), json!(0));
            p.hash = codec::recompute_hash(p).unwrap();
        });
        let report = verifier.verify_checkpoint(CheckpointId::Chapter(1)).unwrap().unwrap();
        assert_eq!(report.kind, Some(ViolationKind::AggregateMismatch));
        assert_eq!(report.checkpoint, Some(CheckpointId::Chapter(1)));
        assert!(matches!(
            report.into_result(),
            Err(VerifyError::RollupInconsistency { .. })
        ));
    }

    #[test]
    fn tampered_chapter_hash_fails_chapter_book_and_full() {
        let (store, verifier) = setup(40, 10, 2);
        let mut chapter = store.inner.chapter(2).unwrap().unwrap();
        chapter.chapter_hash = Digest::from_hash([0x11; 32]);
        store.chapters.lock().unwrap().insert(2, chapter);

        let report = verifier.verify_checkpoint(CheckpointId::Chapter(2)).unwrap().unwrap();
        assert_eq!(report.kind, Some(ViolationKind::AggregateMismatch));

        let report = verifier.verify_checkpoint(CheckpointId::Book(1)).unwrap().unwrap();
        assert_eq!(report.kind, Some(ViolationKind::AggregateMismatch));
        assert_eq!(report.checkpoint, Some(CheckpointId::Book(1)));
        assert!(verifier.verify_checkpoint(CheckpointId::Book(2)).unwrap().unwrap().ok);

        let report = verifier.verify_full().unwrap();
        assert_eq!(report.checkpoint, Some(CheckpointId::Chapter(2)));
    }

    #[test]
    fn book_detects_non_tiling_chapters() {
        let (store, verifier) = setup(20, 10, 2);
        let mut chapter = store.inner.chapter(2).unwrap().unwrap();
        chapter.page_range = cal_types::IndexRange { start: 12, end: 20 };
        store.chapters.lock().unwrap().insert(2, chapter);
        let report = verifier.verify_checkpoint(CheckpointId::Book(1)).unwrap().unwrap();
        assert_eq!(report.kind, Some(ViolationKind::RangeMismatch));
    }

    #[test]
    fn unknown_checkpoint_is_absent() {
        let (_, verifier) = setup(5, 10, 2);
        assert_eq!(verifier.verify_checkpoint(CheckpointId::Chapter(1)).unwrap(), None);
        assert_eq!(verifier.verify_checkpoint(CheckpointId::Book(1)).unwrap(), None);
    }
}
