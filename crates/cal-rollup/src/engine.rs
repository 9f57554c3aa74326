use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use tracing::{debug, info};

use cal_crypto::{AggregateHasher, ChainVerifier};
use cal_store::{CommitOutcome, LedgerStore};
use cal_types::{Book, Chapter, Head, IndexRange, Timestamp};

use crate::config::RollupConfig;
use crate::error::{RollupError, RollupResult};

/// Records closed by one rollup run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RollupReport {
    pub chapters: Vec<Chapter>,
    pub books: Vec<Book>,
}

impl RollupReport {
    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty() && self.books.is_empty()
    }
}

/// Closes chapters and books as thresholds are crossed.
///
/// Runs are serialized by an internal lock. Each record is committed (and
/// its cursor advanced) as one store step before the next is built, so an
/// interrupted run resumes exactly where it stopped.
pub struct RollupEngine {
    store: Arc<dyn LedgerStore>,
    config: RollupConfig,
    running: Mutex<()>,
}

impl RollupEngine {
    pub fn new(store: Arc<dyn LedgerStore>, config: RollupConfig) -> RollupResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            running: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &RollupConfig {
        &self.config
    }

    /// Close every chapter and book whose threshold has been reached.
    pub fn run(&self) -> RollupResult<RollupReport> {
        let _running = self.lock()?;
        self.run_locked()
    }

    /// Like [`run`](Self::run), but returns `None` at once if another run
    /// is in progress. Whatever that run misses, the next one closes.
    pub fn try_run(&self) -> RollupResult<Option<RollupReport>> {
        match self.running.try_lock() {
            Ok(_running) => self.run_locked().map(Some),
            Err(TryLockError::WouldBlock) => {
                debug!("rollup already running, skipped");
                Ok(None)
            }
            Err(TryLockError::Poisoned(_)) => Err(RollupError::LockPoisoned),
        }
    }

    /// Close every chapter whose page threshold has been reached.
    pub fn roll_pages(&self) -> RollupResult<Vec<Chapter>> {
        let _running = self.lock()?;
        self.close_chapters()
    }

    /// Close every book whose chapter threshold has been reached.
    pub fn roll_chapters(&self) -> RollupResult<Vec<Book>> {
        let _running = self.lock()?;
        self.close_books()
    }

    fn lock(&self) -> RollupResult<MutexGuard<'_, ()>> {
        self.running.lock().map_err(|_| RollupError::LockPoisoned)
    }

    fn run_locked(&self) -> RollupResult<RollupReport> {
        let report = RollupReport {
            chapters: self.close_chapters()?,
            books: self.close_books()?,
        };
        if !report.is_empty() {
            info!(
                chapters = report.chapters.len(),
                books = report.books.len(),
                "rollup closed checkpoints"
            );
        }
        Ok(report)
    }

    fn close_chapters(&self) -> RollupResult<Vec<Chapter>> {
        let per_chapter = self.config.pages_per_chapter;
        let mut closed = Vec::new();
        loop {
            let cursors = self.store.cursors()?;
            let head = self.store.head()?;
            if head.index - cursors.pages < per_chapter {
                break;
            }
            let range = IndexRange {
                start: cursors.pages + 1,
                end: cursors.pages + per_chapter,
            };
            let chapter = self.build_chapter(cursors.chapter_count + 1, range)?;
            let outcome = self.store.commit_chapter(&chapter)?;
            debug!(
                chapter = chapter.chapter_index,
                pages = %range,
                hash = %chapter.chapter_hash.short_hex(),
                ?outcome,
                "chapter closed"
            );
            if outcome == CommitOutcome::Committed {
                closed.push(chapter);
            }
        }
        Ok(closed)
    }

    fn close_books(&self) -> RollupResult<Vec<Book>> {
        let per_book = self.config.chapters_per_book;
        let mut closed = Vec::new();
        loop {
            let cursors = self.store.cursors()?;
            if cursors.chapter_count - cursors.chapters < per_book {
                break;
            }
            let range = IndexRange {
                start: cursors.chapters + 1,
                end: cursors.chapters + per_book,
            };
            let book = self.build_book(cursors.book_count + 1, range)?;
            let outcome = self.store.commit_book(&book)?;
            debug!(
                book = book.book_index,
                chapters = %range,
                hash = %book.book_hash.short_hex(),
                ?outcome,
                "book closed"
            );
            if outcome == CommitOutcome::Committed {
                closed.push(book);
            }
        }
        Ok(closed)
    }

    /// Recompute chapter `chapter_index` over `page_range` from stored pages.
    ///
    /// Every page is link-checked on the way in, so a chapter never seals
    /// over a page that does not chain onto its predecessor.
    pub fn build_chapter(
        &self,
        chapter_index: u64,
        page_range: IndexRange,
    ) -> RollupResult<Chapter> {
        let mut prev = self.anchor_before(page_range.start)?;
        let mut aggregate = AggregateHasher::chapter(chapter_index, page_range);
        for page in self.store.scan(page_range.start, page_range.end)? {
            let page = page?;
            ChainVerifier::check_link(&prev, &page)?;
            aggregate.push(&page.hash);
            prev = page.as_head();
        }
        let chapter_hash = aggregate.finish().ok_or(RollupError::Missing {
            kind: "page",
            ordinal: prev.index + 1,
        })?;
        Ok(Chapter {
            chapter_index,
            page_range,
            chapter_hash,
            created_at: prev.timestamp,
        })
    }

    /// Recompute book `book_index` over `chapter_range` from stored chapters.
    pub fn build_book(&self, book_index: u64, chapter_range: IndexRange) -> RollupResult<Book> {
        let mut aggregate = AggregateHasher::book(book_index, chapter_range);
        let mut created_at = Timestamp::zero();
        for ordinal in chapter_range.start..=chapter_range.end {
            let chapter = self.store.chapter(ordinal)?.ok_or(RollupError::Missing {
                kind: "chapter",
                ordinal,
            })?;
            aggregate.push(&chapter.chapter_hash);
            created_at = chapter.created_at;
        }
        let book_hash = aggregate.finish().ok_or(RollupError::Missing {
            kind: "chapter",
            ordinal: chapter_range.end,
        })?;
        Ok(Book {
            book_index,
            chapter_range,
            book_hash,
            created_at,
        })
    }

    fn anchor_before(&self, index: u64) -> RollupResult<Head> {
        if index <= 1 {
            return Ok(Head::genesis());
        }
        self.store
            .get(index - 1)?
            .map(|page| page.as_head())
            .ok_or(RollupError::Missing {
                kind: "page",
                ordinal: index - 1,
            })
    }
}
