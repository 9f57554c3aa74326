//! Crash-safe file backend.
//!
//! Layout of a store directory:
//!
//! ```text
//! pages.log    framed bincode `StoredPage` records, one per page, in index order
//! rollups.log  framed bincode `RollupRecord`s, chapters and books interleaved
//! HEADER       JSON `Header`, replaced atomically; the commit point
//! ```
//!
//! An append writes its frame, then replaces the header, then publishes the
//! new head to readers. A crash before the header lands leaves bytes past
//! the committed length, which are cut off on the next open.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cal_types::{Book, Chapter, Head, Page};

use crate::error::{StoreError, StoreResult};
use crate::frame;
use crate::header::{self, Header};
use crate::memory::RollupState;
use crate::record::{RollupRecord, StoredPage};
use crate::traits::{
    check_append, check_book, check_chapter, cursors_of, ordinal_slot, CommitOutcome, PageIter,
    PageStore, RollupCursors, RollupStore,
};

pub const PAGES_LOG: &str = "pages.log";
pub const ROLLUPS_LOG: &str = "rollups.log";

/// Flush/sync strategy for the logs and header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` the log and the header on every commit.
    #[default]
    EveryWrite,
    /// Rely on OS page-cache buffering. Commits stay atomic but the last
    /// few may be lost on power failure.
    OsDefault,
}

/// Configuration for a [`FileStore`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStoreConfig {
    pub sync: SyncMode,
}

impl FileStoreConfig {
    fn durable(&self) -> bool {
        matches!(self.sync, SyncMode::EveryWrite)
    }
}

/// Append handle for one log file.
struct LogWriter {
    file: File,
    /// Committed length in bytes.
    len: u64,
}

impl LogWriter {
    /// Write a whole frame after the committed end. On failure the file is
    /// cut back so a retry starts from a clean end.
    fn write_frame(&mut self, payload: &[u8], durable: bool) -> StoreResult<u64> {
        let frame = frame::encode(payload)?;
        let result = self.file.write_all(&frame).and_then(|()| {
            if durable {
                self.file.sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(e) = result {
            self.rollback();
            return Err(e.into());
        }
        Ok(self.len + frame.len() as u64)
    }

    fn rollback(&mut self) {
        if let Err(e) = self.file.set_len(self.len) {
            warn!(len = self.len, error = %e, "failed to cut back uncommitted log bytes");
        }
    }
}

/// What readers see: the committed head and where each page lives.
struct Published {
    head: Head,
    /// Byte offset of page `i` at position `i - 1`.
    offsets: Vec<u64>,
}

/// Page and rollup store backed by append-only files.
pub struct FileStore {
    dir: PathBuf,
    config: FileStoreConfig,
    pages_writer: Mutex<LogWriter>,
    published: RwLock<Published>,
    rollups_writer: Mutex<LogWriter>,
    rollups: RwLock<RollupState>,
    header: Mutex<Header>,
}

impl FileStore {
    /// Open (or create) a store in `dir`, discarding uncommitted bytes.
    pub fn open(dir: impl AsRef<Path>, config: FileStoreConfig) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let header = match Header::load(&dir)? {
            Some(header) => header,
            None => {
                let header = Header::empty();
                header.store(&dir, config.durable())?;
                header
            }
        };

        let pages_path = dir.join(PAGES_LOG);
        let (pages_file, offsets) = open_log(&pages_path, header.pages_log_len)?;
        if offsets.len() as u64 != header.head_index {
            return Err(StoreError::IntegrityViolation {
                index: header.head_index,
                reason: format!(
                    "header records {} pages but the log holds {}",
                    header.head_index,
                    offsets.len()
                ),
            });
        }
        if let Some(&last) = offsets.last() {
            let stored = read_stored(&pages_path, last, header.head_index)?;
            if stored.index != header.head_index || stored.hash != header.head_hash {
                return Err(StoreError::IntegrityViolation {
                    index: header.head_index,
                    reason: "last page in the log does not match the header head".into(),
                });
            }
        }

        let rollups_path = dir.join(ROLLUPS_LOG);
        let (rollups_file, rollup_offsets) = open_log(&rollups_path, header.rollups_log_len)?;
        let rollups = load_rollups(&rollups_path, &rollup_offsets)?;
        let cursors = cursors_of(&rollups.chapters, &rollups.books);
        if cursors.chapter_count != header.chapters
            || cursors.book_count != header.books
            || cursors.pages != header.rollup_cursor_pages
            || cursors.chapters != header.rollup_cursor_chapters
        {
            return Err(StoreError::CorruptRecord {
                index: None,
                reason: format!(
                    "header records {} chapters and {} books (cursors {}/{}) \
                     but the log holds {} and {}",
                    header.chapters,
                    header.books,
                    header.rollup_cursor_pages,
                    header.rollup_cursor_chapters,
                    cursors.chapter_count,
                    cursors.book_count
                ),
            });
        }

        info!(
            dir = %dir.display(),
            head = header.head_index,
            chapters = header.chapters,
            books = header.books,
            "file store opened"
        );

        Ok(Self {
            pages_writer: Mutex::new(LogWriter {
                file: pages_file,
                len: header.pages_log_len,
            }),
            published: RwLock::new(Published {
                head: header.head(),
                offsets,
            }),
            rollups_writer: Mutex::new(LogWriter {
                file: rollups_file,
                len: header.rollups_log_len,
            }),
            rollups: RwLock::new(rollups),
            header: Mutex::new(header),
            dir,
            config,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pages_path(&self) -> PathBuf {
        self.dir.join(PAGES_LOG)
    }

    pub fn config(&self) -> &FileStoreConfig {
        &self.config
    }

    fn offset_of(&self, index: u64) -> StoreResult<Option<u64>> {
        let published = self
            .published
            .read()
            .map_err(|_| StoreError::LockPoisoned("published read lock"))?;
        Ok(ordinal_slot(&published.offsets, index).copied())
    }

    /// Replace the header with `update` applied. The in-memory copy only
    /// changes once the new header has been renamed into place.
    ///
    /// An `Err` means nothing was committed and the caller must cut its log
    /// back. After the rename the commit stands: a failed directory sync
    /// is logged, and the next durable commit syncs the directory again.
    fn commit_header(&self, update: impl FnOnce(&mut Header)) -> StoreResult<()> {
        let mut current = lock(&self.header, "header lock")?;
        let mut next = current.clone();
        update(&mut next);
        next.replace(&self.dir, self.config.durable())?;
        *current = next;
        drop(current);

        if self.config.durable() {
            if let Err(e) = header::sync_dir(&self.dir) {
                warn!(
                    dir = %self.dir.display(),
                    error = %e,
                    "header committed but directory sync failed"
                );
            }
        }
        Ok(())
    }

    fn read_rollups(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, RollupState>> {
        self.rollups
            .read()
            .map_err(|_| StoreError::LockPoisoned("rollup read lock"))
    }

    fn commit_rollup(
        &self,
        writer: &mut LogWriter,
        record: &RollupRecord,
    ) -> StoreResult<()> {
        let end = writer.write_frame(&record.to_bytes()?, self.config.durable())?;
        if let Err(e) = self.commit_header(|h| {
            h.rollups_log_len = end;
            match record {
                RollupRecord::Chapter(chapter) => {
                    h.chapters += 1;
                    h.rollup_cursor_pages = chapter.page_range.end;
                }
                RollupRecord::Book(book) => {
                    h.books += 1;
                    h.rollup_cursor_chapters = book.chapter_range.end;
                }
            }
        }) {
            writer.rollback();
            return Err(e);
        }
        writer.len = end;

        let mut state = self
            .rollups
            .write()
            .map_err(|_| StoreError::LockPoisoned("rollup write lock"))?;
        match record {
            RollupRecord::Chapter(chapter) => state.chapters.push(chapter.clone()),
            RollupRecord::Book(book) => state.books.push(book.clone()),
        }
        Ok(())
    }
}

impl PageStore for FileStore {
    fn head(&self) -> StoreResult<Head> {
        Ok(self
            .published
            .read()
            .map_err(|_| StoreError::LockPoisoned("published read lock"))?
            .head)
    }

    fn try_append(&self, expected: &Head, page: Page) -> StoreResult<Page> {
        let mut writer = lock(&self.pages_writer, "pages writer lock")?;
        check_append(&self.head()?, expected, &page)?;

        let offset = writer.len;
        let bytes = StoredPage::from_page(&page)?.to_bytes()?;
        let end = writer.write_frame(&bytes, self.config.durable())?;

        let head = page.as_head();
        if let Err(e) = self.commit_header(|h| {
            h.set_head(&head);
            h.pages_log_len = end;
        }) {
            writer.rollback();
            return Err(e);
        }
        writer.len = end;

        let mut published = self
            .published
            .write()
            .map_err(|_| StoreError::LockPoisoned("published write lock"))?;
        published.head = head;
        published.offsets.push(offset);
        drop(published);

        debug!(index = page.index, offset, "page committed");
        Ok(page)
    }

    fn get(&self, index: u64) -> StoreResult<Option<Page>> {
        let Some(offset) = self.offset_of(index)? else {
            return Ok(None);
        };
        let stored = read_stored(&self.pages_path(), offset, index)?;
        stored.into_page().map(Some)
    }

    fn scan(&self, from: u64, to: u64) -> StoreResult<PageIter<'_>> {
        let offsets: Vec<u64> = {
            let published = self
                .published
                .read()
                .map_err(|_| StoreError::LockPoisoned("published read lock"))?;
            let start = from.max(1);
            let end = to.min(published.offsets.len() as u64);
            if start > end {
                Vec::new()
            } else {
                published.offsets[(start - 1) as usize..end as usize].to_vec()
            }
        };
        let first = from.max(1);
        let file = if offsets.is_empty() {
            None
        } else {
            Some(File::open(self.pages_path())?)
        };
        Ok(Box::new(PageScan {
            file,
            offsets: offsets.into_iter(),
            next_index: first,
        }))
    }
}

/// Lazy page reader over a private file handle.
struct PageScan {
    file: Option<File>,
    offsets: std::vec::IntoIter<u64>,
    next_index: u64,
}

impl Iterator for PageScan {
    type Item = StoreResult<Page>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.offsets.next()?;
        let index = self.next_index;
        self.next_index += 1;
        let file = self.file.as_mut()?;
        Some(
            frame::read_at(file, offset)
                .and_then(|bytes| StoredPage::from_bytes(&bytes))
                .and_then(StoredPage::into_page)
                .map_err(|e| e.at_index(index)),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.offsets.size_hint()
    }
}

impl RollupStore for FileStore {
    fn cursors(&self) -> StoreResult<RollupCursors> {
        let state = self.read_rollups()?;
        Ok(cursors_of(&state.chapters, &state.books))
    }

    fn commit_chapter(&self, chapter: &Chapter) -> StoreResult<CommitOutcome> {
        let mut writer = lock(&self.rollups_writer, "rollups writer lock")?;
        let head_index = self.head()?.index;
        if let Some(outcome) = check_chapter(&self.read_rollups()?.chapters, chapter, head_index)? {
            return Ok(outcome);
        }
        self.commit_rollup(&mut writer, &RollupRecord::Chapter(chapter.clone()))?;
        debug!(chapter = chapter.chapter_index, pages = %chapter.page_range, "chapter committed");
        Ok(CommitOutcome::Committed)
    }

    fn commit_book(&self, book: &Book) -> StoreResult<CommitOutcome> {
        let mut writer = lock(&self.rollups_writer, "rollups writer lock")?;
        let outcome = {
            let state = self.read_rollups()?;
            check_book(&state.books, book, state.chapters.len() as u64)?
        };
        if let Some(outcome) = outcome {
            return Ok(outcome);
        }
        self.commit_rollup(&mut writer, &RollupRecord::Book(book.clone()))?;
        debug!(book = book.book_index, chapters = %book.chapter_range, "book committed");
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

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &'static str) -> StoreResult<MutexGuard<'a, T>> {
    mutex.lock().map_err(|_| StoreError::LockPoisoned(what))
}

/// Open a log for appending, cut it back to `committed` bytes, and index
/// its frames.
fn open_log(path: &Path, committed: u64) -> StoreResult<(File, Vec<u64>)> {
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?;
    let file_len = file.metadata()?.len();

    if file_len < committed {
        return Err(StoreError::CorruptRecord {
            index: None,
            reason: format!(
                "{} is {file_len} bytes, shorter than its committed length {committed}",
                path.display()
            ),
        });
    }
    if file_len > committed {
        warn!(
            path = %path.display(),
            committed,
            discarded = file_len - committed,
            "discarding uncommitted log tail"
        );
        file.set_len(committed)?;
        file.sync_all()?;
    }

    let offsets = frame::offsets(&mut file, committed)?;
    Ok((file, offsets))
}

fn read_stored(path: &Path, offset: u64, index: u64) -> StoreResult<StoredPage> {
    let mut file = File::open(path)?;
    frame::read_at(&mut file, offset)
        .and_then(|bytes| StoredPage::from_bytes(&bytes))
        .map_err(|e| e.at_index(index))
}

fn load_rollups(path: &Path, offsets: &[u64]) -> StoreResult<RollupState> {
    let mut state = RollupState::default();
    if offsets.is_empty() {
        return Ok(state);
    }
    let mut file = File::open(path)?;
    for &offset in offsets {
        match RollupRecord::from_bytes(&frame::read_at(&mut file, offset)?)? {
            RollupRecord::Chapter(chapter) => state.chapters.push(chapter),
            RollupRecord::Book(book) => state.books.push(book),
        }
    }
    Ok(state)
}
