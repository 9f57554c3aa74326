//! The store header: the single commit point of a [`FileStore`](crate::FileStore).
//!
//! Log bytes past the lengths recorded here were never committed and are
//! cut off on open. The header is replaced atomically:
//! 1. write a temp file
//! 2. fsync it
//! 3. rename over the old header
//! 4. fsync the directory

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use cal_types::{Digest, Head, Timestamp};

use crate::error::{StoreError, StoreResult};

pub const HEADER_FILE_NAME: &str = "HEADER";
const HEADER_TEMP_NAME: &str = "HEADER.tmp";
const FORMAT_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub version: u32,
    pub head_index: u64,
    pub head_hash: Digest,
    pub head_timestamp: Timestamp,
    /// Committed length of `pages.log` in bytes.
    pub pages_log_len: u64,
    /// Committed length of `rollups.log` in bytes.
    pub rollups_log_len: u64,
    /// Last page covered by a committed chapter.
    pub rollup_cursor_pages: u64,
    /// Last chapter covered by a committed book.
    pub rollup_cursor_chapters: u64,
    /// Number of committed chapters.
    pub chapters: u64,
    /// Number of committed books.
    pub books: u64,
}

impl Header {
    pub fn empty() -> Self {
        let genesis = Head::genesis();
        Self {
            version: FORMAT_VERSION,
            head_index: genesis.index,
            head_hash: genesis.hash,
            head_timestamp: genesis.timestamp,
            pages_log_len: 0,
            rollups_log_len: 0,
            rollup_cursor_pages: 0,
            rollup_cursor_chapters: 0,
            chapters: 0,
            books: 0,
        }
    }

    pub fn head(&self) -> Head {
        Head {
            index: self.head_index,
            hash: self.head_hash,
            timestamp: self.head_timestamp,
        }
    }

    pub fn set_head(&mut self, head: &Head) {
        self.head_index = head.index;
        self.head_hash = head.hash;
        self.head_timestamp = head.timestamp;
    }

    pub fn path(dir: &Path) -> PathBuf {
        dir.join(HEADER_FILE_NAME)
    }

    /// Read the header in `dir`, or `None` for a fresh directory.
    pub fn load(dir: &Path) -> StoreResult<Option<Self>> {
        let path = Self::path(dir);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read(&path)?;
        let header: Self = serde_json::from_slice(&content).map_err(|e| StoreError::CorruptRecord {
            index: None,
            reason: format!("unreadable store header: {e}"),
        })?;
        if header.version != FORMAT_VERSION {
            return Err(StoreError::CorruptRecord {
                index: None,
                reason: format!("unsupported store format version {}", header.version),
            });
        }
        Ok(Some(header))
    }

    /// Atomically replace the header in `dir` and make the rename durable.
    ///
    /// With `durable` unset the fsyncs are skipped; the rename still keeps
    /// the header whole.
    pub fn store(&self, dir: &Path, durable: bool) -> StoreResult<()> {
        self.replace(dir, durable)?;
        if durable {
            sync_dir(dir)?;
        }
        Ok(())
    }

    /// Write, fsync and rename the new header into place.
    ///
    /// Once this returns `Ok` the new header is the one every later open
    /// reads, whether or not the directory entry has reached the disk yet.
    /// An `Err` leaves the previous header in place.
    pub fn replace(&self, dir: &Path, durable: bool) -> StoreResult<()> {
        let content =
            serde_json::to_vec_pretty(self).map_err(|e| StoreError::Serialization(e.to_string()))?;

        let temp = dir.join(HEADER_TEMP_NAME);
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp)?;
        file.write_all(&content)?;
        if durable {
            file.sync_all()?;
        }
        drop(file);

        fs::rename(&temp, Self::path(dir))?;
        Ok(())
    }
}

/// Flush directory entries (the header rename) of `dir` to disk.
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

impl Default for Header {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn absent_header_loads_as_none() {
        let tmp = TempDir::new().unwrap();
        assert!(Header::load(tmp.path()).unwrap().is_none());
    }

    #[test]
    fn store_then_load() {
        let tmp = TempDir::new().unwrap();
        let mut header = Header::empty();
        header.set_head(&Head {
            index: 12,
            hash: Digest::from_hash([3; 32]),
            timestamp: Timestamp::new(77, 1),
        });
        header.pages_log_len = 4_096;
        header.store(tmp.path(), true).unwrap();

        let loaded = Header::load(tmp.path()).unwrap().unwrap();
        assert_eq!(loaded, header);
        assert_eq!(loaded.head().index, 12);
        assert!(!tmp.path().join(HEADER_TEMP_NAME).exists());
    }

    #[test]
    fn replacing_keeps_only_the_latest() {
        let tmp = TempDir::new().unwrap();
        let mut header = Header::empty();
        header.store(tmp.path(), false).unwrap();
        header.chapters = 2;
        header.store(tmp.path(), false).unwrap();
        assert_eq!(Header::load(tmp.path()).unwrap().unwrap().chapters, 2);
    }

    #[test]
    fn replaced_header_is_read_back_without_a_directory_sync() {
        let tmp = TempDir::new().unwrap();
        Header::empty().store(tmp.path(), true).unwrap();

        let mut header = Header::empty();
        header.head_index = 3;
        header.replace(tmp.path(), true).unwrap();
        assert_eq!(Header::load(tmp.path()).unwrap().unwrap().head_index, 3);
    }

    #[test]
    fn failed_rename_keeps_the_previous_header() {
        let tmp = TempDir::new().unwrap();
        let mut header = Header::empty();
        header.chapters = 1;
        header.store(tmp.path(), false).unwrap();

        // A non-empty directory in the header's place makes the rename fail.
        fs::remove_file(Header::path(tmp.path())).unwrap();
        fs::create_dir(Header::path(tmp.path())).unwrap();
        fs::write(Header::path(tmp.path()).join("keep"), b"x").unwrap();

        header.chapters = 2;
        assert!(header.replace(tmp.path(), false).is_err());
        assert!(Header::path(tmp.path()).is_dir());
    }

    #[test]
    fn garbage_header_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        fs::write(Header::path(tmp.path()), b"{\"version\":").unwrap();
        assert!(matches!(
            Header::load(tmp.path()),
            Err(StoreError::CorruptRecord { .. })
        ));
    }
}
