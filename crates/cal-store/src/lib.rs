//! Append-only page store for the civic audit ledger.
//!
//! The store is the ledger's backbone: a gap-free, hash-linked sequence of
//! committed pages, plus the committed chapters and books produced by rollup.
//!
//! # Backends
//!
//! All backends implement [`PageStore`] and [`RollupStore`]:
//!
//! - [`InMemoryStore`] -- vector-backed store for tests and isolated ledgers
//! - [`FileStore`] -- append-only framed logs plus an atomically replaced header
//!
//! # Rules
//!
//! 1. Pages are immutable once committed; nothing is updated or deleted.
//! 2. Appends are compare-and-append against the expected head; a moved head
//!    is a [`StoreError::ConcurrentWriteConflict`] for the caller to retry.
//! 3. The head and rollup cursors move strictly after their data is durable.
//! 4. Readers never take the append lock.

pub mod error;
pub mod file;
pub mod frame;
pub mod header;
pub mod memory;
pub mod record;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use file::{FileStore, FileStoreConfig, SyncMode};
pub use header::Header;
pub use memory::InMemoryStore;
pub use record::{RollupRecord, StoredPage};
pub use traits::{CommitOutcome, LedgerStore, PageIter, PageStore, RollupCursors, RollupStore};
