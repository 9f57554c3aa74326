use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cal_crypto::codec::{self, PageFields};
use cal_index::{Query, QueryIndex, QueryResult};
use cal_rollup::{RollupEngine, RollupReport};
use cal_store::{FileStore, InMemoryStore, LedgerStore};
use cal_types::{Book, Chapter, CheckpointId, Head, Page, Payload};
use cal_verify::{VerificationReport, Verifier};

use crate::auth::{AllowAll, Authorizer};
use crate::clock::LedgerClock;
use crate::config::{Backend, LedgerConfig};
use crate::error::{LedgerError, LedgerResult};

/// Lifecycle of a [`Ledger`].
///
/// A ledger starts `Recovering` and only becomes `Open` once its tail has
/// been validated against the latest chapter. Appends are refused while
/// recovering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerState {
    Recovering,
    Open,
}

impl LedgerState {
    fn from_u8(v: u8) -> Self {
        if v == Self::Open as u8 {
            Self::Open
        } else {
            Self::Recovering
        }
    }
}

impl fmt::Display for LedgerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recovering => write!(f, "recovering"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Consistent view of the whole ledger at one head.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub head: Head,
    pub pages: Vec<Page>,
    /// Chapters covering pages up to `head` only.
    pub chapters: Vec<Chapter>,
    /// Books covering the chapters above only.
    pub books: Vec<Book>,
}

/// Assembles a [`Ledger`] from a config and optional collaborators.
pub struct LedgerBuilder {
    config: LedgerConfig,
    store: Option<Arc<dyn LedgerStore>>,
    authorizer: Arc<dyn Authorizer>,
    clock: LedgerClock,
}

impl LedgerBuilder {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config,
            store: None,
            authorizer: Arc::new(AllowAll),
            clock: LedgerClock::new(),
        }
    }

    /// Use `store` instead of the backend named in the config.
    pub fn store(mut self, store: Arc<dyn LedgerStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn clock(mut self, clock: LedgerClock) -> Self {
        self.clock = clock;
        self
    }

    /// Open the store, recover, and return an open ledger.
    ///
    /// Fails with [`LedgerError::IntegrityViolation`] if the tail does not
    /// validate; no ledger is returned in that case.
    pub fn open(self) -> LedgerResult<Ledger> {
        self.config.validate()?;
        let store = match self.store {
            Some(store) => store,
            None => open_backend(&self.config)?,
        };

        let ledger = Ledger {
            index: QueryIndex::new(Arc::clone(&store), self.config.index.clone())?,
            rollup: RollupEngine::new(Arc::clone(&store), self.config.rollup.clone())?,
            verifier: Verifier::new(Arc::clone(&store)),
            store,
            config: self.config,
            authorizer: self.authorizer,
            clock: self.clock,
            state: AtomicU8::new(LedgerState::Recovering as u8),
        };
        ledger.recover()?;
        Ok(ledger)
    }
}

fn open_backend(config: &LedgerConfig) -> LedgerResult<Arc<dyn LedgerStore>> {
    match config.storage.backend {
        Backend::Memory => Ok(Arc::new(InMemoryStore::new())),
        Backend::File => {
            let dir = config.storage.dir.as_deref().ok_or_else(|| {
                LedgerError::Config("storage.dir is required for the file backend".into())
            })?;
            let store = FileStore::open(dir, config.storage.file_store_config())?;
            info!(dir = %dir.display(), "file store opened");
            Ok(Arc::new(store))
        }
    }
}

/// The audit ledger: the single entry point for recording and reading
/// actions.
///
/// Construct one per store and share it (it is `Send + Sync`). Appends are
/// serialized; reads run concurrently with appends and with each other.
///
/// ```
/// use cal_ledger::{Ledger, LedgerConfig, Query};
/// use serde_json::json;
///
/// let ledger = Ledger::in_memory(LedgerConfig::default()).unwrap();
/// let page = ledger
///     .append_serialize("petition_signed", &json!({"petition": "p-4"}), "member:12")
///     .unwrap();
/// assert_eq!(page.index, 1);
///
/// let found = ledger.find(&Query::new().author("member:12")).unwrap();
/// assert_eq!(found.indices(), &[1]);
/// assert!(ledger.verify(None).unwrap().ok);
/// ```
pub struct Ledger {
    pub(crate) store: Arc<dyn LedgerStore>,
    pub(crate) config: LedgerConfig,
    pub(crate) authorizer: Arc<dyn Authorizer>,
    pub(crate) clock: LedgerClock,
    pub(crate) index: QueryIndex,
    pub(crate) rollup: RollupEngine,
    pub(crate) verifier: Verifier,
    pub(crate) state: AtomicU8,
}

impl Ledger {
    pub fn builder(config: LedgerConfig) -> LedgerBuilder {
        LedgerBuilder::new(config)
    }

    /// Open the backend named in `config`.
    pub fn open(config: LedgerConfig) -> LedgerResult<Self> {
        LedgerBuilder::new(config).open()
    }

    /// An isolated ledger that keeps everything in memory, whatever
    /// backend `config` names.
    pub fn in_memory(config: LedgerConfig) -> LedgerResult<Self> {
        LedgerBuilder::new(config)
            .store(Arc::new(InMemoryStore::new()))
            .open()
    }

    pub fn with_store(store: Arc<dyn LedgerStore>, config: LedgerConfig) -> LedgerResult<Self> {
        LedgerBuilder::new(config).store(store).open()
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn state(&self) -> LedgerState {
        LedgerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: LedgerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Record one action.
    ///
    /// The page is authorized, sealed onto the current head and committed.
    /// If another append wins the race, the page is resealed onto the new
    /// head and committed again, so callers never see a conflict.
    ///
    /// Fails with [`LedgerError::Unauthorized`] or
    /// [`LedgerError::CorruptRecord`] before anything is written.
    pub fn append(
        &self,
        action_type: &str,
        payload: Payload,
        author_identity: &str,
    ) -> LedgerResult<Page> {
        if self.state() != LedgerState::Open {
            return Err(LedgerError::Recovering);
        }
        if !self.authorizer.authorize(author_identity, action_type) {
            return Err(LedgerError::Unauthorized {
                author: author_identity.to_string(),
                action_type: action_type.to_string(),
            });
        }

        let mut conflicts = 0u32;
        let page = loop {
            let head = self.store.head()?;
            let sealed = codec::seal(&PageFields {
                index: head.next_index(),
                timestamp: self.clock.tick_after(head.timestamp)?,
                action_type,
                payload: &payload,
                author_identity,
                prev_hash: head.hash,
            })?;
            match self.store.try_append(&head, sealed) {
                Ok(page) => break page,
                Err(e) if e.is_conflict() => {
                    conflicts += 1;
                    debug!(conflicts, error = %e, "append lost the race, resealing");
                }
                Err(e) => return Err(e.into()),
            }
        };
        debug!(
            index = page.index,
            action_type,
            author = author_identity,
            hash = %page.hash.short_hex(),
            "page appended"
        );

        // The index catches up from the store on the next query anyway.
        if let Err(e) = self.index.observe(&page) {
            warn!(index = page.index, error = %e, "index update failed");
        }
        // Never wait on a rollup already in progress; it or a later one
        // closes whatever this page completes.
        if self.config.rollup.auto {
            if let Err(e) = self.rollup.try_run() {
                warn!(index = page.index, error = %e, "auto-rollup failed");
            }
        }
        Ok(page)
    }

    /// Record an action whose payload is any value serializing to a JSON
    /// object.
    pub fn append_serialize<T: Serialize + ?Sized>(
        &self,
        action_type: &str,
        payload: &T,
        author_identity: &str,
    ) -> LedgerResult<Page> {
        let payload = codec::payload_from_serialize(payload)?;
        self.append(action_type, payload, author_identity)
    }

    pub fn head(&self) -> LedgerResult<Head> {
        Ok(self.store.head()?)
    }

    /// The page at `index`, or `None` if there is none.
    pub fn get(&self, index: u64) -> LedgerResult<Option<Page>> {
        Ok(self.store.get(index)?)
    }

    /// Lazily read pages `from..=to`, clamped to the current head.
    pub fn iter(
        &self,
        from: u64,
        to: u64,
    ) -> LedgerResult<impl Iterator<Item = LedgerResult<Page>> + '_> {
        Ok(self.store.scan(from, to)?.map(|r| r.map_err(LedgerError::from)))
    }

    /// Every committed page, in index order.
    pub fn read_all(&self) -> LedgerResult<Vec<Page>> {
        let head = self.store.head()?;
        self.iter(1, head.index)?.collect()
    }

    /// Pages matching every criterion in `query`, ascending by index.
    pub fn find(&self, query: &Query) -> LedgerResult<QueryResult> {
        Ok(self.index.find(query)?)
    }

    pub fn count(&self, query: &Query) -> LedgerResult<u64> {
        Ok(self.index.count(query)?)
    }

    pub fn chapters(&self) -> LedgerResult<Vec<Chapter>> {
        Ok(self.store.chapters()?)
    }

    pub fn books(&self) -> LedgerResult<Vec<Book>> {
        Ok(self.store.books()?)
    }

    /// Pages, chapters and books as of one head.
    pub fn snapshot(&self) -> LedgerResult<Snapshot> {
        let head = self.store.head()?;
        let pages = self.iter(1, head.index)?.collect::<LedgerResult<Vec<_>>>()?;

        let mut chapters = self.store.chapters()?;
        chapters.retain(|c| c.page_range.end <= head.index);
        let covered = chapters.len() as u64;
        let mut books = self.store.books()?;
        books.retain(|b| b.chapter_range.end <= covered);

        Ok(Snapshot {
            head,
            pages,
            chapters,
            books,
        })
    }

    /// Close every chapter and book whose threshold has been reached.
    pub fn roll_up(&self) -> LedgerResult<RollupReport> {
        Ok(self.rollup.run()?)
    }

    /// Close every chapter whose page threshold has been reached.
    pub fn roll_pages(&self) -> LedgerResult<Vec<Chapter>> {
        Ok(self.rollup.roll_pages()?)
    }

    /// Close every book whose chapter threshold has been reached.
    pub fn roll_chapters(&self) -> LedgerResult<Vec<Book>> {
        Ok(self.rollup.roll_chapters()?)
    }

    /// Verify the whole ledger, or pages `from..=to` only.
    ///
    /// A detected fault is a report with `ok == false`, not an error; use
    /// [`VerificationReport::into_result`] to escalate it.
    pub fn verify(&self, range: Option<(u64, u64)>) -> LedgerResult<VerificationReport> {
        let report = match range {
            None => self.verifier.verify_full()?,
            Some((from, to)) => self.verifier.verify_range(from, to)?,
        };
        Ok(report)
    }

    /// Recheck one chapter or book without replaying the rest of history.
    ///
    /// Returns `None` if no such checkpoint exists yet.
    pub fn verify_checkpoint(
        &self,
        id: CheckpointId,
    ) -> LedgerResult<Option<VerificationReport>> {
        Ok(self.verifier.verify_checkpoint(id)?)
    }
}

impl fmt::Debug for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ledger")
            .field("state", &self.state())
            .field("head", &self.store.head().ok())
            .field("config", &self.config)
            .finish()
    }
}
