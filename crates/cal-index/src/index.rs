//! The incrementally maintained postings behind [`QueryIndex`].
//!
//! Pages are applied strictly in index order. A page observed ahead of a
//! gap (a concurrent appender finished first) is parked until the gap
//! fills, so postings lists stay sorted without ever being re-sorted.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use cal_store::LedgerStore;
use cal_types::{Page, Timestamp};

use crate::error::{IndexError, IndexResult};
use crate::query::{Query, QueryResult, TimeRange};

/// Index settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Width of a time bucket in milliseconds.
    pub time_bucket_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            time_bucket_ms: 60 * 60 * 1000,
        }
    }
}

impl IndexConfig {
    pub fn validate(&self) -> IndexResult<()> {
        if self.time_bucket_ms == 0 {
            return Err(IndexError::InvalidConfig(
                "time_bucket_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// What the index keeps about one page.
#[derive(Clone, Debug)]
struct Entry {
    index: u64,
    timestamp: Timestamp,
    action_type: String,
    author_identity: String,
}

impl From<&Page> for Entry {
    fn from(page: &Page) -> Self {
        Self {
            index: page.index,
            timestamp: page.timestamp,
            action_type: page.action_type.clone(),
            author_identity: page.author_identity.clone(),
        }
    }
}

#[derive(Default)]
struct Postings {
    /// Every page up to here has been applied.
    through: u64,
    by_action: HashMap<String, Vec<u64>>,
    by_author: HashMap<String, Vec<u64>>,
    by_bucket: BTreeMap<u64, Vec<u64>>,
    /// Timestamp of page `i` at position `i - 1`.
    timestamps: Vec<Timestamp>,
    parked: BTreeMap<u64, Entry>,
}

impl Postings {
    fn insert(&mut self, entry: Entry, bucket_ms: u64) {
        if entry.index <= self.through {
            return;
        }
        if entry.index != self.through + 1 {
            self.parked.insert(entry.index, entry);
            return;
        }
        self.apply(entry, bucket_ms);
        while let Some(next) = self.parked.remove(&(self.through + 1)) {
            self.apply(next, bucket_ms);
        }
    }

    fn apply(&mut self, entry: Entry, bucket_ms: u64) {
        let index = entry.index;
        self.parked.remove(&index);
        self.by_action.entry(entry.action_type).or_default().push(index);
        self.by_author
            .entry(entry.author_identity)
            .or_default()
            .push(index);
        self.by_bucket
            .entry(entry.timestamp.physical_ms / bucket_ms)
            .or_default()
            .push(index);
        self.timestamps.push(entry.timestamp);
        self.through = index;
    }

    fn timestamp_of(&self, index: u64) -> Option<Timestamp> {
        let slot = usize::try_from(index.checked_sub(1)?).ok()?;
        self.timestamps.get(slot).copied()
    }

    /// Matching indices in ascending order.
    fn matching(&self, query: &Query, bucket_ms: u64) -> Vec<u64> {
        let mut candidates: Vec<Vec<u64>> = Vec::new();
        if let Some(action_type) = &query.action_type {
            candidates.push(self.by_action.get(action_type).cloned().unwrap_or_default());
        }
        if let Some(author) = &query.author_identity {
            candidates.push(self.by_author.get(author).cloned().unwrap_or_default());
        }
        if let Some(range) = &query.time_range {
            candidates.push(self.in_time_range(range, bucket_ms));
        }

        candidates.sort_by_key(Vec::len);
        let mut lists = candidates.into_iter();
        let Some(mut result) = lists.next() else {
            return (1..=self.through).collect();
        };
        for list in lists {
            result = intersect(&result, &list);
        }
        result
    }

    fn in_time_range(&self, range: &TimeRange, bucket_ms: u64) -> Vec<u64> {
        let first = range.start.physical_ms / bucket_ms;
        let last = range.end.physical_ms / bucket_ms;
        if range.start >= range.end {
            return Vec::new();
        }
        self.by_bucket
            .range(first..=last)
            .flat_map(|(_, indices)| indices.iter().copied())
            .filter(|&index| {
                self.timestamp_of(index)
                    .is_some_and(|timestamp| range.contains(&timestamp))
            })
            .collect()
    }
}

/// Intersect two ascending lists.
fn intersect(a: &[u64], b: &[u64]) -> Vec<u64> {
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

/// Secondary lookup structures over the committed pages of one store.
pub struct QueryIndex {
    store: Arc<dyn LedgerStore>,
    config: IndexConfig,
    postings: RwLock<Postings>,
}

impl std::fmt::Debug for QueryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let through = self.postings.read().map(|p| p.through).unwrap_or_default();
        f.debug_struct("QueryIndex")
            .field("config", &self.config)
            .field("through", &through)
            .finish()
    }
}

impl QueryIndex {
    /// An empty index. Call [`catch_up`](Self::catch_up) (or just query)
    /// to index what the store already holds.
    pub fn new(store: Arc<dyn LedgerStore>, config: IndexConfig) -> IndexResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            postings: RwLock::new(Postings::default()),
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    fn read(&self) -> IndexResult<RwLockReadGuard<'_, Postings>> {
        self.postings.read().map_err(|_| IndexError::LockPoisoned)
    }

    fn write(&self) -> IndexResult<RwLockWriteGuard<'_, Postings>> {
        self.postings.write().map_err(|_| IndexError::LockPoisoned)
    }

    /// Highest index up to which every page is indexed.
    pub fn indexed_through(&self) -> IndexResult<u64> {
        Ok(self.read()?.through)
    }

    /// Record a newly committed page. Pages may arrive out of order.
    pub fn observe(&self, page: &Page) -> IndexResult<()> {
        self.write()?
            .insert(Entry::from(page), self.config.time_bucket_ms);
        Ok(())
    }

    /// Index every committed page not yet indexed. Returns the new
    /// `indexed_through`.
    pub fn catch_up(&self) -> IndexResult<u64> {
        let from = self.indexed_through()? + 1;
        let head = self.store.head()?.index;
        if from > head {
            return Ok(from - 1);
        }

        let mut entries = Vec::new();
        for page in self.store.scan(from, head)? {
            entries.push(Entry::from(&page?));
        }
        let mut postings = self.write()?;
        for entry in entries {
            postings.insert(entry, self.config.time_bucket_ms);
        }
        debug!(from, through = postings.through, "index caught up");
        Ok(postings.through)
    }

    /// Drop everything and re-index the whole store.
    pub fn rebuild(&self) -> IndexResult<u64> {
        *self.write()? = Postings::default();
        let through = self.catch_up()?;
        info!(through, "index rebuilt");
        Ok(through)
    }

    /// Pages matching `query`, consistent with the store at call time.
    pub fn find(&self, query: &Query) -> IndexResult<QueryResult> {
        let indices = self.matching(query)?;
        Ok(QueryResult::new(Arc::clone(&self.store), indices))
    }

    /// Number of pages matching `query`, without reading any page.
    pub fn count(&self, query: &Query) -> IndexResult<u64> {
        Ok(self.matching(query)?.len() as u64)
    }

    fn matching(&self, query: &Query) -> IndexResult<Vec<u64>> {
        if let Some(range) = &query.time_range {
            TimeRange::new(range.start, range.end)?;
        }
        self.catch_up()?;
        Ok(self.read()?.matching(query, self.config.time_bucket_ms))
    }
}
