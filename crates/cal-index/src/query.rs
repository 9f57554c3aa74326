use std::sync::Arc;

use cal_store::{LedgerStore, PageIter};
use cal_types::{Page, Timestamp};

use crate::error::{IndexError, IndexResult};

/// Half-open time window `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeRange {
    pub fn new(start: Timestamp, end: Timestamp) -> IndexResult<Self> {
        if end < start {
            return Err(IndexError::InvalidQuery(format!(
                "time range ends ({end}) before it starts ({start})"
            )));
        }
        Ok(Self { start, end })
    }

    /// Window between two wall-clock millisecond instants.
    pub fn from_millis(start_ms: u64, end_ms: u64) -> IndexResult<Self> {
        Self::new(Timestamp::new(start_ms, 0), Timestamp::new(end_ms, 0))
    }

    pub fn contains(&self, timestamp: &Timestamp) -> bool {
        self.start <= *timestamp && *timestamp < self.end
    }
}

/// Lookup criteria. Every criterion that is set must match (AND); an
/// empty query matches every page.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Query {
    pub action_type: Option<String>,
    pub author_identity: Option<String>,
    pub time_range: Option<TimeRange>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn action_type(mut self, action_type: impl Into<String>) -> Self {
        self.action_type = Some(action_type.into());
        self
    }

    pub fn author(mut self, author_identity: impl Into<String>) -> Self {
        self.author_identity = Some(author_identity.into());
        self
    }

    pub fn within(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.action_type.is_none() && self.author_identity.is_none() && self.time_range.is_none()
    }
}

/// Matching page indices, resolved to pages lazily.
///
/// The match set is fixed when the query runs; [`iter`](Self::iter) can be
/// called any number of times and always yields the same pages in
/// ascending index order.
pub struct QueryResult {
    store: Arc<dyn LedgerStore>,
    indices: Vec<u64>,
}

impl QueryResult {
    pub(crate) fn new(store: Arc<dyn LedgerStore>, indices: Vec<u64>) -> Self {
        Self { store, indices }
    }

    pub fn indices(&self) -> &[u64] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Read the matching pages, one run of consecutive indices at a time.
    pub fn iter(&self) -> impl Iterator<Item = IndexResult<Page>> + '_ {
        runs(&self.indices).flat_map(move |(start, end)| {
            let pages: PageIter<'_> = match self.store.scan(start, end) {
                Ok(pages) => pages,
                Err(e) => Box::new(std::iter::once(Err(e))),
            };
            pages.map(|page| page.map_err(IndexError::from))
        })
    }

    pub fn pages(&self) -> IndexResult<Vec<Page>> {
        self.iter().collect()
    }
}

impl std::fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResult")
            .field("matches", &self.indices.len())
            .finish()
    }
}

/// Split ascending indices into inclusive runs of consecutive values.
fn runs(indices: &[u64]) -> impl Iterator<Item = (u64, u64)> + '_ {
    let mut rest = indices;
    std::iter::from_fn(move || {
        let (&start, tail) = rest.split_first()?;
        let mut end = start;
        let mut taken = 0;
        for &next in tail {
            if next != end + 1 {
                break;
            }
            end = next;
            taken += 1;
        }
        rest = &tail[taken..];
        Some((start, end))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_range_is_half_open() {
        let range = TimeRange::from_millis(100, 200).unwrap();
        assert!(range.contains(&Timestamp::new(100, 0)));
        assert!(range.contains(&Timestamp::new(199, 7)));
        assert!(!range.contains(&Timestamp::new(200, 0)));
        assert!(!range.contains(&Timestamp::new(99, 3)));
    }

    #[test]
    fn inverted_time_range_is_rejected() {
        assert!(matches!(
            TimeRange::from_millis(200, 100),
            Err(IndexError::InvalidQuery(_))
        ));
        assert!(TimeRange::from_millis(5, 5).is_ok());
    }

    #[test]
    fn builder_sets_criteria() {
        assert!(Query::new().is_empty());
        let q = Query::new().action_type("vote_cast").author("member:2");
        assert_eq!(q.action_type.as_deref(), Some("vote_cast"));
        assert_eq!(q.author_identity.as_deref(), Some("member:2"));
        assert!(!q.is_empty());
    }

    #[test]
    fn runs_split_on_gaps() {
        let runs: Vec<_> = runs(&[1, 2, 3, 7, 9, 10]).collect();
        assert_eq!(runs, vec![(1, 3), (7, 7), (9, 10)]);
        assert_eq!(super::runs(&[]).count(), 0);
    }
}
