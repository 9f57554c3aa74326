use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::digest::Digest;
use crate::temporal::Timestamp;

/// Opaque caller-supplied payload.
///
/// The ledger never interprets it; it only hashes and stores it. Keys are
/// kept sorted (and `serde_json` objects nested inside are sorted too), which
/// is what makes the canonical encoding deterministic.
pub type Payload = BTreeMap<String, Value>;

/// One committed, immutable, hash-linked record of a single action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Position in the chain. The first page is 1; indices are gap-free.
    pub index: u64,
    /// Commit time, non-decreasing across pages.
    pub timestamp: Timestamp,
    /// Short tag naming the kind of event, e.g. `"document_uploaded"`.
    pub action_type: String,
    pub payload: Payload,
    /// Authenticated identity that requested the append.
    pub author_identity: String,
    /// Hash of page `index - 1`, or [`Digest::genesis`] for page 1.
    pub prev_hash: Digest,
    /// Hash over every field above.
    pub hash: Digest,
}

impl Page {
    /// The head position this page establishes once committed.
    pub fn as_head(&self) -> Head {
        Head {
            index: self.index,
            hash: self.hash,
            timestamp: self.timestamp,
        }
    }
}

/// The most recently committed page's position.
///
/// An empty ledger has the virtual genesis head `(0, Digest::genesis())`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Head {
    pub index: u64,
    pub hash: Digest,
    pub timestamp: Timestamp,
}

impl Head {
    pub fn genesis() -> Self {
        Self {
            index: 0,
            hash: Digest::genesis(),
            timestamp: Timestamp::zero(),
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    /// Index the next appended page will receive.
    pub fn next_index(&self) -> u64 {
        self.index + 1
    }
}

impl Default for Head {
    fn default() -> Self {
        Self::genesis()
    }
}
