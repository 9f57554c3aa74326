use serde::{Deserialize, Serialize};

use cal_crypto::codec;
use cal_types::{Book, Chapter, Digest, Page, Timestamp};

use crate::error::{StoreError, StoreResult};

/// On-disk form of a page.
///
/// The payload is kept as its canonical JSON bytes so the record can be
/// decoded (for its hash, index and linkage) without touching the payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPage {
    pub index: u64,
    pub timestamp: Timestamp,
    pub action_type: String,
    pub author_identity: String,
    pub prev_hash: Digest,
    pub hash: Digest,
    pub payload: Vec<u8>,
}

impl StoredPage {
    pub fn from_page(page: &Page) -> StoreResult<Self> {
        Ok(Self {
            index: page.index,
            timestamp: page.timestamp,
            action_type: page.action_type.clone(),
            author_identity: page.author_identity.clone(),
            prev_hash: page.prev_hash,
            hash: page.hash,
            payload: codec::encode_payload(&page.payload)?,
        })
    }

    pub fn into_page(self) -> StoreResult<Page> {
        let payload = codec::decode_payload(&self.payload).map_err(|e| {
            StoreError::from(e).at_index(self.index)
        })?;
        Ok(Page {
            index: self.index,
            timestamp: self.timestamp,
            action_type: self.action_type,
            payload,
            author_identity: self.author_identity,
            prev_hash: self.prev_hash,
            hash: self.hash,
        })
    }

    pub fn to_bytes(&self) -> StoreResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> StoreResult<Self> {
        bincode::deserialize(bytes).map_err(|e| StoreError::CorruptRecord {
            index: None,
            reason: format!("undecodable page record: {e}"),
        })
    }
}

/// On-disk form of a committed rollup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollupRecord {
    Chapter(Chapter),
    Book(Book),
}

impl RollupRecord {
    pub fn to_bytes(&self) -> StoreResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> StoreResult<Self> {
        bincode::deserialize(bytes).map_err(|e| StoreError::CorruptRecord {
            index: None,
            reason: format!("undecodable rollup record: {e}"),
        })
    }
}
