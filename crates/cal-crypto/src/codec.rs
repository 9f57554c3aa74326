//! Canonical encoding of a page and its hash.
//!
//! The byte form is JSON over a fixed field order with every object's keys
//! sorted, so identical field values always encode to identical bytes no
//! matter how the payload map was built.

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::Value;

use cal_types::{Digest, Page, Payload, Timestamp};

use crate::hasher::ContentHasher;

/// Upper bound on the length of an action tag.
pub const MAX_ACTION_TYPE_LEN: usize = 128;

/// Errors from encoding or decoding a record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("corrupt record: {0}")]
    CorruptRecord(String),
}

/// Borrowed view of every hashed field of a page.
#[derive(Clone, Copy, Debug)]
pub struct PageFields<'a> {
    pub index: u64,
    pub timestamp: Timestamp,
    pub action_type: &'a str,
    pub payload: &'a Payload,
    pub author_identity: &'a str,
    pub prev_hash: Digest,
}

impl<'a> PageFields<'a> {
    pub fn of(page: &'a Page) -> Self {
        Self {
            index: page.index,
            timestamp: page.timestamp,
            action_type: &page.action_type,
            payload: &page.payload,
            author_identity: &page.author_identity,
            prev_hash: page.prev_hash,
        }
    }
}

#[derive(Serialize)]
struct CanonicalPage<'a> {
    index: u64,
    physical_ms: u64,
    logical: u32,
    action_type: &'a str,
    payload: CanonicalPayload<'a>,
    author_identity: &'a str,
    prev_hash: String,
}

struct CanonicalPayload<'a>(&'a Payload);

impl Serialize for CanonicalPayload<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in self.0 {
            map.serialize_entry(key, &Canonical(value))?;
        }
        map.end()
    }
}

/// Serializes a JSON value with object keys sorted at every depth.
struct Canonical<'a>(&'a Value);

impl Serialize for Canonical<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Object(object) => {
                let mut entries: Vec<(&String, &Value)> = object.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, &Canonical(value))?;
                }
                map.end()
            }
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(&Canonical(item))?;
                }
                seq.end()
            }
            scalar => scalar.serialize(serializer),
        }
    }
}

/// Deterministically encode the hashed fields of a page.
pub fn encode(fields: &PageFields<'_>) -> Result<Vec<u8>, CodecError> {
    validate_action_type(fields.action_type)?;
    if fields.author_identity.is_empty() {
        return Err(CodecError::CorruptRecord("empty author identity".into()));
    }

    let canonical = CanonicalPage {
        index: fields.index,
        physical_ms: fields.timestamp.physical_ms,
        logical: fields.timestamp.logical,
        action_type: fields.action_type,
        payload: CanonicalPayload(fields.payload),
        author_identity: fields.author_identity,
        prev_hash: fields.prev_hash.to_hex(),
    };
    serde_json::to_vec(&canonical).map_err(|e| CodecError::CorruptRecord(e.to_string()))
}

/// Hash already-encoded page bytes.
pub fn hash(bytes: &[u8]) -> Digest {
    ContentHasher::PAGE.hash(bytes)
}

/// Encode and hash in one step.
pub fn page_hash(fields: &PageFields<'_>) -> Result<Digest, CodecError> {
    Ok(hash(&encode(fields)?))
}

/// Build a complete, hashed page from its fields.
pub fn seal(fields: &PageFields<'_>) -> Result<Page, CodecError> {
    let hash = page_hash(fields)?;
    Ok(Page {
        index: fields.index,
        timestamp: fields.timestamp,
        action_type: fields.action_type.to_string(),
        payload: fields.payload.clone(),
        author_identity: fields.author_identity.to_string(),
        prev_hash: fields.prev_hash,
        hash,
    })
}

/// Recompute a stored page's hash from its fields (ignores `page.hash`).
pub fn recompute_hash(page: &Page) -> Result<Digest, CodecError> {
    page_hash(&PageFields::of(page))
}

/// Convert any serializable value into a payload map.
///
/// Fails with `CorruptRecord` if the value cannot be represented as JSON
/// (e.g. a map with non-string keys) or is not a JSON object.
pub fn payload_from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Payload, CodecError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(object)) => Ok(object.into_iter().collect()),
        Ok(other) => Err(CodecError::CorruptRecord(format!(
            "payload must be a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(CodecError::CorruptRecord(e.to_string())),
    }
}

/// Canonical JSON bytes of a payload, as stored on disk.
pub fn encode_payload(payload: &Payload) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(&CanonicalPayload(payload))
        .map_err(|e| CodecError::CorruptRecord(e.to_string()))
}

pub fn decode_payload(bytes: &[u8]) -> Result<Payload, CodecError> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::CorruptRecord(e.to_string()))
}

fn validate_action_type(action_type: &str) -> Result<(), CodecError> {
    if action_type.is_empty() {
        return Err(CodecError::CorruptRecord("empty action type".into()));
    }
    if action_type.len() > MAX_ACTION_TYPE_LEN {
        return Err(CodecError::CorruptRecord(format!(
            "action type exceeds {MAX_ACTION_TYPE_LEN} bytes"
        )));
    }
    if action_type.chars().any(char::is_control) {
        return Err(CodecError::CorruptRecord(
            "action type contains control characters".into(),
        ));
    }
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
