//! Foundation types for the civic audit ledger.
//!
//! Every other `cal-*` crate depends on these definitions. The ledger owns
//! three kinds of record, strictly nested upward:
//!
//! - [`Page`] -- one immutable, hash-linked record of a single business action
//! - [`Chapter`] -- deterministic rollup over a contiguous range of pages
//! - [`Book`] -- deterministic rollup over a contiguous range of chapters
//!
//! Supporting types:
//!
//! - [`Digest`] -- 256-bit BLAKE3 digest
//! - [`Timestamp`] -- hybrid wall-clock/logical commit time
//! - [`Head`] -- index, hash and time of the last committed page
//! - [`CheckpointId`] -- names a chapter or book for checkpoint verification

pub mod digest;
pub mod error;
pub mod page;
pub mod rollup;
pub mod temporal;

pub use digest::Digest;
pub use error::TypeError;
pub use page::{Head, Page, Payload};
pub use rollup::{Book, Chapter, CheckpointId, IndexRange};
pub use temporal::Timestamp;
