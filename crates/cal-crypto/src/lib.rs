//! Record codec and hashing for the civic audit ledger.
//!
//! Provides domain-separated BLAKE3 hashing, the canonical byte encoding of a
//! page, hash-chain link checks, and the ordered hash-of-hashes aggregate used
//! by chapters and books.
//!
//! Everything here is pure: no I/O, no locks, no clocks.

pub mod aggregate;
pub mod chain;
pub mod codec;
pub mod hasher;

pub use aggregate::AggregateHasher;
pub use chain::{ChainVerifier, LinkError};
pub use codec::{CodecError, PageFields};
pub use hasher::ContentHasher;
