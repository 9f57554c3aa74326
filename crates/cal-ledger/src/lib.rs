//! Civic audit ledger.
//!
//! An append-only, hash-chained record of every civic action (documents,
//! votes, petitions, surveys, messages), rolled up into chapters and books
//! and checkable for tampering at any time.
//!
//! [`Ledger`] is the only entry point feature modules need:
//!
//! - [`Ledger::append`] -- authorize, seal and commit one action
//! - [`Ledger::find`] / [`Ledger::read_all`] -- indexed and full reads
//! - [`Ledger::snapshot`] -- pages, chapters and books at one head
//! - [`Ledger::verify`] / [`Ledger::verify_checkpoint`] -- tamper detection
//!
//! Construct one ledger per store and pass it to whoever needs it. A ledger
//! opens in [`LedgerState::Recovering`], validates its tail against the
//! latest chapter, and only then becomes [`LedgerState::Open`].

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod ledger;
pub mod recovery;

pub use auth::{AllowAll, Authorizer, StaticAuthorizer};
pub use clock::{LedgerClock, WallClock};
pub use config::{Backend, LedgerConfig, StorageConfig};
pub use error::{LedgerError, LedgerResult};
pub use ledger::{Ledger, LedgerBuilder, LedgerState, Snapshot};
pub use recovery::RecoveryReport;

// Re-export key types
pub use cal_index::{Query, QueryResult, TimeRange};
pub use cal_rollup::RollupReport;
pub use cal_store::{LedgerStore, SyncMode};
pub use cal_types::{
    Book, Chapter, CheckpointId, Digest, Head, IndexRange, Page, Payload, Timestamp,
};
pub use cal_verify::{VerificationReport, VerifyScope, ViolationKind};
