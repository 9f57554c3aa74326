//! Deterministic rollup for the civic audit ledger.
//!
//! Every `pages_per_chapter` committed pages close into a [`Chapter`]
//! carrying an ordered aggregate of their hashes; every `chapters_per_book`
//! chapters close into a [`Book`]. Rollup is a pure function of the
//! committed chain and the thresholds, so re-running it after a crash
//! produces byte-identical records.
//!
//! [`Chapter`]: cal_types::Chapter
//! [`Book`]: cal_types::Book

pub mod config;
pub mod engine;
pub mod error;

pub use config::RollupConfig;
pub use engine::{RollupEngine, RollupReport};
pub use error::{RollupError, RollupResult};
