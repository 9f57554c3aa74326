//! Tamper detection for the civic audit ledger.
//!
//! The [`Verifier`] recomputes hashes and compares them with what is stored.
//! It never repairs anything: a mismatch is reported with the index (or
//! checkpoint) where it was first seen and left for an operator.
//!
//! - [`Verifier::verify_full`] -- walk genesis to head, plus every checkpoint
//! - [`Verifier::verify_range`] -- walk a sub-range anchored on its predecessor
//! - [`Verifier::verify_checkpoint`] -- recheck one chapter or book on its own

pub mod error;
pub mod report;
pub mod verifier;

pub use error::{VerifyError, VerifyResult};
pub use report::{VerificationReport, VerifyScope, ViolationKind};
pub use verifier::Verifier;
