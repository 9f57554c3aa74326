//! Query index for the civic audit ledger.
//!
//! Maps action type, author identity and time bucket to ascending lists of
//! page indices, updated incrementally as pages are committed. Lookups
//! first catch the index up to the store head, so a caller always sees its
//! own appends.

pub mod error;
pub mod index;
pub mod query;

pub use error::{IndexError, IndexResult};
pub use index::{IndexConfig, QueryIndex};
pub use query::{Query, QueryResult, TimeRange};
