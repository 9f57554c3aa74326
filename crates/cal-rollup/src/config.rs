use serde::{Deserialize, Serialize};

use crate::error::{RollupError, RollupResult};

/// Rollup thresholds.
///
/// Thresholds are part of what a chapter or book means: changing them on a
/// ledger that already has rollups only affects chapters closed afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollupConfig {
    pub pages_per_chapter: u64,
    pub chapters_per_book: u64,
    /// Run rollup after every append.
    pub auto: bool,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            pages_per_chapter: 100,
            chapters_per_book: 10,
            auto: true,
        }
    }
}

impl RollupConfig {
    pub fn validate(&self) -> RollupResult<()> {
        if self.pages_per_chapter == 0 {
            return Err(RollupError::InvalidConfig(
                "pages_per_chapter must be at least 1".into(),
            ));
        }
        if self.chapters_per_book == 0 {
            return Err(RollupError::InvalidConfig(
                "chapters_per_book must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
