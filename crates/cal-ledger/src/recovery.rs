//! Startup validation: `Recovering` to `Open`.
//!
//! Only the newest chapter and the pages after it are rechecked. Older
//! history was validated when that chapter was sealed, and a full walk is
//! always available through [`Ledger::verify`].

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use cal_types::{CheckpointId, Head};
use cal_verify::VerificationReport;

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{Ledger, LedgerState};

/// What recovery checked.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub head: Head,
    /// The chapter the tail was validated against, if any exists yet.
    pub checkpoint: Option<CheckpointId>,
    /// Pages past that chapter that were walked.
    pub tail_pages: u64,
    pub indexed_through: u64,
}

impl Ledger {
    /// Revalidate the tail and reopen the ledger.
    ///
    /// Runs on every open. While it runs the ledger is `Recovering` and
    /// refuses appends; if the tail does not validate it stays that way and
    /// the failure is returned as [`LedgerError::IntegrityViolation`].
    pub fn recover(&self) -> LedgerResult<RecoveryReport> {
        self.set_state(LedgerState::Recovering);
        let head = self.store.head()?;
        info!(head = head.index, "recovering ledger");

        let (checkpoint, tail_pages) = self.validate_tail(&head).inspect_err(|e| {
            warn!(error = %e, "ledger tail failed validation");
        })?;

        let indexed_through = self.index.rebuild()?;
        self.clock.observe(head.timestamp)?;
        if self.config.rollup.auto {
            // Thresholds crossed just before a crash close here.
            if let Err(e) = self.rollup.run() {
                warn!(error = %e, "auto-rollup failed during recovery");
            }
        }

        self.set_state(LedgerState::Open);
        info!(
            head = head.index,
            checkpoint = ?checkpoint,
            tail_pages,
            "ledger open"
        );
        Ok(RecoveryReport {
            head,
            checkpoint,
            tail_pages,
            indexed_through,
        })
    }

    fn validate_tail(&self, head: &Head) -> LedgerResult<(Option<CheckpointId>, u64)> {
        let mut tail_from = 1;
        let mut checkpoint = None;
        if let Some(chapter) = self.store.last_chapter()? {
            let id = CheckpointId::Chapter(chapter.chapter_index);
            let report = self.verifier.verify_checkpoint(id)?.ok_or_else(|| {
                LedgerError::RollupInconsistency {
                    checkpoint: id,
                    reason: "latest chapter vanished during recovery".into(),
                }
            })?;
            fatal(report, chapter.page_range.start)?;
            tail_from = chapter.page_range.end + 1;
            checkpoint = Some(id);
        }

        if tail_from > head.index {
            return Ok((checkpoint, 0));
        }
        let report = fatal(self.verifier.verify_range(tail_from, head.index)?, tail_from)?;
        Ok((checkpoint, report.checked))
    }
}

/// Any failed check during recovery is an integrity violation, located at
/// the first bad page or else at `fallback`.
fn fatal(report: VerificationReport, fallback: u64) -> LedgerResult<VerificationReport> {
    if report.ok {
        return Ok(report);
    }
    Err(LedgerError::IntegrityViolation {
        index: report.first_bad_index.unwrap_or(fallback),
        reason: report.to_string(),
    })
}
