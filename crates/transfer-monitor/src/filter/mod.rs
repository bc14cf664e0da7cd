pub mod dedup;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::types::{EventKey, PricedTransfer, UsdCents};
use crate::filter::dedup::{DedupOutcome, DedupWindow};
use crate::metrics::counters::Counters;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    BelowThreshold,
    Duplicate,
    Unpriced,
    Outlier,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BelowThreshold => "below_threshold",
            Self::Duplicate => "duplicate",
            Self::Unpriced => "unpriced",
            Self::Outlier => "outlier",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Admit,
    Reject(RejectReason),
}

/// Threshold, sanity-bound and dedup checks, in that order. Only transfers
/// that pass the value checks are recorded in the dedup window; outliers
/// get a window of their own so a re-delivered one is reported once.
#[derive(Debug)]
pub struct AdmissionFilter {
    threshold: UsdCents,
    max_plausible: Option<UsdCents>,
    dedup: DedupWindow,
    outliers_seen: DedupWindow,
    counters: Arc<Counters>,
}

impl AdmissionFilter {
    pub fn new(
        threshold: UsdCents,
        max_plausible: Option<UsdCents>,
        dedup_window_blocks: u64,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            threshold,
            max_plausible,
            dedup: DedupWindow::new(dedup_window_blocks),
            outliers_seen: DedupWindow::new(dedup_window_blocks),
            counters,
        }
    }

    pub fn threshold(&self) -> UsdCents {
        self.threshold
    }

    pub fn dedup(&self) -> &DedupWindow {
        &self.dedup
    }

    pub fn evaluate(&self, transfer: &PricedTransfer) -> Verdict {
        let verdict = self.classify(transfer);
        if let Verdict::Reject(reason) = verdict {
            self.counters.inc_rejected(reason);
            debug!(key = %transfer.key(), %reason, "transfer rejected");
        }
        verdict
    }

    /// Undoes the dedup record of an admitted transfer the aggregator refused.
    pub fn revoke(&self, key: &EventKey, block_number: u64) {
        self.dedup.forget(key, block_number);
    }

    fn classify(&self, transfer: &PricedTransfer) -> Verdict {
        let Some(value) = transfer.usd_value else {
            return Verdict::Reject(RejectReason::Unpriced);
        };
        if value < self.threshold {
            return Verdict::Reject(RejectReason::BelowThreshold);
        }
        if let Some(max) = self.max_plausible
            && value > max
        {
            if self
                .outliers_seen
                .check_and_record(transfer.key(), transfer.event.block_number)
                == DedupOutcome::Duplicate
            {
                return Verdict::Reject(RejectReason::Duplicate);
            }
            warn!(
                key = %transfer.key(),
                token = %transfer.event.token_symbol,
                raw_amount = %transfer.event.amount.raw,
                decimals = transfer.event.amount.decimals,
                usd = %value,
                "implausible transfer value, holding out of aggregates"
            );
            return Verdict::Reject(RejectReason::Outlier);
        }
        match self
            .dedup
            .check_and_record(transfer.key(), transfer.event.block_number)
        {
            DedupOutcome::Fresh => Verdict::Admit,
            DedupOutcome::Duplicate => Verdict::Reject(RejectReason::Duplicate),
            DedupOutcome::BeyondWindow => {
                self.counters.inc_stale_dedup();
                debug!(
                    key = %transfer.key(),
                    block = transfer.event.block_number,
                    "transfer older than dedup window, admitting unchecked"
                );
                Verdict::Admit
            }
        }
    }
}
