use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::filter::RejectReason;

/// Pipeline counters for one reporting window.
#[derive(Debug, Default)]
pub struct Counters {
    pub observed: AtomicU64,
    pub admitted: AtomicU64,
    pub below_threshold: AtomicU64,
    pub duplicates: AtomicU64,
    pub unpriced: AtomicU64,
    pub outliers: AtomicU64,
    pub malformed: AtomicU64,
    pub rpc_errors: AtomicU64,
    pub price_retries: AtomicU64,
    pub stale_dedup_admissions: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountersSnapshot {
    pub observed: u64,
    pub admitted: u64,
    pub below_threshold: u64,
    pub duplicates: u64,
    pub unpriced: u64,
    pub outliers: u64,
    pub malformed: u64,
    pub rpc_errors: u64,
    pub price_retries: u64,
    pub stale_dedup_admissions: u64,
}

impl Counters {
    pub fn inc_observed(&self, n: u64) {
        let _ = self.observed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_admitted(&self) {
        let _ = self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rejected(&self, reason: RejectReason) {
        let counter = match reason {
            RejectReason::BelowThreshold => &self.below_threshold,
            RejectReason::Duplicate => &self.duplicates,
            RejectReason::Unpriced => &self.unpriced,
            RejectReason::Outlier => &self.outliers,
        };
        let _ = counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_malformed(&self) {
        let _ = self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rpc_error(&self) {
        let _ = self.rpc_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_price_retry(&self) {
        let _ = self.price_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_stale_dedup(&self) {
        let _ = self.stale_dedup_admissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CountersSnapshot {
            observed: get(&self.observed),
            admitted: get(&self.admitted),
            below_threshold: get(&self.below_threshold),
            duplicates: get(&self.duplicates),
            unpriced: get(&self.unpriced),
            outliers: get(&self.outliers),
            malformed: get(&self.malformed),
            rpc_errors: get(&self.rpc_errors),
            price_retries: get(&self.price_retries),
            stale_dedup_admissions: get(&self.stale_dedup_admissions),
        }
    }

    pub fn reset(&self) {
        for c in [
            &self.observed,
            &self.admitted,
            &self.below_threshold,
            &self.duplicates,
            &self.unpriced,
            &self.outliers,
            &self.malformed,
            &self.rpc_errors,
            &self.price_retries,
            &self.stale_dedup_admissions,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }
}
