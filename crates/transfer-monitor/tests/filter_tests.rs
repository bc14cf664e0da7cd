use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;

use alloy_primitives::{Address, B256, U256};
use transfer_monitor::domain::types::{ChainId, PricedTransfer, TokenAmount, TransferEvent, UsdCents};
use transfer_monitor::filter::dedup::{DedupOutcome, DedupWindow};
use transfer_monitor::filter::{AdmissionFilter, RejectReason, Verdict};
use transfer_monitor::metrics::counters::Counters;

fn priced(chain: u64, tx: u8, log_index: u64, block: u64, cents: Option<u128>) -> PricedTransfer {
    PricedTransfer {
        event: TransferEvent {
            chain_id: ChainId(chain),
            token_contract: Address::repeat_byte(0x55),
            token_symbol: "USDT".to_string(),
            from: Address::repeat_byte(0x01),
            to: Address::repeat_byte(0x02),
            amount: TokenAmount {
                raw: U256::from(cents.unwrap_or(0)),
                decimals: 2,
            },
            tx_hash: B256::repeat_byte(tx),
            log_index,
            block_number: block,
            block_timestamp: None,
            observed_at_ms: 1,
        },
        usd_value: cents.map(UsdCents),
    }
}

fn filter(window_blocks: u64) -> (AdmissionFilter, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let filter = AdmissionFilter::new(
        UsdCents(10_000_000),
        Some(UsdCents(100_000_000_000_000)),
        window_blocks,
        Arc::clone(&counters),
    );
    (filter, counters)
}

#[test]
fn threshold_is_inclusive() {
    let (filter, counters) = filter(100);
    assert_eq!(
        filter.evaluate(&priced(1, 1, 0, 10, Some(10_000_000))),
        Verdict::Admit
    );
    assert_eq!(
        filter.evaluate(&priced(1, 2, 0, 10, Some(9_999_999))),
        Verdict::Reject(RejectReason::BelowThreshold)
    );
    assert_eq!(counters.snapshot().below_threshold, 1);
}

#[test]
fn unpriced_and_outlier_are_rejected_without_recording() {
    let (filter, counters) = filter(100);
    let unpriced = priced(1, 1, 0, 10, None);
    assert_eq!(
        filter.evaluate(&unpriced),
        Verdict::Reject(RejectReason::Unpriced)
    );
    let outlier = priced(1, 2, 0, 10, Some(100_000_000_000_001));
    assert_eq!(
        filter.evaluate(&outlier),
        Verdict::Reject(RejectReason::Outlier)
    );
    assert_eq!(filter.dedup().retained(ChainId(1)), 0);

    // Priced later, the same transfer is still admissible.
    assert_eq!(
        filter.evaluate(&priced(1, 1, 0, 10, Some(20_000_000))),
        Verdict::Admit
    );
    let snap = counters.snapshot();
    assert_eq!(snap.unpriced, 1);
    assert_eq!(snap.outliers, 1);
}

#[test]
fn redelivered_outlier_is_reported_once() {
    let (filter, counters) = filter(100);
    let outlier = priced(1, 3, 0, 10, Some(500_000_000_000_000));
    assert_eq!(
        filter.evaluate(&outlier),
        Verdict::Reject(RejectReason::Outlier)
    );
    assert_eq!(
        filter.evaluate(&outlier),
        Verdict::Reject(RejectReason::Duplicate)
    );
    assert_eq!(filter.dedup().retained(ChainId(1)), 0);
    let snap = counters.snapshot();
    assert_eq!(snap.outliers, 1);
    assert_eq!(snap.duplicates, 1);
}

#[test]
fn redelivered_event_is_duplicate() {
    let (filter, counters) = filter(100);
    let t = priced(56, 0xab, 3, 500, Some(19_065_139_709));
    assert_eq!(filter.evaluate(&t), Verdict::Admit);
    assert_eq!(filter.evaluate(&t), Verdict::Reject(RejectReason::Duplicate));
    assert_eq!(counters.duplicates.load(Ordering::Relaxed), 1);

    // Same tx and index on a different chain is a different event.
    let other_chain = priced(1, 0xab, 3, 500, Some(19_065_139_709));
    assert_eq!(filter.evaluate(&other_chain), Verdict::Admit);
}

#[test]
fn revoke_allows_readmission() {
    let (filter, _) = filter(100);
    let t = priced(1, 7, 0, 20, Some(50_000_000));
    assert_eq!(filter.evaluate(&t), Verdict::Admit);
    filter.revoke(&t.key(), t.event.block_number);
    assert_eq!(filter.evaluate(&t), Verdict::Admit);
}

#[test]
fn dedup_window_evicts_old_blocks() {
    let window = DedupWindow::new(10);
    let key = |tx: u8| priced(1, tx, 0, 0, None).key();

    assert_eq!(window.check_and_record(key(1), 100), DedupOutcome::Fresh);
    assert_eq!(window.check_and_record(key(2), 105), DedupOutcome::Fresh);
    assert_eq!(window.check_and_record(key(1), 100), DedupOutcome::Duplicate);

    // Head 110 keeps blocks 101..=110, so block 100 is gone.
    assert_eq!(window.check_and_record(key(3), 110), DedupOutcome::Fresh);
    assert_eq!(window.head(ChainId(1)), Some(110));
    assert_eq!(window.retained(ChainId(1)), 2);

    // The evicted key can no longer be recognised: the documented tradeoff.
    assert_eq!(window.check_and_record(key(1), 100), DedupOutcome::BeyondWindow);
    assert_eq!(window.check_and_record(key(2), 105), DedupOutcome::Duplicate);
}

#[test]
fn stale_admission_is_counted() {
    let (filter, counters) = filter(5);
    assert_eq!(
        filter.evaluate(&priced(1, 1, 0, 1_000, Some(20_000_000))),
        Verdict::Admit
    );
    assert_eq!(
        filter.evaluate(&priced(1, 2, 0, 10, Some(20_000_000))),
        Verdict::Admit
    );
    assert_eq!(counters.snapshot().stale_dedup_admissions, 1);
}

#[test]
fn concurrent_deliveries_admit_once() {
    let (filter, _) = filter(1_000);
    let filter = Arc::new(filter);
    let t = priced(137, 0x42, 9, 77, Some(25_000_000));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let filter = Arc::clone(&filter);
            let t = t.clone();
            thread::spawn(move || filter.evaluate(&t))
        })
        .collect();
    let admitted = handles
        .into_iter()
        .map(|h| h.join().expect("join"))
        .filter(|v| *v == Verdict::Admit)
        .count();
    assert_eq!(admitted, 1);
}
