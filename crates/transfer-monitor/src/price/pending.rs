use std::collections::VecDeque;
use std::time::Instant;

use crate::domain::types::TransferEvent;
use crate::runtime::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct HeldTransfer {
    pub event: TransferEvent,
    pub attempts: u32,
    pub next_due: Instant,
}

/// Transfers waiting for a price, retried on the policy's schedule until
/// `max_attempts` lookups have failed.
#[derive(Debug)]
pub struct PendingPrices {
    held: VecDeque<HeldTransfer>,
    policy: RetryPolicy,
}

impl PendingPrices {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            held: VecDeque::new(),
            policy,
        }
    }

    /// Holds a transfer whose first lookup failed. Returns it straight back
    /// when the policy allows no further attempts.
    pub fn hold(&mut self, event: TransferEvent, now: Instant) -> Option<TransferEvent> {
        self.schedule(
            HeldTransfer {
                event,
                attempts: 0,
                next_due: now,
            },
            now,
        )
    }

    /// Re-holds a transfer after another failed lookup, or hands it back once
    /// its attempts are exhausted.
    pub fn schedule(&mut self, mut held: HeldTransfer, now: Instant) -> Option<TransferEvent> {
        held.attempts += 1;
        if held.attempts >= self.policy.max_attempts {
            return Some(held.event);
        }
        held.next_due = now + self.policy.delay_for_attempt(held.attempts);
        self.held.push_back(held);
        None
    }

    pub fn take_due(&mut self, now: Instant) -> Vec<HeldTransfer> {
        let (due, waiting): (Vec<_>, Vec<_>) = self.held.drain(..).partition(|h| h.next_due <= now);
        self.held = waiting.into();
        due
    }

    pub fn drain(&mut self) -> Vec<HeldTransfer> {
        self.held.drain(..).collect()
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.held.iter().map(|h| h.next_due).min()
    }

    /// Lowest block still waiting; the chain cursor must stay below it.
    pub fn oldest_block(&self) -> Option<u64> {
        self.held.iter().map(|h| h.event.block_number).min()
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}
