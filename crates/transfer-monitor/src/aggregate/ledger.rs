use std::cmp::Reverse;

use crate::domain::types::{EventKey, PricedTransfer, UsdCents};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerInsert {
    Inserted,
    Evicted(PricedTransfer),
    Rejected,
}

#[derive(Debug, Clone)]
struct Entry {
    value: UsdCents,
    transfer: PricedTransfer,
}

type Rank = (Reverse<UsdCents>, u64, EventKey);

impl Entry {
    // Larger value first, then earlier observation, then identity.
    fn rank(&self) -> Rank {
        (
            Reverse(self.value),
            self.transfer.event.observed_at_ms,
            self.transfer.key(),
        )
    }
}

/// Largest admitted transfers, kept sorted descending by USD value.
#[derive(Debug, Clone)]
pub struct TopNLedger {
    capacity: usize,
    entries: Vec<Entry>,
}

impl TopNLedger {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Vec::with_capacity(capacity + 1),
        }
    }

    pub fn insert(&mut self, value: UsdCents, transfer: PricedTransfer) -> LedgerInsert {
        if self.is_full()
            && let Some(min) = self.min_value()
            && value <= min
        {
            return LedgerInsert::Rejected;
        }
        let entry = Entry { value, transfer };
        let rank = entry.rank();
        let pos = self.entries.partition_point(|e| e.rank() < rank);
        self.entries.insert(pos, entry);
        if self.entries.len() > self.capacity {
            match self.entries.pop() {
                Some(evicted) => LedgerInsert::Evicted(evicted.transfer),
                None => LedgerInsert::Inserted,
            }
        } else {
            LedgerInsert::Inserted
        }
    }

    pub fn min_value(&self) -> Option<UsdCents> {
        self.entries.last().map(|e| e.value)
    }

    pub fn values(&self) -> Vec<UsdCents> {
        self.entries.iter().map(|e| e.value).collect()
    }

    pub fn transfers(&self) -> Vec<PricedTransfer> {
        self.entries.iter().map(|e| e.transfer.clone()).collect()
    }

    pub fn is_sorted(&self) -> bool {
        self.entries.windows(2).all(|w| w[0].rank() <= w[1].rank())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
