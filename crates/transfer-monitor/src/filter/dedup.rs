use std::collections::{BTreeMap, HashSet};

use dashmap::DashMap;

use crate::domain::types::{ChainId, EventKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    Fresh,
    Duplicate,
    /// Older than the retained window; cannot be checked and is not recorded.
    BeyondWindow,
}

#[derive(Debug, Default)]
struct ChainWindow {
    head: u64,
    seen: HashSet<EventKey>,
    by_block: BTreeMap<u64, Vec<EventKey>>,
}

impl ChainWindow {
    fn floor(&self, window_blocks: u64) -> u64 {
        (self.head + 1).saturating_sub(window_blocks)
    }

    fn evict_below(&mut self, floor: u64) {
        let kept = self.by_block.split_off(&floor);
        let evicted = std::mem::replace(&mut self.by_block, kept);
        for key in evicted.into_values().flatten() {
            self.seen.remove(&key);
        }
    }
}

/// Sliding-window set of admitted event keys, sharded per chain.
///
/// Each chain retains the keys of the last `window_blocks` blocks below its
/// highest admitted block. Keys for older blocks are evicted, so a duplicate
/// that is re-delivered after falling out of the window is admitted again.
/// Memory is bounded by the window instead of the whole chain history.
#[derive(Debug)]
pub struct DedupWindow {
    window_blocks: u64,
    chains: DashMap<ChainId, ChainWindow>,
}

impl DedupWindow {
    pub fn new(window_blocks: u64) -> Self {
        Self {
            window_blocks: window_blocks.max(1),
            chains: DashMap::new(),
        }
    }

    /// Atomically checks `key` and records it when fresh. Concurrent callers
    /// with the same key serialize on the chain shard, so at most one of them
    /// observes `Fresh`.
    pub fn check_and_record(&self, key: EventKey, block_number: u64) -> DedupOutcome {
        let mut chain = self.chains.entry(key.chain_id).or_default();
        if chain.seen.contains(&key) {
            return DedupOutcome::Duplicate;
        }
        if block_number < chain.floor(self.window_blocks) {
            return DedupOutcome::BeyondWindow;
        }
        chain.seen.insert(key);
        chain.by_block.entry(block_number).or_default().push(key);
        if block_number > chain.head {
            chain.head = block_number;
            let floor = chain.floor(self.window_blocks);
            chain.evict_below(floor);
        }
        DedupOutcome::Fresh
    }

    /// Drops a recorded key whose admission could not be completed.
    pub fn forget(&self, key: &EventKey, block_number: u64) {
        if let Some(mut chain) = self.chains.get_mut(&key.chain_id) {
            chain.seen.remove(key);
            if let Some(keys) = chain.by_block.get_mut(&block_number) {
                keys.retain(|k| k != key);
                if keys.is_empty() {
                    chain.by_block.remove(&block_number);
                }
            }
        }
    }

    pub fn retained(&self, chain_id: ChainId) -> usize {
        self.chains.get(&chain_id).map_or(0, |c| c.seen.len())
    }

    pub fn head(&self, chain_id: ChainId) -> Option<u64> {
        self.chains.get(&chain_id).map(|c| c.head)
    }

    pub fn window_blocks(&self) -> u64 {
        self.window_blocks
    }
}
