use serde::{Deserialize, Serialize};

use crate::domain::types::{ChainId, PricedTransfer, UsdCents};
use crate::metrics::counters::CountersSnapshot;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub count: u64,
    pub volume: UsdCents,
}

impl Tally {
    pub(crate) fn record(&mut self, value: UsdCents) {
        self.count += 1;
        self.volume = self.volume.saturating_add(value);
    }

    pub(crate) fn merge(&mut self, other: &Tally) {
        self.count += other.count;
        self.volume = self.volume.saturating_add(other.volume);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainAggregate {
    pub chain_id: ChainId,
    pub count: u64,
    pub total_usd_volume: UsdCents,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAggregate {
    pub token_symbol: String,
    pub count: u64,
    pub total_usd_volume: UsdCents,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncompleteChain {
    pub chain_id: ChainId,
    pub reasons: Vec<String>,
}

/// Frozen aggregator state of one closed window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowTotals {
    pub window_id: u64,
    pub window_start_ms: u64,
    pub window_end_ms: u64,
    pub admitted: Tally,
    pub top_transfers: Vec<PricedTransfer>,
    pub chains: Vec<ChainAggregate>,
    pub tokens: Vec<TokenAggregate>,
    pub incomplete_chains: Vec<IncompleteChain>,
}

/// Immutable hand-off to report emitters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSnapshot {
    pub window_id: u64,
    pub window_start_ms: u64,
    pub window_end_ms: u64,
    pub generated_at_ms: u64,
    pub threshold: UsdCents,
    pub config_hash: String,
    pub admitted: Tally,
    pub top_transfers: Vec<PricedTransfer>,
    pub chains: Vec<ChainAggregate>,
    pub tokens: Vec<TokenAggregate>,
    pub incomplete_chains: Vec<IncompleteChain>,
    pub outliers: Vec<PricedTransfer>,
    pub diagnostics: CountersSnapshot,
}

impl WindowSnapshot {
    pub fn assemble(
        totals: WindowTotals,
        threshold: UsdCents,
        config_hash: String,
        outliers: Vec<PricedTransfer>,
        diagnostics: CountersSnapshot,
        generated_at_ms: u64,
    ) -> Self {
        Self {
            window_id: totals.window_id,
            window_start_ms: totals.window_start_ms,
            window_end_ms: totals.window_end_ms,
            generated_at_ms,
            threshold,
            config_hash,
            admitted: totals.admitted,
            top_transfers: totals.top_transfers,
            chains: totals.chains,
            tokens: totals.tokens,
            incomplete_chains: totals.incomplete_chains,
            outliers,
            diagnostics,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.incomplete_chains.is_empty()
    }

    pub fn chain(&self, chain_id: ChainId) -> Option<&ChainAggregate> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }

    pub fn token(&self, symbol: &str) -> Option<&TokenAggregate> {
        self.tokens.iter().find(|t| t.token_symbol == symbol)
    }
}
