pub mod ledger;
pub mod snapshot;
pub mod window;

use std::collections::BTreeMap;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{error, info};

use crate::aggregate::ledger::{LedgerInsert, TopNLedger};
use crate::aggregate::snapshot::{
    ChainAggregate, IncompleteChain, Tally, TokenAggregate, WindowTotals,
};
use crate::aggregate::window::{WindowLifecycle, WindowPhase};
use crate::domain::types::{ChainId, PricedTransfer, UsdCents};
use crate::error::{Error, Result};

/// Per-window totals, rankings and lifecycle.
///
/// Chain and token tallies live in separate sharded maps so unrelated keys do
/// not contend. Each tally's count and volume change together under the
/// shard lock. Updates hold the lifecycle read lock, which keeps a window
/// from closing under an in-flight update.
#[derive(Debug)]
pub struct Aggregator {
    lifecycle: RwLock<WindowLifecycle>,
    chains: DashMap<ChainId, Tally>,
    tokens: DashMap<String, Tally>,
    admitted: Mutex<Tally>,
    ledger: Mutex<TopNLedger>,
    incomplete: DashMap<ChainId, Vec<String>>,
}

impl Aggregator {
    pub fn new(top_n: usize, opened_at_ms: u64) -> Self {
        Self {
            lifecycle: RwLock::new(WindowLifecycle::new(opened_at_ms)),
            chains: DashMap::new(),
            tokens: DashMap::new(),
            admitted: Mutex::new(Tally::default()),
            ledger: Mutex::new(TopNLedger::new(top_n)),
            incomplete: DashMap::new(),
        }
    }

    pub fn phase(&self) -> WindowPhase {
        self.lifecycle.read().phase
    }

    pub fn window_id(&self) -> u64 {
        self.lifecycle.read().window_id
    }

    pub fn apply(&self, transfer: PricedTransfer) -> Result<LedgerInsert> {
        let Some(value) = transfer.usd_value else {
            return Err(Error::PriceUnavailable {
                price_key: transfer.event.token_symbol.clone(),
                at_secs: transfer.event.price_timestamp(),
            });
        };
        let lifecycle = self.lifecycle.read();
        if !lifecycle.phase.accepts_updates() {
            return Err(Error::WindowNotAccepting(lifecycle.phase.as_str()));
        }

        self.chains
            .entry(transfer.event.chain_id)
            .or_default()
            .record(value);
        self.tokens
            .entry(transfer.event.token_symbol.clone())
            .or_default()
            .record(value);
        self.admitted.lock().record(value);
        let outcome = self.ledger.lock().insert(value, transfer);
        drop(lifecycle);
        Ok(outcome)
    }

    pub fn mark_incomplete(&self, chain_id: ChainId, reason: impl Into<String>) {
        let reason = reason.into();
        let mut reasons = self.incomplete.entry(chain_id).or_default();
        if !reasons.contains(&reason) {
            reasons.push(reason);
        }
    }

    pub fn is_incomplete(&self, chain_id: ChainId) -> bool {
        self.incomplete.contains_key(&chain_id)
    }

    pub fn chain_tally(&self, chain_id: ChainId) -> Tally {
        self.chains.get(&chain_id).map(|t| *t).unwrap_or_default()
    }

    pub fn token_tally(&self, symbol: &str) -> Tally {
        self.tokens.get(symbol).map(|t| *t).unwrap_or_default()
    }

    pub fn admitted(&self) -> Tally {
        *self.admitted.lock()
    }

    pub fn ledger_values(&self) -> Vec<UsdCents> {
        self.ledger.lock().values()
    }

    pub fn begin_closing(&self, at_ms: u64) -> Result<()> {
        let mut lifecycle = self.lifecycle.write();
        lifecycle.advance(WindowPhase::Closing, at_ms)?;
        info!(window = lifecycle.window_id, "window closing");
        Ok(())
    }

    /// Freezes the window. Fails with `AggregateCorruption`, leaving the
    /// window halted, if counts or volumes disagree across aggregates.
    pub fn close(&self) -> Result<WindowTotals> {
        let mut lifecycle = self.lifecycle.write();
        if lifecycle.phase != WindowPhase::Closing {
            return Err(Error::InvalidTransition {
                from: lifecycle.phase.as_str(),
                to: WindowPhase::Closed.as_str(),
            });
        }
        let closing_at = lifecycle.closing_at_ms.unwrap_or(lifecycle.opened_at_ms);
        if let Err(e) = self.verify() {
            lifecycle.advance(WindowPhase::Halted, closing_at)?;
            error!(window = lifecycle.window_id, error = %e, "window halted");
            return Err(e);
        }
        lifecycle.advance(WindowPhase::Closed, closing_at)?;

        let totals = WindowTotals {
            window_id: lifecycle.window_id,
            window_start_ms: lifecycle.opened_at_ms,
            window_end_ms: closing_at,
            admitted: *self.admitted.lock(),
            top_transfers: self.ledger.lock().transfers(),
            chains: self.chain_aggregates(),
            tokens: self.token_aggregates(),
            incomplete_chains: self.incomplete_chains(),
        };
        info!(
            window = totals.window_id,
            admitted = totals.admitted.count,
            volume = %totals.admitted.volume,
            incomplete = totals.incomplete_chains.len(),
            "window closed"
        );
        Ok(totals)
    }

    /// Starts the next window from a closed one, clearing all totals.
    pub fn reopen(&self, at_ms: u64) -> Result<u64> {
        let mut lifecycle = self.lifecycle.write();
        lifecycle.advance(WindowPhase::Open, at_ms)?;
        self.chains.clear();
        self.tokens.clear();
        self.incomplete.clear();
        *self.admitted.lock() = Tally::default();
        self.ledger.lock().clear();
        info!(window = lifecycle.window_id, "window opened");
        Ok(lifecycle.window_id)
    }

    /// Operator acknowledgement of a halted window; totals stay frozen.
    pub fn acknowledge_halt(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.write();
        let at = lifecycle.closing_at_ms.unwrap_or(lifecycle.opened_at_ms);
        lifecycle.advance(WindowPhase::Closed, at)
    }

    fn verify(&self) -> Result<()> {
        let admitted = *self.admitted.lock();
        let mut by_chain = Tally::default();
        for t in self.chains.iter() {
            by_chain.merge(t.value());
        }
        let mut by_token = Tally::default();
        for t in self.tokens.iter() {
            by_token.merge(t.value());
        }
        if by_chain != admitted || by_token != admitted {
            return Err(Error::AggregateCorruption(format!(
                "admitted {}/{} but chains sum {}/{} and tokens sum {}/{}",
                admitted.count,
                admitted.volume,
                by_chain.count,
                by_chain.volume,
                by_token.count,
                by_token.volume
            )));
        }
        let ledger = self.ledger.lock();
        if ledger.len() > ledger.capacity() || !ledger.is_sorted() {
            return Err(Error::AggregateCorruption(
                "top-n ledger order or capacity violated".to_string(),
            ));
        }
        if ledger.len() as u64 > admitted.count {
            return Err(Error::AggregateCorruption(
                "top-n ledger holds more entries than admitted transfers".to_string(),
            ));
        }
        Ok(())
    }

    fn chain_aggregates(&self) -> Vec<ChainAggregate> {
        let mut out: Vec<ChainAggregate> = self
            .chains
            .iter()
            .map(|e| ChainAggregate {
                chain_id: *e.key(),
                count: e.count,
                total_usd_volume: e.volume,
            })
            .collect();
        out.sort_by(|a, b| {
            b.total_usd_volume
                .cmp(&a.total_usd_volume)
                .then_with(|| a.chain_id.cmp(&b.chain_id))
        });
        out
    }

    fn token_aggregates(&self) -> Vec<TokenAggregate> {
        let mut out: Vec<TokenAggregate> = self
            .tokens
            .iter()
            .map(|e| TokenAggregate {
                token_symbol: e.key().clone(),
                count: e.count,
                total_usd_volume: e.volume,
            })
            .collect();
        out.sort_by(|a, b| {
            b.total_usd_volume
                .cmp(&a.total_usd_volume)
                .then_with(|| a.token_symbol.cmp(&b.token_symbol))
        });
        out
    }

    fn incomplete_chains(&self) -> Vec<IncompleteChain> {
        let sorted: BTreeMap<ChainId, Vec<String>> = self
            .incomplete
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        sorted
            .into_iter()
            .map(|(chain_id, reasons)| IncompleteChain { chain_id, reasons })
            .collect()
    }
}
