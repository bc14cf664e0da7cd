use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a transfer across re-observations: a log is uniquely named by
/// the transaction that emitted it and its index within the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub chain_id: ChainId,
    pub tx_hash: B256,
    pub log_index: u64,
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.chain_id, self.tx_hash, self.log_index)
    }
}

/// USD amount in integer cents.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UsdCents(pub u128);

impl UsdCents {
    pub const ZERO: Self = Self(0);

    pub fn from_dollars(dollars: f64) -> Option<Self> {
        if !dollars.is_finite() || dollars < 0.0 {
            return None;
        }
        let cents = (dollars * 100.0).round();
        if cents >= u128::MAX as f64 {
            return Some(Self(u128::MAX));
        }
        Some(Self(cents as u128))
    }

    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub fn as_dollars(self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl fmt::Display for UsdCents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenAmount {
    pub raw: U256,
    pub decimals: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub chain_id: ChainId,
    pub token_contract: Address,
    pub token_symbol: String,
    pub from: Address,
    pub to: Address,
    pub amount: TokenAmount,
    pub tx_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
    pub block_timestamp: Option<u64>,
    pub observed_at_ms: u64,
}

impl TransferEvent {
    pub fn key(&self) -> EventKey {
        EventKey {
            chain_id: self.chain_id,
            tx_hash: self.tx_hash,
            log_index: self.log_index,
        }
    }

    /// Seconds timestamp the event should be priced at. Falls back to the
    /// observation time when the source did not report a block timestamp.
    pub fn price_timestamp(&self) -> u64 {
        self.block_timestamp.unwrap_or(self.observed_at_ms / 1_000)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedTransfer {
    pub event: TransferEvent,
    pub usd_value: Option<UsdCents>,
}

impl PricedTransfer {
    pub fn key(&self) -> EventKey {
        self.event.key()
    }
}

pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
