use std::collections::HashMap;
use std::str::FromStr;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::config::{MonitorConfig, TokenConfig};
use crate::domain::types::ChainId;
use crate::error::{Error, Result};

pub const MAX_TOKEN_DECIMALS: u8 = 36;

/// Bridged variants priced as their canonical asset.
const BRIDGED_SUFFIXES: &[&str] = &[".e"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub contract: Address,
    pub symbol: String,
    pub decimals: u8,
    pub price_key: String,
}

#[derive(Debug, Default)]
pub struct TokenRegistry {
    tokens: HashMap<(ChainId, Address), TokenInfo>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &MonitorConfig) -> Result<Self> {
        let mut registry = Self::new();
        for chain in &config.chains {
            for (address, token) in &chain.tokens {
                let contract = Address::from_str(address).map_err(|e| {
                    Error::ConfigInvalid(format!("chains.{}.tokens.{address}: {e}", chain.chain_id))
                })?;
                registry.insert(
                    chain.chain_id,
                    TokenInfo {
                        contract,
                        symbol: canonical_symbol(&token.symbol),
                        decimals: token.decimals,
                        price_key: price_key_for(token),
                    },
                )?;
            }
        }
        Ok(registry)
    }

    pub fn insert(&mut self, chain_id: ChainId, info: TokenInfo) -> Result<()> {
        if info.decimals > MAX_TOKEN_DECIMALS {
            return Err(Error::ConfigInvalid(format!(
                "token {} on chain {chain_id} has {} decimals, max is {MAX_TOKEN_DECIMALS}",
                info.symbol, info.decimals
            )));
        }
        if self.tokens.contains_key(&(chain_id, info.contract)) {
            return Err(Error::ConfigInvalid(format!(
                "token {} registered twice on chain {chain_id}",
                info.contract
            )));
        }
        self.tokens.insert((chain_id, info.contract), info);
        Ok(())
    }

    pub fn lookup(&self, chain_id: ChainId, contract: &Address) -> Option<&TokenInfo> {
        self.tokens.get(&(chain_id, *contract))
    }

    /// Contracts watched on `chain_id`, sorted for stable log filters.
    pub fn contracts(&self, chain_id: ChainId) -> Vec<Address> {
        let mut out: Vec<Address> = self
            .tokens
            .keys()
            .filter(|(c, _)| *c == chain_id)
            .map(|(_, a)| *a)
            .collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

pub fn canonical_symbol(raw: &str) -> String {
    raw.trim().to_string()
}

/// Explicit `price_key`, else the symbol with any bridged suffix removed.
pub fn price_key_for(token: &TokenConfig) -> String {
    match token.price_key.as_deref() {
        Some(key) => canonical_symbol(key),
        None => default_price_key(&canonical_symbol(&token.symbol)),
    }
}

fn default_price_key(symbol: &str) -> String {
    for suffix in BRIDGED_SUFFIXES {
        if let Some(base) = symbol.strip_suffix(suffix)
            && !base.is_empty()
        {
            return base.to_string();
        }
    }
    symbol.to_string()
}
