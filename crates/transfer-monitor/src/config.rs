use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::Address;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::domain::registry::MAX_TOKEN_DECIMALS;
use crate::domain::types::{ChainId, UsdCents};
use crate::error::{Error, Result};
use crate::runtime::retry::RetryPolicy;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub threshold_usd: f64,
    pub max_plausible_usd: Option<f64>,
    pub chains: Vec<ChainConfig>,
    pub top_n: usize,
    pub dedup_window_blocks: u64,
    pub price_cache_ttl_secs: u64,
    pub price_bucket_secs: u64,
    pub price_cache_capacity: usize,
    pub event_queue_capacity: usize,
    pub outlier_sample_limit: usize,
    pub retry_policy: RetryPolicy,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: ChainId,
    pub name: String,
    #[serde(default)]
    pub rpc_url: Option<String>,
    #[serde(default)]
    pub start: StartBlock,
    #[serde(default)]
    pub end_block: Option<u64>,
    #[serde(default = "default_max_blocks_per_batch")]
    pub max_blocks_per_batch: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub tokens: BTreeMap<String, TokenConfig>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TokenConfig {
    pub symbol: String,
    pub decimals: u8,
    #[serde(default)]
    pub price_usd: Option<f64>,
    #[serde(default)]
    pub price_key: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StartBlock {
    #[default]
    Latest,
    Block(u64),
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            threshold_usd: 100_000.0,
            max_plausible_usd: Some(1_000_000_000_000.0),
            chains: Vec::new(),
            top_n: 50,
            dedup_window_blocks: 10_000,
            price_cache_ttl_secs: 60,
            price_bucket_secs: 60,
            price_cache_capacity: 10_000,
            event_queue_capacity: 8_192,
            outlier_sample_limit: 100,
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl ChainConfig {
    pub fn new(chain_id: u64, name: impl Into<String>) -> Self {
        Self {
            chain_id: ChainId(chain_id),
            name: name.into(),
            rpc_url: None,
            start: StartBlock::Latest,
            end_block: None,
            max_blocks_per_batch: default_max_blocks_per_batch(),
            poll_interval_ms: default_poll_interval_ms(),
            tokens: BTreeMap::new(),
        }
    }

    pub fn with_token(
        mut self,
        address: impl Into<String>,
        symbol: impl Into<String>,
        decimals: u8,
        price_usd: Option<f64>,
    ) -> Self {
        self.tokens.insert(
            address.into(),
            TokenConfig {
                symbol: symbol.into(),
                decimals,
                price_usd,
                price_key: None,
            },
        );
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_max_blocks_per_batch() -> u64 {
    500
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

impl MonitorConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| Error::Serialization(format!("json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Backend(format!("read config {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if UsdCents::from_dollars(self.threshold_usd).is_none() {
            return Err(Error::ConfigInvalid(
                "threshold_usd must be a finite value >= 0".to_string(),
            ));
        }
        if let Some(max) = self.max_plausible_usd
            && (!max.is_finite() || max <= self.threshold_usd)
        {
            return Err(Error::ConfigInvalid(
                "max_plausible_usd must be finite and > threshold_usd".to_string(),
            ));
        }
        if self.top_n < 1 {
            return Err(Error::ConfigInvalid("top_n must be >= 1".to_string()));
        }
        if self.dedup_window_blocks < 1 {
            return Err(Error::ConfigInvalid(
                "dedup_window_blocks must be >= 1".to_string(),
            ));
        }
        if self.price_bucket_secs < 1 {
            return Err(Error::ConfigInvalid(
                "price_bucket_secs must be >= 1".to_string(),
            ));
        }
        if self.price_cache_capacity < 1 {
            return Err(Error::ConfigInvalid(
                "price_cache_capacity must be >= 1".to_string(),
            ));
        }
        if self.event_queue_capacity < 1 {
            return Err(Error::ConfigInvalid(
                "event_queue_capacity must be >= 1".to_string(),
            ));
        }
        self.retry_policy.validate()?;
        if self.chains.is_empty() {
            return Err(Error::ConfigInvalid(
                "chains must name at least one chain".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.chain_id) {
                return Err(Error::ConfigInvalid(format!(
                    "chains.{} is configured twice",
                    chain.chain_id
                )));
            }
            validate_chain(chain)?;
        }
        Ok(())
    }

    pub fn threshold(&self) -> UsdCents {
        UsdCents::from_dollars(self.threshold_usd).unwrap_or(UsdCents::ZERO)
    }

    pub fn max_plausible(&self) -> Option<UsdCents> {
        self.max_plausible_usd.and_then(UsdCents::from_dollars)
    }

    pub fn price_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.price_cache_ttl_secs)
    }

    pub fn chain(&self, chain_id: ChainId) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }

    pub fn config_hash(&self) -> Result<String> {
        let json =
            serde_json::to_value(self).map_err(|e| Error::Serialization(format!("json: {e}")))?;
        let canonical = serde_json_canonicalizer::to_vec(&json)
            .map_err(|e| Error::Serialization(format!("canonical-json: {e}")))?;
        let mut hasher = Sha256::new();
        hasher.update(canonical);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

fn validate_chain(chain: &ChainConfig) -> Result<()> {
    let id = chain.chain_id;
    if chain.max_blocks_per_batch < 1 {
        return Err(Error::ConfigInvalid(format!(
            "chains.{id}.max_blocks_per_batch must be >= 1"
        )));
    }
    if let (StartBlock::Block(start), Some(end)) = (chain.start, chain.end_block)
        && end < start
    {
        return Err(Error::ConfigInvalid(format!(
            "chains.{id} requires start <= end_block"
        )));
    }
    if chain.tokens.is_empty() {
        return Err(Error::ConfigInvalid(format!(
            "chains.{id}.tokens must not be empty"
        )));
    }
    for (address, token) in &chain.tokens {
        if Address::from_str(address).is_err() {
            return Err(Error::ConfigInvalid(format!(
                "chains.{id}.tokens.{address} is not a 20-byte hex address"
            )));
        }
        if token.symbol.trim().is_empty() {
            return Err(Error::ConfigInvalid(format!(
                "chains.{id}.tokens.{address}.symbol must not be empty"
            )));
        }
        if token.decimals > MAX_TOKEN_DECIMALS {
            return Err(Error::ConfigInvalid(format!(
                "chains.{id}.tokens.{address}.decimals must be <= {MAX_TOKEN_DECIMALS}"
            )));
        }
        if let Some(price) = token.price_usd
            && (!price.is_finite() || price < 0.0)
        {
            return Err(Error::ConfigInvalid(format!(
                "chains.{id}.tokens.{address}.price_usd must be finite and >= 0"
            )));
        }
    }
    Ok(())
}

impl Serialize for StartBlock {
    fn serialize<S>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Latest => serializer.serialize_str("latest"),
            Self::Block(v) => serializer.serialize_u64(*v),
        }
    }
}

impl<'de> Deserialize<'de> for StartBlock {
    fn deserialize<D>(deserializer: D) -> core::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct StartBlockVisitor;
        impl<'de> Visitor<'de> for StartBlockVisitor {
            type Value = StartBlock;
            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "\"latest\" or block number")
            }
            fn visit_str<E>(self, v: &str) -> core::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                if v == "latest" {
                    Ok(StartBlock::Latest)
                } else {
                    Err(E::custom("start string form must be \"latest\""))
                }
            }
            fn visit_u64<E>(self, v: u64) -> core::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(StartBlock::Block(v))
            }
        }
        deserializer.deserialize_any(StartBlockVisitor)
    }
}
