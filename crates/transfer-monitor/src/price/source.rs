use std::collections::{BTreeMap, HashMap};

use crate::config::MonitorConfig;
use crate::domain::registry::price_key_for;
use crate::error::Result;

#[async_trait::async_trait]
pub trait PriceSource: Send + Sync {
    /// USD price of `price_key` as of `at_secs`, or the nearest point the
    /// source has. `Ok(None)` means the source has no price; errors are
    /// retried only when transient.
    async fn price_at(&self, price_key: &str, at_secs: u64) -> Result<Option<f64>>;
}

/// Fixed per-token prices, independent of time.
#[derive(Debug, Default, Clone)]
pub struct StaticPriceSource {
    prices: HashMap<String, f64>,
}

impl StaticPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects `price_usd` entries from every configured token. The first
    /// chain to price a key wins.
    pub fn from_config(config: &MonitorConfig) -> Self {
        let mut source = Self::new();
        for chain in &config.chains {
            for token in chain.tokens.values() {
                if let Some(price) = token.price_usd {
                    source.prices.entry(price_key_for(token)).or_insert(price);
                }
            }
        }
        source
    }

    pub fn with_price(mut self, price_key: impl Into<String>, price_usd: f64) -> Self {
        self.prices.insert(price_key.into(), price_usd);
        self
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

#[async_trait::async_trait]
impl PriceSource for StaticPriceSource {
    async fn price_at(&self, price_key: &str, _at_secs: u64) -> Result<Option<f64>> {
        Ok(self.prices.get(price_key).copied())
    }
}

/// Timestamped price points; answers with the point closest to the
/// requested time, preferring the earlier one on a tie.
#[derive(Debug, Default, Clone)]
pub struct PriceHistory {
    points: HashMap<String, BTreeMap<u64, f64>>,
}

impl PriceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_point(mut self, price_key: impl Into<String>, at_secs: u64, price_usd: f64) -> Self {
        self.points
            .entry(price_key.into())
            .or_default()
            .insert(at_secs, price_usd);
        self
    }

    pub fn nearest(&self, price_key: &str, at_secs: u64) -> Option<f64> {
        let series = self.points.get(price_key)?;
        let before = series.range(..=at_secs).next_back();
        let after = series.range(at_secs..).next();
        match (before, after) {
            (Some((bt, bp)), Some((at, ap))) => {
                if at_secs - bt <= at - at_secs {
                    Some(*bp)
                } else {
                    Some(*ap)
                }
            }
            (Some((_, p)), None) | (None, Some((_, p))) => Some(*p),
            (None, None) => None,
        }
    }
}

#[async_trait::async_trait]
impl PriceSource for PriceHistory {
    async fn price_at(&self, price_key: &str, at_secs: u64) -> Result<Option<f64>> {
        Ok(self.nearest(price_key, at_secs))
    }
}
