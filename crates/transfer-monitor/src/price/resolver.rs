use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use quick_cache::sync::Cache;
use tracing::{debug, warn};

use crate::config::MonitorConfig;
use crate::domain::registry::TokenRegistry;
use crate::domain::types::{PricedTransfer, TransferEvent};
use crate::price::source::PriceSource;
use crate::price::{price_to_pico, usd_value};
use crate::runtime::retry::{RetryPolicy, retry_with_backoff};

type CacheKey = (String, u64);

#[derive(Debug, Clone, Copy)]
struct CachedPrice {
    pico: u128,
    fetched_at: Instant,
}

/// Prices transfers as of their own timestamp.
///
/// Lookups are cached per `(price_key, timestamp bucket)` and expire after
/// the configured TTL, so historical backfills and live events in the same
/// bucket share one upstream call.
pub struct PriceResolver {
    source: Arc<dyn PriceSource>,
    registry: Arc<TokenRegistry>,
    cache: Cache<CacheKey, CachedPrice>,
    ttl: Duration,
    bucket_secs: u64,
    retry: RetryPolicy,
    cache_hits: AtomicU64,
    source_calls: AtomicU64,
}

impl PriceResolver {
    pub fn new(
        source: Arc<dyn PriceSource>,
        registry: Arc<TokenRegistry>,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            source,
            registry,
            cache: Cache::new(config.price_cache_capacity.max(1)),
            ttl: config.price_cache_ttl(),
            bucket_secs: config.price_bucket_secs.max(1),
            retry: config.retry_policy.clone(),
            cache_hits: AtomicU64::new(0),
            source_calls: AtomicU64::new(0),
        }
    }

    /// Never fails: an unavailable price yields `usd_value: None`.
    pub async fn price(&self, event: TransferEvent) -> PricedTransfer {
        let usd_value = match self.registry.lookup(event.chain_id, &event.token_contract) {
            Some(token) => self
                .unit_price(&token.price_key, event.price_timestamp())
                .await
                .map(|pico| usd_value(&event.amount, pico)),
            None => {
                warn!(
                    chain = %event.chain_id,
                    contract = %event.token_contract,
                    "transfer for unregistered token"
                );
                None
            }
        };
        PricedTransfer { event, usd_value }
    }

    /// Pico-dollar price of `price_key` at `at_secs`.
    pub async fn unit_price(&self, price_key: &str, at_secs: u64) -> Option<u128> {
        let key = (price_key.to_string(), at_secs / self.bucket_secs);
        if let Some(cached) = self.cache.get(&key) {
            if cached.fetched_at.elapsed() < self.ttl {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Some(cached.pico);
            }
            self.cache.remove(&key);
        }

        let looked_up = retry_with_backoff(&self.retry, "price lookup", || {
            self.source_calls.fetch_add(1, Ordering::Relaxed);
            self.source.price_at(price_key, at_secs)
        })
        .await;

        match looked_up {
            Ok(Some(price)) => match price_to_pico(price) {
                Some(pico) => {
                    self.cache.insert(
                        key,
                        CachedPrice {
                            pico,
                            fetched_at: Instant::now(),
                        },
                    );
                    Some(pico)
                }
                None => {
                    warn!(price_key, at_secs, price, "discarding invalid feed price");
                    None
                }
            },
            Ok(None) => {
                debug!(price_key, at_secs, "price unavailable");
                None
            }
            Err(e) => {
                warn!(price_key, at_secs, error = %e, "price lookup failed");
                None
            }
        }
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn source_calls(&self) -> u64 {
        self.source_calls.load(Ordering::Relaxed)
    }
}
