use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::adapter::engine::{BatchPoll, ChainAdapter};
use crate::domain::types::{ChainId, PricedTransfer, TransferEvent};
use crate::error::{Error, Result};
use crate::metrics::counters::Counters;
use crate::pipeline::StageMessage;
use crate::price::pending::PendingPrices;
use crate::price::resolver::PriceResolver;
use crate::runtime::bounded_queue::QueueSender;
use crate::runtime::retry::RetryPolicy;

/// Adapter plus resolver for one chain, run as its own task until the
/// shutdown signal fires or a bounded range is fully delivered.
pub struct ChainWorker {
    adapter: ChainAdapter,
    resolver: Arc<PriceResolver>,
    pending: PendingPrices,
    queue: QueueSender<StageMessage>,
    shutdown: watch::Receiver<bool>,
    counters: Arc<Counters>,
    delivered_to: Option<u64>,
}

impl ChainWorker {
    pub fn new(
        adapter: ChainAdapter,
        resolver: Arc<PriceResolver>,
        price_retry: RetryPolicy,
        queue: QueueSender<StageMessage>,
        shutdown: watch::Receiver<bool>,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            adapter,
            resolver,
            pending: PendingPrices::new(price_retry),
            queue,
            shutdown,
            counters,
            delivered_to: None,
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.adapter.chain_id()
    }

    pub async fn run(mut self) -> Result<()> {
        let chain_id = self.chain_id();
        info!(chain = %chain_id, name = %self.adapter.chain().name, "chain worker started");
        while !self.stopping() {
            self.retry_pending().await?;

            match self.adapter.next_batch().await {
                Ok(BatchPoll::Ready(batch)) => {
                    let mut priced = Vec::with_capacity(batch.events.len());
                    for event in batch.events {
                        if let Some(transfer) = self.price_or_hold(event).await? {
                            priced.push(transfer);
                        }
                    }
                    self.forward(priced).await?;
                    self.delivered_to = Some(batch.to_block);
                    self.advance_cursor().await?;
                }
                Ok(BatchPoll::CaughtUp) => {
                    self.idle(self.adapter.chain().poll_interval()).await;
                }
                Ok(BatchPoll::Exhausted) => {
                    if self.pending.is_empty() {
                        info!(chain = %chain_id, "configured block range delivered");
                        break;
                    }
                    let wait = self
                        .pending
                        .next_due()
                        .map(|due| due.saturating_duration_since(Instant::now()))
                        .unwrap_or_default();
                    self.idle(wait).await;
                }
                Err(e) => {
                    warn!(chain = %chain_id, error = %e, "chain read failed after retries");
                    self.degrade(format!("chain read failed: {e}")).await?;
                    self.idle(self.adapter.chain().poll_interval()).await;
                }
            }
        }
        self.finish().await
    }

    async fn price_or_hold(&mut self, event: TransferEvent) -> Result<Option<PricedTransfer>> {
        let priced = self.resolver.price(event).await;
        if priced.usd_value.is_some() {
            return Ok(Some(priced));
        }
        self.counters.inc_price_retry();
        debug!(key = %priced.key(), "price unavailable, holding transfer");
        match self.pending.hold(priced.event, Instant::now()) {
            None => Ok(None),
            Some(event) => self.give_up_on_price(event).await.map(Some),
        }
    }

    async fn retry_pending(&mut self) -> Result<()> {
        let due = self.pending.take_due(Instant::now());
        if due.is_empty() {
            return Ok(());
        }
        let mut priced = Vec::new();
        for held in due {
            let attempt = self.resolver.price(held.event.clone()).await;
            if attempt.usd_value.is_some() {
                priced.push(attempt);
                continue;
            }
            self.counters.inc_price_retry();
            if let Some(event) = self.pending.schedule(held, Instant::now()) {
                priced.push(self.give_up_on_price(event).await?);
            }
        }
        // May trail transfers of later blocks; admission is keyed by identity.
        priced.sort_by_key(|t| (t.event.block_number, t.event.log_index));
        self.forward(priced).await?;
        self.advance_cursor().await
    }

    async fn give_up_on_price(&self, event: TransferEvent) -> Result<PricedTransfer> {
        warn!(
            key = %event.key(),
            token = %event.token_symbol,
            at = event.price_timestamp(),
            "price retries exhausted, forwarding unpriced"
        );
        self.degrade(format!("price unavailable for {}", event.token_symbol))
            .await?;
        Ok(PricedTransfer {
            event,
            usd_value: None,
        })
    }

    /// The cursor stays below the oldest transfer still waiting for a price
    /// so a restart re-reads it.
    fn checkpoint_target(&self) -> Option<u64> {
        let delivered = self.delivered_to?;
        match self.pending.oldest_block() {
            Some(oldest) => oldest.checked_sub(1).map(|below| below.min(delivered)),
            None => Some(delivered),
        }
    }

    async fn advance_cursor(&mut self) -> Result<()> {
        match self.checkpoint_target() {
            Some(target) => self.persist_cursor(target).await,
            None => Ok(()),
        }
    }

    async fn persist_cursor(&mut self, target: u64) -> Result<()> {
        if let Err(e) = self.adapter.checkpoint(target).await {
            warn!(chain = %self.chain_id(), block = target, error = %e, "cursor checkpoint failed");
            self.degrade(format!("cursor checkpoint failed: {e}")).await?;
        }
        Ok(())
    }

    /// Transfers still held at close are reported unpriced for this window,
    /// but the cursor is saved below them first so the next run prices them
    /// again.
    async fn finish(mut self) -> Result<()> {
        let chain_id = self.chain_id();
        let target = self.checkpoint_target();
        if let Some(target) = target {
            self.persist_cursor(target).await?;
        }
        if !self.pending.is_empty() {
            let held = self.pending.drain();
            warn!(
                chain = %chain_id,
                held = held.len(),
                ?target,
                "window closing with unpriced transfers, cursor kept behind them"
            );
            self.degrade(format!("{} transfers still awaiting a price at close", held.len()))
                .await?;
            let unpriced = held
                .into_iter()
                .map(|h| PricedTransfer {
                    event: h.event,
                    usd_value: None,
                })
                .collect();
            self.forward(unpriced).await?;
        }
        let cursor = self.adapter.persisted_cursor();
        self.send(StageMessage::Stopped { chain_id, cursor }).await?;
        info!(chain = %chain_id, ?cursor, "chain worker stopped");
        Ok(())
    }

    async fn forward(&self, transfers: Vec<PricedTransfer>) -> Result<()> {
        if transfers.is_empty() {
            return Ok(());
        }
        self.send(StageMessage::Transfers {
            chain_id: self.chain_id(),
            transfers,
        })
        .await
    }

    async fn degrade(&self, reason: String) -> Result<()> {
        self.send(StageMessage::Degraded {
            chain_id: self.chain_id(),
            reason,
        })
        .await
    }

    async fn send(&self, message: StageMessage) -> Result<()> {
        self.queue
            .send(message)
            .await
            .map_err(|_| Error::Backend(format!("admission stage gone (chain {})", self.chain_id())))
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow() || self.shutdown.has_changed().is_err()
    }

    async fn idle(&mut self, wait: Duration) {
        if self.stopping() {
            return;
        }
        let wait = match self.pending.next_due() {
            Some(due) => wait.min(due.saturating_duration_since(Instant::now())),
            None => wait,
        };
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = self.shutdown.changed() => {}
        }
    }
}
