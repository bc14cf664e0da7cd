use std::sync::Arc;

use alloy_primitives::Address;
use tracing::{debug, info, warn};

use crate::adapter::cursor::CursorStore;
use crate::adapter::source::ChainSource;
use crate::config::{ChainConfig, StartBlock};
use crate::domain::decode::decode_transfer_log;
use crate::domain::registry::TokenRegistry;
use crate::domain::types::{ChainId, TransferEvent, unix_millis};
use crate::error::Result;
use crate::metrics::counters::Counters;
use crate::runtime::retry::{RetryPolicy, retry_with_backoff};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferBatch {
    pub chain_id: ChainId,
    pub from_block: u64,
    pub to_block: u64,
    /// Ordered by `(block_number, log_index)`.
    pub events: Vec<TransferEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchPoll {
    Ready(TransferBatch),
    /// Nothing new past the head yet.
    CaughtUp,
    /// The configured `end_block` has been delivered.
    Exhausted,
}

/// Pull-based reader over one chain's `Transfer` logs.
///
/// Reading position and persisted cursor are tracked separately: a batch
/// advances the reading position immediately, but the cursor only moves when
/// the caller reports the batch as handed downstream via `checkpoint`.
pub struct ChainAdapter {
    chain: ChainConfig,
    source: Arc<dyn ChainSource>,
    cursors: Arc<dyn CursorStore>,
    registry: Arc<TokenRegistry>,
    contracts: Vec<Address>,
    retry: RetryPolicy,
    counters: Arc<Counters>,
    next_block: Option<u64>,
    persisted: Option<u64>,
}

impl ChainAdapter {
    pub fn new(
        chain: ChainConfig,
        source: Arc<dyn ChainSource>,
        cursors: Arc<dyn CursorStore>,
        registry: Arc<TokenRegistry>,
        retry: RetryPolicy,
        counters: Arc<Counters>,
    ) -> Self {
        let contracts = registry.contracts(chain.chain_id);
        Self {
            chain,
            source,
            cursors,
            registry,
            contracts,
            retry,
            counters,
            next_block: None,
            persisted: None,
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain.chain_id
    }

    pub fn chain(&self) -> &ChainConfig {
        &self.chain
    }

    pub fn next_block(&self) -> Option<u64> {
        self.next_block
    }

    pub fn persisted_cursor(&self) -> Option<u64> {
        self.persisted
    }

    pub fn is_exhausted(&self) -> bool {
        match (self.chain.end_block, self.next_block) {
            (Some(end), Some(next)) => next > end,
            _ => false,
        }
    }

    pub async fn next_batch(&mut self) -> Result<BatchPoll> {
        let from = match self.next_block {
            Some(next) => next,
            None => {
                let start = self.resolve_start().await?;
                self.next_block = Some(start);
                start
            }
        };
        if let Some(end) = self.chain.end_block
            && from > end
        {
            return Ok(BatchPoll::Exhausted);
        }

        let head = self.fetch_head().await?;
        let mut to = head.min(from.saturating_add(self.chain.max_blocks_per_batch.max(1) - 1));
        if let Some(end) = self.chain.end_block {
            to = to.min(end);
        }
        if from > to {
            return Ok(BatchPoll::CaughtUp);
        }

        let events = if self.contracts.is_empty() {
            Vec::new()
        } else {
            self.fetch_events(from, to).await?
        };
        self.next_block = Some(to + 1);
        debug!(
            chain = %self.chain.chain_id,
            from,
            to,
            events = events.len(),
            "batch fetched"
        );
        Ok(BatchPoll::Ready(TransferBatch {
            chain_id: self.chain.chain_id,
            from_block: from,
            to_block: to,
            events,
        }))
    }

    /// Persists `block` as fully handed downstream. Never moves backwards.
    pub async fn checkpoint(&mut self, block: u64) -> Result<()> {
        if self.persisted.is_some_and(|p| block <= p) {
            return Ok(());
        }
        let chain_id = self.chain.chain_id;
        let cursors = &self.cursors;
        retry_with_backoff(&self.retry, "cursor save", move || cursors.save(chain_id, block)).await?;
        self.persisted = Some(block);
        debug!(chain = %chain_id, block, "cursor checkpointed");
        Ok(())
    }

    async fn resolve_start(&mut self) -> Result<u64> {
        let chain_id = self.chain.chain_id;
        let cursors = &self.cursors;
        let saved = retry_with_backoff(&self.retry, "cursor load", move || cursors.load(chain_id)).await?;
        if let Some(cursor) = saved {
            self.persisted = Some(cursor);
            info!(chain = %chain_id, cursor, "resuming from cursor");
            return Ok(cursor + 1);
        }
        let start = match self.chain.start {
            StartBlock::Block(block) => block,
            StartBlock::Latest => self.fetch_head().await? + 1,
        };
        info!(chain = %chain_id, start, "starting without cursor");
        Ok(start)
    }

    async fn fetch_head(&self) -> Result<u64> {
        let source = &self.source;
        let counters = &self.counters;
        retry_with_backoff(&self.retry, "chain head", move || async move {
            let head = source.head().await;
            if head.is_err() {
                counters.inc_rpc_error();
            }
            head
        })
        .await
    }

    async fn fetch_events(&self, from: u64, to: u64) -> Result<Vec<TransferEvent>> {
        let source = &self.source;
        let counters = &self.counters;
        let contracts = self.contracts.as_slice();
        let logs = retry_with_backoff(&self.retry, "transfer logs", move || async move {
            let logs = source.transfer_logs(from, to, contracts).await;
            if logs.is_err() {
                counters.inc_rpc_error();
            }
            logs
        })
        .await?;

        let observed_at_ms = unix_millis();
        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            match decode_transfer_log(self.chain.chain_id, &self.registry, log, observed_at_ms) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => {
                    self.counters.inc_malformed();
                    warn!(
                        chain = %self.chain.chain_id,
                        contract = %log.address,
                        block = log.block_number,
                        tx = ?log.tx_hash,
                        log_index = ?log.log_index,
                        topics = log.topics.len(),
                        error = %e,
                        "skipping malformed transfer log"
                    );
                }
            }
        }
        events.sort_by_key(|e| (e.block_number, e.log_index));
        self.counters.inc_observed(events.len() as u64);
        Ok(events)
    }
}
