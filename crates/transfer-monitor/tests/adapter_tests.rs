use std::sync::Arc;

use alloy_primitives::{Address, B256, Bytes, U256};
use futures::executor::block_on;
use transfer_monitor::adapter::cursor::{CursorStore, FsCursorStore, InMemoryCursorStore};
use transfer_monitor::adapter::engine::{BatchPoll, ChainAdapter};
use transfer_monitor::adapter::memory::InMemoryChainSource;
use transfer_monitor::adapter::source::ChainSource;
use transfer_monitor::config::{ChainConfig, MonitorConfig, StartBlock};
use transfer_monitor::domain::decode::{RawLog, TRANSFER_TOPIC};
use transfer_monitor::domain::registry::TokenRegistry;
use transfer_monitor::domain::types::ChainId;
use transfer_monitor::metrics::counters::Counters;
use transfer_monitor::runtime::retry::RetryPolicy;

const USDT: &str = "0xdac17f958d2ee523a2206206994597c13d831ec7";

fn usdt() -> Address {
    USDT.parse().expect("address")
}

fn chain(start: StartBlock, end_block: Option<u64>) -> ChainConfig {
    let mut chain = ChainConfig::new(1, "ethereum").with_token(USDT, "USDT", 6, Some(1.0));
    chain.start = start;
    chain.end_block = end_block;
    chain.max_blocks_per_batch = 10;
    chain
}

fn topic(byte: u8) -> B256 {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(&[byte; 20]);
    B256::from(word)
}

fn transfer_log(block: u64, tx: u8, log_index: u64, amount: u64) -> RawLog {
    RawLog {
        address: usdt(),
        topics: vec![TRANSFER_TOPIC, topic(0x11), topic(0x22)],
        data: Bytes::from(U256::from(amount).to_be_bytes::<32>().to_vec()),
        block_number: block,
        block_timestamp: Some(1_700_000_000 + block),
        tx_hash: Some(B256::repeat_byte(tx)),
        log_index: Some(log_index),
        removed: false,
    }
}

struct Fixture {
    source: Arc<InMemoryChainSource>,
    cursors: Arc<dyn CursorStore>,
    counters: Arc<Counters>,
}

impl Fixture {
    fn new(logs: Vec<RawLog>) -> Self {
        Self {
            source: Arc::new(InMemoryChainSource::new(ChainId(1)).with_logs(logs)),
            cursors: Arc::new(InMemoryCursorStore::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    fn adapter(&self, chain: ChainConfig, retry: RetryPolicy) -> ChainAdapter {
        let config = MonitorConfig {
            chains: vec![chain.clone()],
            ..MonitorConfig::default()
        };
        let registry = Arc::new(TokenRegistry::from_config(&config).expect("registry"));
        ChainAdapter::new(
            chain,
            Arc::clone(&self.source) as Arc<dyn ChainSource>,
            Arc::clone(&self.cursors),
            registry,
            retry,
            Arc::clone(&self.counters),
        )
    }
}

fn quick_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff_ms: 1,
        max_backoff_ms: 1,
        multiplier: 1.0,
        jitter: false,
    }
}

fn ready(poll: BatchPoll) -> transfer_monitor::adapter::engine::TransferBatch {
    match poll {
        BatchPoll::Ready(batch) => batch,
        other => panic!("expected a batch, got {other:?}"),
    }
}

#[tokio::test]
async fn batches_are_bounded_and_ordered() {
    let fx = Fixture::new(vec![
        transfer_log(5, 2, 1, 10),
        transfer_log(5, 2, 0, 20),
        transfer_log(3, 1, 4, 30),
        transfer_log(14, 3, 0, 40),
    ]);
    let mut adapter = fx.adapter(chain(StartBlock::Block(1), Some(14)), quick_retry(1));

    let first = ready(adapter.next_batch().await.expect("batch"));
    assert_eq!((first.from_block, first.to_block), (1, 10));
    let order: Vec<(u64, u64)> = first
        .events
        .iter()
        .map(|e| (e.block_number, e.log_index))
        .collect();
    assert_eq!(order, vec![(3, 4), (5, 0), (5, 1)]);
    assert_eq!(first.events[0].token_symbol, "USDT");
    assert_eq!(first.events[0].from, Address::repeat_byte(0x11));

    let second = ready(adapter.next_batch().await.expect("batch"));
    assert_eq!((second.from_block, second.to_block), (11, 14));
    assert_eq!(second.events.len(), 1);

    assert_eq!(adapter.next_batch().await.expect("poll"), BatchPoll::Exhausted);
    assert!(adapter.is_exhausted());
    assert_eq!(fx.counters.snapshot().observed, 4);
}

#[tokio::test]
async fn latest_start_begins_after_head() {
    let fx = Fixture::new(vec![transfer_log(20, 1, 0, 10)]);
    let mut adapter = fx.adapter(chain(StartBlock::Latest, None), quick_retry(1));

    assert_eq!(adapter.next_batch().await.expect("poll"), BatchPoll::CaughtUp);
    assert_eq!(adapter.next_block(), Some(21));

    fx.source.push_log(transfer_log(22, 2, 0, 10));
    let batch = ready(adapter.next_batch().await.expect("batch"));
    assert_eq!((batch.from_block, batch.to_block), (21, 22));
    assert_eq!(batch.events.len(), 1);
}

#[tokio::test]
async fn resumes_after_persisted_cursor() {
    let fx = Fixture::new((1..=6).map(|b| transfer_log(b, b as u8, 0, 1)).collect());
    let mut adapter = fx.adapter(chain(StartBlock::Block(1), Some(6)), quick_retry(1));
    let mut first = ready(adapter.next_batch().await.expect("batch"));
    assert_eq!(first.events.len(), 6);

    // Only blocks up to 3 reached the admission stage before a restart.
    first.events.truncate(3);
    adapter.checkpoint(3).await.expect("checkpoint");
    adapter.checkpoint(2).await.expect("never moves back");
    assert_eq!(fx.cursors.load(ChainId(1)).await.expect("load"), Some(3));

    let mut restarted = fx.adapter(chain(StartBlock::Block(1), Some(6)), quick_retry(1));
    let batch = ready(restarted.next_batch().await.expect("batch"));
    assert_eq!(batch.from_block, 4);
    assert_eq!(batch.events.len(), 3);
    assert_eq!(restarted.persisted_cursor(), Some(3));
}

#[tokio::test]
async fn malformed_logs_are_counted_and_skipped() {
    let mut short_topics = transfer_log(2, 2, 0, 1);
    short_topics.topics.truncate(1);
    let mut no_index = transfer_log(2, 3, 0, 1);
    no_index.log_index = None;
    let mut other_event = transfer_log(2, 4, 0, 1);
    other_event.topics[0] = B256::repeat_byte(0x99);

    let fx = Fixture::new(vec![transfer_log(1, 1, 0, 1), short_topics, no_index, other_event]);
    let mut adapter = fx.adapter(chain(StartBlock::Block(1), Some(2)), quick_retry(1));
    let batch = ready(adapter.next_batch().await.expect("malformed logs are not fatal"));
    assert_eq!(batch.events.len(), 1);
    assert_eq!(fx.counters.snapshot().malformed, 3);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let fx = Fixture::new(vec![transfer_log(1, 1, 0, 1)]);
    fx.source.fail_next(2);
    let mut adapter = fx.adapter(chain(StartBlock::Block(1), Some(1)), quick_retry(3));
    let batch = ready(adapter.next_batch().await.expect("recovers"));
    assert_eq!(batch.events.len(), 1);
    assert_eq!(fx.counters.snapshot().rpc_errors, 2);
}

#[tokio::test]
async fn exhausted_retries_surface_transient_error() {
    let fx = Fixture::new(vec![transfer_log(1, 1, 0, 1)]);
    fx.source.fail_always();
    let mut adapter = fx.adapter(chain(StartBlock::Block(1), Some(1)), quick_retry(2));
    let err = adapter.next_batch().await.expect_err("source down");
    assert!(err.is_transient());
    assert_eq!(fx.counters.snapshot().rpc_errors, 2);

    fx.source.heal();
    let batch = ready(adapter.next_batch().await.expect("healed"));
    assert_eq!(batch.from_block, 1);
}

#[test]
fn fs_cursor_store_survives_reopen() {
    block_on(async {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = FsCursorStore::new(tmp.path().join("cursors")).expect("store");
        assert_eq!(store.load(ChainId(56)).await.expect("load"), None);
        store.save(ChainId(56), 41_000_000).await.expect("save");
        store.save(ChainId(56), 41_000_500).await.expect("save");
        store.save(ChainId(1), 19_000_000).await.expect("save");

        let reopened = FsCursorStore::new(tmp.path().join("cursors")).expect("reopen");
        assert_eq!(reopened.load(ChainId(56)).await.expect("load"), Some(41_000_500));
        assert_eq!(reopened.load(ChainId(1)).await.expect("load"), Some(19_000_000));
        let leftovers = std::fs::read_dir(tmp.path().join("cursors"))
            .expect("read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.path().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    });
}
