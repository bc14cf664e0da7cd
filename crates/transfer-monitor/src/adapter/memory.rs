use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use alloy_primitives::Address;
use parking_lot::Mutex;

use crate::adapter::source::ChainSource;
use crate::domain::decode::RawLog;
use crate::domain::types::ChainId;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct State {
    head: u64,
    logs: BTreeMap<u64, Vec<RawLog>>,
    failures_left: u32,
    failing: bool,
}

/// Chain held in memory, for backfills from captured logs and for tests.
/// Failures can be scripted to exercise retry and degradation paths.
#[derive(Debug)]
pub struct InMemoryChainSource {
    chain_id: ChainId,
    state: Mutex<State>,
    calls: AtomicU64,
}

impl InMemoryChainSource {
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            state: Mutex::new(State::default()),
            calls: AtomicU64::new(0),
        }
    }

    pub fn with_logs(self, logs: impl IntoIterator<Item = RawLog>) -> Self {
        for log in logs {
            self.push_log(log);
        }
        self
    }

    /// Appends a log, raising the head to its block if needed.
    pub fn push_log(&self, log: RawLog) {
        let mut state = self.state.lock();
        state.head = state.head.max(log.block_number);
        state.logs.entry(log.block_number).or_default().push(log);
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().head = head;
    }

    /// The next `n` calls fail with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.state.lock().failures_left = n;
    }

    /// Every call fails until `heal`.
    pub fn fail_always(&self) {
        self.state.lock().failing = true;
    }

    pub fn heal(&self) {
        let mut state = self.state.lock();
        state.failing = false;
        state.failures_left = 0;
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn check_failure(&self, method: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        let fail = if state.failing {
            true
        } else if state.failures_left > 0 {
            state.failures_left -= 1;
            true
        } else {
            false
        };
        if fail {
            return Err(Error::TransientNetwork {
                chain: self.chain_id,
                message: format!("scripted failure in {method}"),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ChainSource for InMemoryChainSource {
    async fn head(&self) -> Result<u64> {
        self.check_failure("head")?;
        Ok(self.state.lock().head)
    }

    async fn transfer_logs(&self, from: u64, to: u64, contracts: &[Address]) -> Result<Vec<RawLog>> {
        self.check_failure("transfer_logs")?;
        if from > to {
            return Ok(Vec::new());
        }
        let state = self.state.lock();
        Ok(state
            .logs
            .range(from..=to)
            .flat_map(|(_, logs)| logs.iter())
            .filter(|log| contracts.contains(&log.address))
            .cloned()
            .collect())
    }
}
