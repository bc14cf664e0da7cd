use alloy_primitives::Address;

use crate::domain::decode::RawLog;
use crate::error::Result;

/// Read side of one chain. Connection-level failures are reported as
/// `Error::TransientNetwork` so callers can retry them.
#[async_trait::async_trait]
pub trait ChainSource: Send + Sync {
    async fn head(&self) -> Result<u64>;

    /// `Transfer` logs emitted by `contracts` in `[from, to]`, inclusive.
    async fn transfer_logs(&self, from: u64, to: u64, contracts: &[Address]) -> Result<Vec<RawLog>>;
}
