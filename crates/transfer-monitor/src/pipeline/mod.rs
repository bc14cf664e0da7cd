pub mod monitor;
pub mod worker;

use crate::domain::types::{ChainId, PricedTransfer};

/// What chain workers hand to the admission stage.
#[derive(Debug, Clone)]
pub enum StageMessage {
    /// Priced transfers of one batch, in block order.
    Transfers {
        chain_id: ChainId,
        transfers: Vec<PricedTransfer>,
    },
    /// The chain's data for this window is missing something.
    Degraded { chain_id: ChainId, reason: String },
    Stopped {
        chain_id: ChainId,
        cursor: Option<u64>,
    },
}
