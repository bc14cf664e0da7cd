use alloy_primitives::{Address, B256, Bytes, U256, b256};
use serde::{Deserialize, Serialize};

use crate::domain::registry::TokenRegistry;
use crate::domain::types::{ChainId, TokenAmount, TransferEvent};
use crate::error::{Error, Result};

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

/// Log as delivered by a chain source, before token normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub block_timestamp: Option<u64>,
    pub tx_hash: Option<B256>,
    pub log_index: Option<u64>,
    #[serde(default)]
    pub removed: bool,
}

/// Decodes an ERC-20 `Transfer` log. `Ok(None)` means the log is not one we
/// watch (unregistered contract or a log removed by a reorg).
pub fn decode_transfer_log(
    chain_id: ChainId,
    registry: &TokenRegistry,
    log: &RawLog,
    observed_at_ms: u64,
) -> Result<Option<TransferEvent>> {
    if log.removed {
        return Ok(None);
    }
    let Some(token) = registry.lookup(chain_id, &log.address) else {
        return Ok(None);
    };
    let malformed = |reason: String| Error::MalformedEvent {
        chain: chain_id,
        reason,
    };

    if log.topics.len() < 3 {
        return Err(malformed(format!(
            "expected at least 3 topics, got {} (contract {}, block {})",
            log.topics.len(),
            log.address,
            log.block_number
        )));
    }
    if log.topics[0] != TRANSFER_TOPIC {
        return Err(malformed(format!(
            "unexpected topic0 {} (contract {}, block {})",
            log.topics[0], log.address, log.block_number
        )));
    }
    if log.data.len() != 32 {
        return Err(malformed(format!(
            "amount must be one 32-byte word, got 0x{} (contract {}, block {})",
            hex::encode(&log.data),
            log.address,
            log.block_number
        )));
    }
    let tx_hash = log.tx_hash.ok_or_else(|| {
        malformed(format!(
            "missing tx hash (contract {}, block {})",
            log.address, log.block_number
        ))
    })?;
    let log_index = log.log_index.ok_or_else(|| {
        malformed(format!(
            "missing log index (tx {tx_hash}, block {})",
            log.block_number
        ))
    })?;

    Ok(Some(TransferEvent {
        chain_id,
        token_contract: token.contract,
        token_symbol: token.symbol.clone(),
        from: topic_address(&log.topics[1]),
        to: topic_address(&log.topics[2]),
        amount: TokenAmount {
            raw: U256::from_be_slice(&log.data),
            decimals: token.decimals,
        },
        tx_hash,
        log_index,
        block_number: log.block_number,
        block_timestamp: log.block_timestamp,
        observed_at_ms,
    }))
}

fn topic_address(topic: &B256) -> Address {
    Address::from_slice(&topic[12..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::registry::TokenInfo;

    fn registry() -> (TokenRegistry, Address) {
        let usdc = Address::repeat_byte(0xaa);
        let mut registry = TokenRegistry::new();
        registry
            .insert(
                ChainId(56),
                TokenInfo {
                    contract: usdc,
                    symbol: "USDC".to_string(),
                    decimals: 6,
                    price_key: "USDC".to_string(),
                },
            )
            .expect("insert");
        (registry, usdc)
    }

    fn transfer_log(contract: Address, amount: u64) -> RawLog {
        let mut from = [0u8; 32];
        from[12..].copy_from_slice(&[0x11; 20]);
        let mut to = [0u8; 32];
        to[12..].copy_from_slice(&[0x22; 20]);
        RawLog {
            address: contract,
            topics: vec![TRANSFER_TOPIC, B256::from(from), B256::from(to)],
            data: Bytes::from(U256::from(amount).to_be_bytes::<32>().to_vec()),
            block_number: 7,
            block_timestamp: Some(1_700_000_000),
            tx_hash: Some(B256::repeat_byte(0xab)),
            log_index: Some(3),
            removed: false,
        }
    }

    #[test]
    fn decodes_registered_transfer() {
        let (registry, usdc) = registry();
        let ev = decode_transfer_log(ChainId(56), &registry, &transfer_log(usdc, 5_000_000), 42)
            .expect("decode")
            .expect("registered");
        assert_eq!(ev.token_symbol, "USDC");
        assert_eq!(ev.from, Address::repeat_byte(0x11));
        assert_eq!(ev.to, Address::repeat_byte(0x22));
        assert_eq!(ev.amount.raw, U256::from(5_000_000u64));
        assert_eq!(ev.amount.decimals, 6);
        assert_eq!(ev.log_index, 3);
    }

    #[test]
    fn skips_unregistered_and_removed_logs() {
        let (registry, usdc) = registry();
        let unknown = transfer_log(Address::repeat_byte(0x01), 1);
        assert!(
            decode_transfer_log(ChainId(56), &registry, &unknown, 0)
                .expect("decode")
                .is_none()
        );
        let mut removed = transfer_log(usdc, 1);
        removed.removed = true;
        assert!(
            decode_transfer_log(ChainId(56), &registry, &removed, 0)
                .expect("decode")
                .is_none()
        );
    }

    #[test]
    fn rejects_malformed_transfer() {
        let (registry, usdc) = registry();
        let mut log = transfer_log(usdc, 1);
        log.data = Bytes::new();
        let err = decode_transfer_log(ChainId(56), &registry, &log, 0).expect_err("empty data");
        assert!(matches!(err, Error::MalformedEvent { .. }));

        let mut log = transfer_log(usdc, 1);
        log.topics.truncate(2);
        let err = decode_transfer_log(ChainId(56), &registry, &log, 0).expect_err("topics");
        assert!(err.to_string().contains("expected at least 3 topics"));
    }

    #[test]
    fn extra_topics_are_ignored() {
        let (registry, usdc) = registry();
        let mut log = transfer_log(usdc, 9);
        log.topics.push(B256::repeat_byte(0x33));
        let ev = decode_transfer_log(ChainId(56), &registry, &log, 0)
            .expect("decode")
            .expect("registered");
        assert_eq!(ev.to, Address::repeat_byte(0x22));
        assert_eq!(ev.amount.raw, U256::from(9u64));
    }
}
