use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, B256, Bytes};
use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::adapter::source::ChainSource;
use crate::domain::decode::{RawLog, TRANSFER_TOPIC};
use crate::domain::types::ChainId;
use crate::error::{Error, Result};

// Node-side "limit exceeded"; succeeds when retried later or with a smaller range.
const RPC_LIMIT_EXCEEDED: i64 = -32005;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: Address,
    topics: Vec<B256>,
    data: Bytes,
    block_number: String,
    #[serde(default)]
    block_timestamp: Option<String>,
    #[serde(default)]
    transaction_hash: Option<B256>,
    #[serde(default)]
    log_index: Option<String>,
    #[serde(default)]
    removed: bool,
}

/// `eth_blockNumber` / `eth_getLogs` over HTTP JSON-RPC.
pub struct JsonRpcSource {
    chain_id: ChainId,
    url: String,
    client: HttpClient,
    next_id: AtomicU64,
}

impl JsonRpcSource {
    pub fn new(chain_id: ChainId, url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Backend(format!("build http client: {e}")))?;
        Ok(Self {
            chain_id,
            url: url.into(),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    fn transient(&self, message: String) -> Error {
        Error::TransientNetwork {
            chain: self.chain_id,
            message,
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transient(format!("{method}: {e}")))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(self.transient(format!("{method}: http status {status}")));
        }
        if !status.is_success() {
            return Err(Error::Backend(format!("{method}: http status {status}")));
        }

        let body: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| self.transient(format!("{method}: decode response: {e}")))?;
        if let Some(err) = body.error {
            let message = format!("{method}: rpc error {}: {}", err.code, err.message);
            if err.code == RPC_LIMIT_EXCEEDED {
                return Err(self.transient(message));
            }
            return Err(Error::Backend(message));
        }
        body.result
            .ok_or_else(|| self.transient(format!("{method}: empty result")))
    }
}

#[async_trait::async_trait]
impl ChainSource for JsonRpcSource {
    async fn head(&self) -> Result<u64> {
        let raw: String = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity(&raw).map_err(|e| self.transient(format!("eth_blockNumber: {e}")))
    }

    async fn transfer_logs(&self, from: u64, to: u64, contracts: &[Address]) -> Result<Vec<RawLog>> {
        let filter = json!([{
            "fromBlock": format!("{from:#x}"),
            "toBlock": format!("{to:#x}"),
            "address": contracts,
            "topics": [TRANSFER_TOPIC],
        }]);
        let logs: Vec<RpcLog> = self.call("eth_getLogs", filter).await?;
        debug!(chain = %self.chain_id, from, to, logs = logs.len(), "eth_getLogs");
        logs.into_iter()
            .map(|log| {
                let block_number = parse_quantity(&log.block_number).map_err(|e| {
                    Error::MalformedEvent {
                        chain: self.chain_id,
                        reason: format!("blockNumber: {e}"),
                    }
                })?;
                Ok(RawLog {
                    address: log.address,
                    topics: log.topics,
                    data: log.data,
                    block_number,
                    block_timestamp: log
                        .block_timestamp
                        .as_deref()
                        .and_then(|t| parse_quantity(t).ok()),
                    tx_hash: log.transaction_hash,
                    log_index: log.log_index.as_deref().and_then(|i| parse_quantity(i).ok()),
                    removed: log.removed,
                })
            })
            .collect()
    }
}

fn parse_quantity(raw: &str) -> core::result::Result<u64, String> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| format!("quantity {raw:?} lacks 0x prefix"))?;
    u64::from_str_radix(digits, 16).map_err(|e| format!("quantity {raw:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_quantities() {
        assert_eq!(parse_quantity("0x1b4"), Ok(436));
        assert!(parse_quantity("436").is_err());
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn decodes_rpc_log_shape() {
        let raw = r#"{
            "address": "0x55d398326f99059ff775485246999027b3197955",
            "topics": [
                "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef",
                "0x000000000000000000000000aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                "0x000000000000000000000000bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"
            ],
            "data": "0x00000000000000000000000000000000000000000000152d02c7e14af6800000",
            "blockNumber": "0x2a",
            "transactionHash": "0x0abc000000000000000000000000000000000000000000000000000000000000",
            "logIndex": "0x3",
            "removed": false
        }"#;
        let log: RpcLog = serde_json::from_str(raw).expect("decode");
        assert_eq!(log.topics.len(), 3);
        assert_eq!(parse_quantity(&log.block_number), Ok(42));
        assert_eq!(log.log_index.as_deref().map(parse_quantity), Some(Ok(3)));
        assert_eq!(log.data.len(), 32);
    }
}
