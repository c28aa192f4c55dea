// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! EVM node client.
//!
//! [`ChainNode`] is the narrow set of JSON-RPC calls the signer needs.
//! [`RpcNode`] implements it over an alloy HTTP provider and puts an explicit
//! timeout on every request.

use std::time::Duration;

use alloy::{
    eips::BlockNumberOrTag,
    primitives::{Address, Bytes, B256, U256},
    providers::{Provider, RootProvider},
    rpc::types::TransactionRequest,
    transports::{RpcError, TransportErrorKind},
};
use async_trait::async_trait;

/// Errors that can occur while talking to the node.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    /// Transport failure. The request may or may not have reached the node.
    #[error("Node unavailable: {0}")]
    Unavailable(String),

    #[error("Node request timed out: {0}")]
    Timeout(&'static str),

    /// The node answered with a JSON-RPC error.
    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<String>,
    },

    #[error("Invalid node response: {0}")]
    InvalidResponse(String),
}

impl NodeError {
    fn rpc_message(&self) -> Option<String> {
        match self {
            Self::Rpc { message, .. } => Some(message.to_ascii_lowercase()),
            _ => None,
        }
    }

    fn message_contains(&self, needles: &[&str]) -> bool {
        self.rpc_message()
            .map(|message| needles.iter().any(|needle| message.contains(needle)))
            .unwrap_or(false)
    }

    /// Transport failure or timeout. Safe to retry for idempotent calls.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }

    pub fn is_nonce_too_low(&self) -> bool {
        self.message_contains(&["nonce too low", "nonce is too low", "nonce has already been used"])
    }

    pub fn is_already_known(&self) -> bool {
        self.message_contains(&["already known", "known transaction", "already imported"])
    }

    pub fn is_underpriced(&self) -> bool {
        self.message_contains(&["underpriced", "fee too low"])
    }

    /// Another transaction already occupies the nonce.
    pub fn is_replacement_underpriced(&self) -> bool {
        self.message_contains(&["replacement transaction underpriced", "replacement fee too low"])
    }

    pub fn is_insufficient_funds(&self) -> bool {
        self.message_contains(&["insufficient funds"])
    }

    pub fn is_revert(&self) -> bool {
        matches!(self, Self::Rpc { code: 3, .. }) || self.message_contains(&["revert"])
    }
}

impl From<RpcError<TransportErrorKind>> for NodeError {
    fn from(err: RpcError<TransportErrorKind>) -> Self {
        match err {
            RpcError::ErrorResp(payload) => Self::Rpc {
                code: payload.code,
                message: payload.message.to_string(),
                data: payload.data.map(|data| data.get().to_string()),
            },
            RpcError::Transport(kind) => Self::Unavailable(kind.to_string()),
            other => Self::InvalidResponse(other.to_string()),
        }
    }
}

/// Block tag for account state queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Pending,
}

/// A read-only call (also used for gas estimation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

impl CallRequest {
    fn to_request(&self) -> TransactionRequest {
        TransactionRequest::default()
            .from(self.from)
            .to(self.to)
            .value(self.value)
            .input(self.data.clone().into())
    }
}

/// The parts of a transaction receipt we report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptSummary {
    pub tx_hash: B256,
    /// `status == 1`
    pub success: bool,
    pub gas_used: u64,
    pub block_number: Option<u64>,
    pub effective_gas_price: u128,
}

/// JSON-RPC calls used by the signer.
#[async_trait]
pub trait ChainNode: Send + Sync {
    async fn chain_id(&self) -> Result<u64, NodeError>;

    async fn block_number(&self) -> Result<u64, NodeError>;

    /// `eth_getTransactionCount` at the given tag.
    async fn transaction_count(&self, address: Address, tag: BlockTag) -> Result<u64, NodeError>;

    async fn gas_price(&self) -> Result<u128, NodeError>;

    async fn max_priority_fee(&self) -> Result<u128, NodeError>;

    /// Base fee of the latest block. `None` on chains without EIP-1559.
    async fn base_fee(&self) -> Result<Option<u128>, NodeError>;

    async fn balance(&self, address: Address) -> Result<U256, NodeError>;

    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64, NodeError>;

    async fn call(&self, call: &CallRequest) -> Result<Bytes, NodeError>;

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, NodeError>;

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptSummary>, NodeError>;
}

/// [`ChainNode`] over an alloy HTTP provider.
pub struct RpcNode {
    provider: RootProvider,
    timeout: Duration,
}

impl RpcNode {
    /// Create a client for the node at `rpc_url`.
    ///
    /// # Arguments
    /// * `rpc_url` - HTTP(S) JSON-RPC endpoint
    /// * `timeout` - Bound applied to every request
    pub fn new(rpc_url: &str, timeout: Duration) -> Result<Self, NodeError> {
        let url: url::Url = rpc_url
            .parse()
            .map_err(|e: url::ParseError| NodeError::InvalidRpcUrl(e.to_string()))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(NodeError::InvalidRpcUrl(format!(
                "unsupported scheme {:?}",
                url.scheme()
            )));
        }

        Ok(Self {
            provider: RootProvider::new_http(url),
            timeout,
        })
    }

    async fn timed<T, F>(&self, method: &'static str, request: F) -> Result<T, NodeError>
    where
        F: std::future::IntoFuture<Output = Result<T, RpcError<TransportErrorKind>>>,
    {
        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result.map_err(NodeError::from),
            Err(_) => Err(NodeError::Timeout(method)),
        }
    }
}

#[async_trait]
impl ChainNode for RpcNode {
    async fn chain_id(&self) -> Result<u64, NodeError> {
        self.timed("eth_chainId", self.provider.get_chain_id()).await
    }

    async fn block_number(&self) -> Result<u64, NodeError> {
        self.timed("eth_blockNumber", self.provider.get_block_number())
            .await
    }

    async fn transaction_count(&self, address: Address, tag: BlockTag) -> Result<u64, NodeError> {
        let request = self.provider.get_transaction_count(address);
        let request = match tag {
            BlockTag::Latest => request.latest(),
            BlockTag::Pending => request.pending(),
        };
        self.timed("eth_getTransactionCount", request).await
    }

    async fn gas_price(&self) -> Result<u128, NodeError> {
        self.timed("eth_gasPrice", self.provider.get_gas_price()).await
    }

    async fn max_priority_fee(&self) -> Result<u128, NodeError> {
        self.timed(
            "eth_maxPriorityFeePerGas",
            self.provider.get_max_priority_fee_per_gas(),
        )
        .await
    }

    async fn base_fee(&self) -> Result<Option<u128>, NodeError> {
        let block = self
            .timed(
                "eth_getBlockByNumber",
                self.provider.get_block_by_number(BlockNumberOrTag::Latest),
            )
            .await?
            .ok_or_else(|| NodeError::InvalidResponse("No latest block".to_string()))?;

        Ok(block.header.base_fee_per_gas.map(u128::from))
    }

    async fn balance(&self, address: Address) -> Result<U256, NodeError> {
        self.timed("eth_getBalance", self.provider.get_balance(address))
            .await
    }

    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64, NodeError> {
        self.timed("eth_estimateGas", self.provider.estimate_gas(call.to_request()))
            .await
    }

    async fn call(&self, call: &CallRequest) -> Result<Bytes, NodeError> {
        self.timed("eth_call", self.provider.call(call.to_request()))
            .await
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, NodeError> {
        let pending = self
            .timed(
                "eth_sendRawTransaction",
                self.provider.send_raw_transaction(raw),
            )
            .await?;
        Ok(*pending.tx_hash())
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptSummary>, NodeError> {
        let receipt = self
            .timed(
                "eth_getTransactionReceipt",
                self.provider.get_transaction_receipt(hash),
            )
            .await?;

        Ok(receipt.map(|r| ReceiptSummary {
            tx_hash: r.transaction_hash,
            success: r.status(),
            gas_used: r.gas_used,
            block_number: r.block_number,
            effective_gas_price: r.effective_gas_price,
        }))
    }
}
