// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! ERC-20 token contract interactions.
//!
//! Calls are encoded with the `sol!` interface below. The deployed
//! contract's ABI file is loaded at startup and checked to expose the
//! functions we call, so a wrong file fails before any transfer.

use std::path::Path;

use alloy::{
    json_abi::JsonAbi,
    primitives::{Address, Bytes, U256},
    sol,
    sol_types::SolCall,
};

use super::node::{CallRequest, ChainNode, NodeError};

// Define the ERC-20 interface using alloy's sol! macro
sol! {
    interface IERC20 {
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
        function balanceOf(address account) external view returns (uint256);
        function transfer(address to, uint256 amount) external returns (bool);
    }
}

/// Errors from token contract handling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("Failed to load ABI file: {0}")]
    AbiFile(String),

    #[error("ABI does not declare {0}")]
    MissingFunction(&'static str),

    #[error("Failed to decode {call} result: {message}")]
    Decode {
        call: &'static str,
        message: String,
    },

    #[error(transparent)]
    Node(#[from] NodeError),
}

/// Functions the signer calls, with their selectors.
const REQUIRED_FUNCTIONS: [(&str, [u8; 4]); 3] = [
    ("transfer", IERC20::transferCall::SELECTOR),
    ("balanceOf", IERC20::balanceOfCall::SELECTOR),
    ("decimals", IERC20::decimalsCall::SELECTOR),
];

/// Load a contract ABI from a JSON file.
///
/// Accepts a bare ABI array or a build artifact object with an `abi` field.
pub fn load_abi(path: &Path) -> Result<JsonAbi, TokenError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| TokenError::AbiFile(format!("{}: {e}", path.display())))?;
    parse_abi(&contents)
}

fn parse_abi(contents: &str) -> Result<JsonAbi, TokenError> {
    let value: serde_json::Value =
        serde_json::from_str(contents).map_err(|e| TokenError::AbiFile(e.to_string()))?;

    let abi_value = match value {
        serde_json::Value::Object(mut artifact) => artifact
            .remove("abi")
            .ok_or_else(|| TokenError::AbiFile("object without an \"abi\" field".to_string()))?,
        array => array,
    };

    let abi: JsonAbi =
        serde_json::from_value(abi_value).map_err(|e| TokenError::AbiFile(e.to_string()))?;

    for (name, selector) in REQUIRED_FUNCTIONS {
        let declared = abi
            .function(name)
            .map(|overloads| overloads.iter().any(|f| f.selector().0 == selector))
            .unwrap_or(false);
        if !declared {
            return Err(TokenError::MissingFunction(name));
        }
    }

    Ok(abi)
}

/// ERC-20 contract the signer moves tokens on.
#[derive(Debug, Clone)]
pub struct TokenContract {
    pub address: Address,
    pub decimals: u8,
    abi: JsonAbi,
}

impl TokenContract {
    pub fn new(address: Address, decimals: u8, abi: JsonAbi) -> Self {
        Self {
            address,
            decimals,
            abi,
        }
    }

    pub fn abi(&self) -> &JsonAbi {
        &self.abi
    }

    /// Calldata for `transfer(to, amount)`.
    pub fn encode_transfer(to: Address, amount: U256) -> Bytes {
        IERC20::transferCall { to, amount }.abi_encode().into()
    }

    /// Decode the `transfer` return value.
    ///
    /// Some deployed tokens return nothing on success, which counts as `true`.
    pub fn decode_transfer_result(data: &[u8]) -> Result<bool, TokenError> {
        if data.is_empty() {
            return Ok(true);
        }
        IERC20::transferCall::abi_decode_returns(data).map_err(|e| TokenError::Decode {
            call: "transfer",
            message: e.to_string(),
        })
    }

    fn read_call(&self, from: Address, data: Vec<u8>) -> CallRequest {
        CallRequest {
            from,
            to: self.address,
            value: U256::ZERO,
            data: data.into(),
        }
    }

    /// Token balance of `owner`.
    pub async fn balance_of(
        &self,
        node: &dyn ChainNode,
        owner: Address,
    ) -> Result<U256, TokenError> {
        let call = self.read_call(owner, IERC20::balanceOfCall { account: owner }.abi_encode());
        let data = node.call(&call).await?;
        IERC20::balanceOfCall::abi_decode_returns(&data).map_err(|e| TokenError::Decode {
            call: "balanceOf",
            message: e.to_string(),
        })
    }

    /// Decimals reported by the deployed contract.
    pub async fn onchain_decimals(&self, node: &dyn ChainNode) -> Result<u8, TokenError> {
        let call = self.read_call(Address::ZERO, IERC20::decimalsCall {}.abi_encode());
        let data = node.call(&call).await?;
        IERC20::decimalsCall::abi_decode_returns(&data).map_err(|e| TokenError::Decode {
            call: "decimals",
            message: e.to_string(),
        })
    }

    /// Token symbol, if the contract exposes one.
    pub async fn symbol(&self, node: &dyn ChainNode) -> Option<String> {
        let call = self.read_call(Address::ZERO, IERC20::symbolCall {}.abi_encode());
        let data = node.call(&call).await.ok()?;
        IERC20::symbolCall::abi_decode_returns(&data).ok()
    }
}
