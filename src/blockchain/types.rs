// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Blockchain types and constants.

use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// EVM network configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Network name for display
    pub name: String,
    /// Chain ID
    pub chain_id: u64,
    /// Block explorer URL (no trailing slash)
    pub explorer_url: Option<String>,
}

/// Networks with a known block explorer.
struct KnownNetwork {
    name: &'static str,
    chain_id: u64,
    explorer_url: &'static str,
}

const KNOWN_NETWORKS: &[KnownNetwork] = &[
    KnownNetwork {
        name: "Ethereum Mainnet",
        chain_id: 1,
        explorer_url: "https://etherscan.io",
    },
    KnownNetwork {
        name: "Ethereum Sepolia",
        chain_id: 11155111,
        explorer_url: "https://sepolia.etherscan.io",
    },
    KnownNetwork {
        name: "Polygon PoS",
        chain_id: 137,
        explorer_url: "https://polygonscan.com",
    },
    KnownNetwork {
        name: "Polygon Amoy",
        chain_id: 80002,
        explorer_url: "https://amoy.polygonscan.com",
    },
    KnownNetwork {
        name: "Base",
        chain_id: 8453,
        explorer_url: "https://basescan.org",
    },
    KnownNetwork {
        name: "Base Sepolia",
        chain_id: 84532,
        explorer_url: "https://sepolia.basescan.org",
    },
    KnownNetwork {
        name: "Avalanche C-Chain",
        chain_id: 43114,
        explorer_url: "https://snowtrace.io",
    },
    KnownNetwork {
        name: "Avalanche Fuji Testnet",
        chain_id: 43113,
        explorer_url: "https://testnet.snowtrace.io",
    },
];

impl NetworkConfig {
    /// Network configuration for a chain id, with the explorer of a known
    /// network unless `explorer_override` is given.
    pub fn for_chain(chain_id: u64, explorer_override: Option<&str>) -> Self {
        let known = KNOWN_NETWORKS.iter().find(|n| n.chain_id == chain_id);

        let name = known
            .map(|n| n.name.to_string())
            .unwrap_or_else(|| format!("EVM chain {chain_id}"));

        let explorer_url = explorer_override
            .map(|url| url.trim_end_matches('/').to_string())
            .or_else(|| known.map(|n| n.explorer_url.to_string()));

        Self {
            name,
            chain_id,
            explorer_url,
        }
    }

    /// Explorer link for a transaction, if this network has an explorer.
    pub fn tx_url(&self, tx_hash: &B256) -> Option<String> {
        self.explorer_url
            .as_ref()
            .map(|base| format!("{base}/tx/{tx_hash}"))
    }
}

/// A request to move tokens out of the signer wallet.
///
/// The caller has already authenticated and authorized the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferIntent {
    /// Correlation id, echoed in logs and in the result
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Recipient address (0x + 40 hex chars)
    pub recipient: String,
    /// Amount in human units (e.g. "10.5")
    pub amount: String,
    /// Free-form purpose tag (e.g. "kyc_reward", "purchase")
    pub purpose: String,
}

impl TransferIntent {
    pub fn new(
        recipient: impl Into<String>,
        amount: impl Into<String>,
        purpose: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient: recipient.into(),
            amount: amount.into(),
            purpose: purpose.into(),
        }
    }
}

/// Terminal status of a broadcast transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Receipt reported `status = 1`.
    Success,
    /// Receipt reported `status = 0`. Gas was spent.
    Reverted,
    /// No receipt within the confirmation window. The transaction may still
    /// land and must be reconciled, not re-sent.
    Timeout,
}

/// Durable record of a broadcast transaction, for the caller's ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResult {
    /// Intent correlation id
    pub intent_id: Uuid,
    /// Transaction hash
    pub tx_hash: B256,
    pub status: SubmissionStatus,
    /// Gas used (absent on timeout)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<u64>,
    /// Inclusion block (absent on timeout)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explorer_url: Option<String>,
    pub nonce: u64,
    pub from: Address,
    /// Final recipient of the value (token recipient for transfers)
    pub to: Address,
    /// Amount in base units
    pub amount_raw: U256,
    pub purpose: String,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl SubmissionResult {
    /// Whether the caller must reconcile this transaction later.
    pub fn needs_reconciliation(&self) -> bool {
        self.status == SubmissionStatus::Timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_chain_uses_its_explorer() {
        let amoy = NetworkConfig::for_chain(80002, None);
        assert_eq!(amoy.name, "Polygon Amoy");

        let hash = B256::repeat_byte(0xab);
        let url = amoy.tx_url(&hash).unwrap();
        assert!(url.starts_with("https://amoy.polygonscan.com/tx/0xabab"));
    }

    #[test]
    fn explorer_override_wins_and_is_trimmed() {
        let net = NetworkConfig::for_chain(80002, Some("https://explorer.example/"));
        assert_eq!(net.explorer_url.as_deref(), Some("https://explorer.example"));
    }

    #[test]
    fn unknown_chain_has_no_explorer() {
        let net = NetworkConfig::for_chain(999_999, None);
        assert_eq!(net.name, "EVM chain 999999");
        assert!(net.tx_url(&B256::ZERO).is_none());
    }

    #[test]
    fn submission_status_serializes_snake_case() {
        let json = serde_json::to_string(&SubmissionStatus::Timeout).unwrap();
        assert_eq!(json, r#""timeout""#);
    }
}
