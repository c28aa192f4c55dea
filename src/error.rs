// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Caller-facing transfer errors.
//!
//! Module errors converge here. A [`TransferError`] either rejected the
//! request before anything cost money, or carries the hash of a broadcast
//! transaction whose outcome the caller must reconcile.

use std::fmt;

use alloy::primitives::B256;
use serde::{Deserialize, Serialize};

use crate::blockchain::{
    builder::BuildError,
    erc20::TokenError,
    kms::OracleError,
    node::NodeError,
    signer::SigningError,
    tracker::SubmitError,
};
use crate::config::ConfigError;

/// Failure categories reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Malformed recipient or amount.
    InvalidRequest,
    InsufficientBalance,
    SimulationReverted,
    /// The oracle signature does not recover the signer address.
    SignatureRecoveryFailed,
    /// The nonce is persistently out of sync. Needs an operator.
    NonceStuck,
    OracleUnavailable,
    NodeUnavailable,
    /// Refused by the oracle or the node for a non-transient reason.
    Rejected,
    Timeout,
    Cancelled,
    Configuration,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InsufficientBalance => "insufficient_balance",
            Self::SimulationReverted => "simulation_reverted",
            Self::SignatureRecoveryFailed => "signature_recovery_failed",
            Self::NonceStuck => "nonce_stuck",
            Self::OracleUnavailable => "oracle_unavailable",
            Self::NodeUnavailable => "node_unavailable",
            Self::Rejected => "rejected",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Configuration => "configuration",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransferError {
    pub kind: FailureKind,
    pub message: String,
    /// Set when the failure happened after a broadcast attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<B256>,
}

impl TransferError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            tx_hash: None,
        }
    }

    pub fn with_tx_hash(mut self, tx_hash: B256) -> Self {
        self.tx_hash = Some(tx_hash);
        self
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Cancelled, message)
    }

    /// The transaction may be on chain. Look it up by hash, do not re-send.
    pub fn needs_reconciliation(&self) -> bool {
        self.tx_hash.is_some()
    }
}

impl From<NodeError> for TransferError {
    fn from(err: NodeError) -> Self {
        let kind = match &err {
            NodeError::InvalidRpcUrl(_) => FailureKind::Configuration,
            NodeError::Unavailable(_) | NodeError::Timeout(_) | NodeError::InvalidResponse(_) => {
                FailureKind::NodeUnavailable
            }
            NodeError::Rpc { .. } if err.is_insufficient_funds() => FailureKind::InsufficientBalance,
            NodeError::Rpc { .. } => FailureKind::Rejected,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<OracleError> for TransferError {
    fn from(err: OracleError) -> Self {
        let kind = match err {
            OracleError::Rejected(_) => FailureKind::Rejected,
            _ => FailureKind::OracleUnavailable,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<BuildError> for TransferError {
    fn from(err: BuildError) -> Self {
        let kind = match &err {
            BuildError::InvalidRecipient(_) | BuildError::InvalidAmount(_) | BuildError::ZeroAmount => {
                FailureKind::InvalidRequest
            }
            BuildError::InsufficientTokenBalance { .. }
            | BuildError::InsufficientNativeBalance { .. } => FailureKind::InsufficientBalance,
            BuildError::SimulationReverted(_) => FailureKind::SimulationReverted,
            BuildError::Token(_) => FailureKind::NodeUnavailable,
            BuildError::Node(node) => return node.clone().into(),
        };
        Self::new(kind, err.to_string())
    }
}

impl From<TokenError> for TransferError {
    fn from(err: TokenError) -> Self {
        BuildError::from(err).into()
    }
}

impl From<SigningError> for TransferError {
    fn from(err: SigningError) -> Self {
        let kind = match &err {
            SigningError::Oracle(oracle) => return oracle.clone().into(),
            SigningError::Recovery(_)
            | SigningError::SenderMismatch { .. }
            | SigningError::HighS
            | SigningError::EnvelopeMismatch => FailureKind::SignatureRecoveryFailed,
            SigningError::ChainIdMismatch { .. } => FailureKind::Configuration,
            SigningError::Codec(_) => FailureKind::InvalidRequest,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<SubmitError> for TransferError {
    fn from(err: SubmitError) -> Self {
        let kind = match &err {
            SubmitError::NonceTooLow(_) | SubmitError::NonceOccupied(_) => FailureKind::NonceStuck,
            SubmitError::Rejected(node) if node.is_insufficient_funds() => {
                FailureKind::InsufficientBalance
            }
            SubmitError::Rejected(node) if node.is_revert() => FailureKind::SimulationReverted,
            SubmitError::Rejected(_) => FailureKind::Rejected,
            SubmitError::Unavailable(_) => FailureKind::NodeUnavailable,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<ConfigError> for TransferError {
    fn from(err: ConfigError) -> Self {
        Self::new(FailureKind::Configuration, err.to_string())
    }
}
