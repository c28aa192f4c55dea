// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! EVM transaction signing with a remote key.
//!
//! This module provides functionality for:
//! - Token amount conversion and transaction encoding
//! - Signing through AWS KMS with signer address verification
//! - Nonce sequencing, gas estimation and broadcast tracking
//! - The transfer orchestrator that ties them together

pub mod amount;
pub mod builder;
pub mod codec;
pub mod erc20;
pub mod identity;
pub mod kms;
pub mod node;
pub mod nonce;
pub mod recovery;
pub mod signer;
pub mod tracker;
pub mod transfer;
pub mod types;

pub use transfer::{TransferService, TransferStage};
pub use types::*;
