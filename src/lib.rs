// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! KMS Signer - EVM transaction signing with a remote HSM-backed key
//!
//! This crate signs, broadcasts and tracks ERC-20 token transfers for a
//! custodial account whose private key lives in AWS KMS and never enters
//! process memory.
//!
//! ## Modules
//!
//! - `blockchain` - Encoding, signing, nonces, gas and broadcast tracking
//! - `config` - Environment configuration
//! - `error` - Caller-facing transfer errors
//! - `state` - Startup wiring and checks

pub mod blockchain;
pub mod config;
pub mod error;
pub mod state;

#[cfg(test)]
mod testing;
