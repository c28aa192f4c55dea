// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Test doubles for the node and the signing oracle.

use std::{
    collections::{HashSet, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, MutexGuard,
    },
};

use alloy::{
    json_abi::JsonAbi,
    primitives::{address, keccak256, Address, Bytes, B256, U256},
};
use async_trait::async_trait;
use k256::{
    ecdsa::{Signature, SigningKey, VerifyingKey},
    pkcs8::EncodePublicKey,
};

use crate::blockchain::{
    codec::decode_signed,
    erc20::TokenContract,
    identity::SignerIdentity,
    kms::{OracleError, SigningOracle},
    node::{BlockTag, CallRequest, ChainNode, NodeError, ReceiptSummary},
    recovery::address_from_public_key,
};

pub const TOKEN_ADDRESS: Address = address!("0x5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a");

const BALANCE_OF: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];
const DECIMALS: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];
const SYMBOL: [u8; 4] = [0x95, 0xd8, 0x9b, 0x41];
const TRANSFER: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// A JSON-RPC error as nodes return it for rejected transactions.
pub fn rpc_error(message: &str) -> NodeError {
    NodeError::Rpc {
        code: -32000,
        message: message.to_string(),
        data: None,
    }
}

pub fn test_token(decimals: u8) -> TokenContract {
    TokenContract::new(TOKEN_ADDRESS, decimals, JsonAbi::default())
}

/// Identity of the `0x11` test key.
pub fn test_identity(chain_id: u64) -> SignerIdentity {
    let oracle = LocalKeyOracle::new(0x11);
    SignerIdentity {
        chain_id,
        address: oracle.address(),
        public_key: oracle.verifying_key().clone(),
    }
}

/// Scripted answer to the next `eth_sendRawTransaction`.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    Reject(NodeError),
    /// Reject and move the chain's nonce counters, as if another
    /// transaction from the same account had landed.
    RejectAndAdvance {
        error: NodeError,
        latest: u64,
        pending: u64,
    },
    /// Accept the transaction but lose the response.
    AcceptThenFail(NodeError),
}

struct MockState {
    chain_id: u64,
    latest: u64,
    pending: u64,
    fail_nonce_queries: bool,
    native_balance: U256,
    token_balance: U256,
    token_decimals: u8,
    transfer_returns: bool,
    call_revert: Option<String>,
    gas_estimate: u64,
    base_fee: Option<u128>,
    priority_fee: u128,
    gas_price: u128,
    send_script: VecDeque<SendOutcome>,
    send_attempts: Vec<Bytes>,
    sent: Vec<Bytes>,
    known: HashSet<B256>,
    receipt_status: Option<bool>,
    receipt_delay: u32,
    block_number: u64,
}

/// In-memory [`ChainNode`].
pub struct MockNode {
    state: Mutex<MockState>,
    calls: AtomicUsize,
}

impl MockNode {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                chain_id: 80002,
                latest: 0,
                pending: 0,
                fail_nonce_queries: false,
                native_balance: U256::from(10u128.pow(21)),
                token_balance: U256::ZERO,
                token_decimals: 18,
                transfer_returns: true,
                call_revert: None,
                gas_estimate: 50_000,
                base_fee: Some(30_000_000_000),
                priority_fee: 1_000_000_000,
                gas_price: 20_000_000_000,
                send_script: VecDeque::new(),
                send_attempts: Vec::new(),
                sent: Vec::new(),
                known: HashSet::new(),
                receipt_status: Some(true),
                receipt_delay: 0,
                block_number: 1_000,
            }),
            calls: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    fn track(&self) -> MutexGuard<'_, MockState> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.state()
    }

    pub fn set_chain_id(&self, chain_id: u64) {
        self.state().chain_id = chain_id;
    }

    pub fn set_nonces(&self, latest: u64, pending: u64) {
        let mut state = self.state();
        state.latest = latest;
        state.pending = pending;
    }

    pub fn fail_nonce_queries(&self, fail: bool) {
        self.state().fail_nonce_queries = fail;
    }

    pub fn set_native_balance(&self, balance: U256) {
        self.state().native_balance = balance;
    }

    pub fn set_token_balance(&self, balance: U256) {
        self.state().token_balance = balance;
    }

    pub fn set_token_decimals(&self, decimals: u8) {
        self.state().token_decimals = decimals;
    }

    pub fn set_transfer_returns(&self, value: bool) {
        self.state().transfer_returns = value;
    }

    /// Make state-changing calls and gas estimates revert.
    pub fn set_call_revert(&self, message: Option<&str>) {
        self.state().call_revert = message.map(str::to_string);
    }

    pub fn set_gas_estimate(&self, gas: u64) {
        self.state().gas_estimate = gas;
    }

    pub fn set_base_fee(&self, base_fee: Option<u128>) {
        self.state().base_fee = base_fee;
    }

    pub fn set_priority_fee(&self, fee: u128) {
        self.state().priority_fee = fee;
    }

    pub fn set_gas_price(&self, price: u128) {
        self.state().gas_price = price;
    }

    pub fn script_send(&self, outcome: SendOutcome) {
        self.state().send_script.push_back(outcome);
    }

    /// `None` means receipts never appear.
    pub fn set_receipt_status(&self, status: Option<bool>) {
        self.state().receipt_status = status;
    }

    /// Answer the next `polls` receipt lookups with "not yet".
    pub fn set_receipt_delay(&self, polls: u32) {
        self.state().receipt_delay = polls;
    }

    pub fn calls_made(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Raw transactions the node accepted.
    pub fn sent(&self) -> Vec<Bytes> {
        self.state().sent.clone()
    }

    /// Every raw transaction offered, accepted or not.
    pub fn send_attempts(&self) -> Vec<Bytes> {
        self.state().send_attempts.clone()
    }
}

impl Default for MockNode {
    fn default() -> Self {
        Self::new()
    }
}

impl MockState {
    fn revert(&self) -> Option<NodeError> {
        self.call_revert.as_ref().map(|message| NodeError::Rpc {
            code: 3,
            message: message.clone(),
            data: None,
        })
    }

    fn accept(&mut self, raw: &[u8]) -> B256 {
        let hash = keccak256(raw);
        if let Ok((tx, _)) = decode_signed(raw) {
            self.pending = self.pending.max(tx.nonce + 1);
        }
        self.sent.push(Bytes::copy_from_slice(raw));
        self.known.insert(hash);
        hash
    }
}

fn word(value: U256) -> Bytes {
    Bytes::from(value.to_be_bytes::<32>().to_vec())
}

#[async_trait]
impl ChainNode for MockNode {
    async fn chain_id(&self) -> Result<u64, NodeError> {
        Ok(self.track().chain_id)
    }

    async fn block_number(&self) -> Result<u64, NodeError> {
        Ok(self.track().block_number)
    }

    async fn transaction_count(&self, _address: Address, tag: BlockTag) -> Result<u64, NodeError> {
        let state = self.track();
        if state.fail_nonce_queries {
            return Err(NodeError::Unavailable("connection refused".to_string()));
        }
        Ok(match tag {
            BlockTag::Latest => state.latest,
            BlockTag::Pending => state.pending,
        })
    }

    async fn gas_price(&self) -> Result<u128, NodeError> {
        Ok(self.track().gas_price)
    }

    async fn max_priority_fee(&self) -> Result<u128, NodeError> {
        Ok(self.track().priority_fee)
    }

    async fn base_fee(&self) -> Result<Option<u128>, NodeError> {
        Ok(self.track().base_fee)
    }

    async fn balance(&self, _address: Address) -> Result<U256, NodeError> {
        Ok(self.track().native_balance)
    }

    async fn estimate_gas(&self, _call: &CallRequest) -> Result<u64, NodeError> {
        let state = self.track();
        match state.revert() {
            Some(err) => Err(err),
            None => Ok(state.gas_estimate),
        }
    }

    async fn call(&self, call: &CallRequest) -> Result<Bytes, NodeError> {
        let state = self.track();
        let selector = call.data.get(..4).unwrap_or_default();

        if selector == BALANCE_OF {
            return Ok(word(state.token_balance));
        }
        if selector == DECIMALS {
            return Ok(word(U256::from(state.token_decimals)));
        }
        if selector == SYMBOL {
            return Ok(Bytes::new());
        }
        if let Some(err) = state.revert() {
            return Err(err);
        }
        if selector == TRANSFER {
            return Ok(word(U256::from(state.transfer_returns as u8)));
        }
        Ok(Bytes::new())
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, NodeError> {
        let mut state = self.track();
        state.send_attempts.push(Bytes::copy_from_slice(raw));

        match state.send_script.pop_front() {
            None => Ok(state.accept(raw)),
            Some(SendOutcome::Reject(err)) => Err(err),
            Some(SendOutcome::RejectAndAdvance {
                error,
                latest,
                pending,
            }) => {
                state.latest = latest;
                state.pending = pending;
                Err(error)
            }
            Some(SendOutcome::AcceptThenFail(err)) => {
                state.accept(raw);
                Err(err)
            }
        }
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptSummary>, NodeError> {
        let mut state = self.track();
        if state.receipt_delay > 0 {
            state.receipt_delay -= 1;
            return Ok(None);
        }

        let Some(success) = state.receipt_status else {
            return Ok(None);
        };
        if !state.known.contains(&hash) {
            return Ok(None);
        }

        state.block_number += 1;
        Ok(Some(ReceiptSummary {
            tx_hash: hash,
            success,
            gas_used: 41_000,
            block_number: Some(state.block_number),
            effective_gas_price: 31_000_000_000,
        }))
    }
}

/// [`SigningOracle`] over an in-process key.
pub struct LocalKeyOracle {
    key: SigningKey,
    high_s: bool,
    sign_failures: Mutex<VecDeque<OracleError>>,
    public_key_failure: Mutex<Option<OracleError>>,
    sign_calls: AtomicUsize,
    public_key_calls: AtomicUsize,
}

impl LocalKeyOracle {
    /// Oracle for the private key `[byte; 32]`.
    pub fn new(byte: u8) -> Self {
        Self {
            key: SigningKey::from_slice(&[byte; 32]).unwrap(),
            high_s: false,
            sign_failures: Mutex::new(VecDeque::new()),
            public_key_failure: Mutex::new(None),
            sign_calls: AtomicUsize::new(0),
            public_key_calls: AtomicUsize::new(0),
        }
    }

    /// Return the high-s twin of every signature.
    pub fn with_high_s(mut self) -> Self {
        self.high_s = true;
        self
    }

    pub fn fail_next(&self, err: OracleError) {
        self.sign_failures.lock().unwrap().push_back(err);
    }

    pub fn fail_public_key(&self, err: OracleError) {
        *self.public_key_failure.lock().unwrap() = Some(err);
    }

    pub fn sign_calls(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }

    pub fn public_key_calls(&self) -> usize {
        self.public_key_calls.load(Ordering::SeqCst)
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.key.verifying_key()
    }

    pub fn address(&self) -> Address {
        address_from_public_key(self.key.verifying_key())
    }
}

#[async_trait]
impl SigningOracle for LocalKeyOracle {
    async fn public_key_der(&self) -> Result<Vec<u8>, OracleError> {
        self.public_key_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.public_key_failure.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self
            .key
            .verifying_key()
            .to_public_key_der()
            .unwrap()
            .as_bytes()
            .to_vec())
    }

    async fn sign_digest(&self, digest: B256) -> Result<Vec<u8>, OracleError> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.sign_failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        let (signature, _) = self
            .key
            .sign_prehash_recoverable(digest.as_slice())
            .unwrap();
        let signature = if self.high_s {
            let (r, s) = signature.split_scalars();
            Signature::from_scalars(r, -s).unwrap()
        } else {
            signature
        };
        Ok(signature.to_der().as_bytes().to_vec())
    }
}
