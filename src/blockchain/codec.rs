// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction encoding for signing and broadcast.
//!
//! Two envelope kinds are supported, selected by [`FeeFields`]:
//!
//! - **Legacy** (EIP-155): signing payload is
//!   `rlp([nonce, gasPrice, gas, to, value, data, chainId, 0, 0])`, the signed
//!   envelope replaces the trailing triple with `v = recid + 35 + 2 * chainId, r, s`.
//! - **Fee market** (EIP-1559): signing payload is
//!   `0x02 || rlp([chainId, nonce, maxPriorityFee, maxFee, gas, to, value, data, accessList])`,
//!   the signed envelope appends `yParity, r, s`.
//!
//! RLP integer trimming and field order come from alloy's consensus types,
//! so the bytes we hash are the bytes the network re-derives.

use alloy::{
    consensus::{SignableTransaction, TxEip1559, TxEnvelope, TxLegacy},
    eips::{
        eip2718::{Decodable2718, Encodable2718},
        eip2930::AccessList,
    },
    primitives::{keccak256, Address, Bytes, Signature, TxKind, B256, U256},
};

/// Errors produced while encoding or decoding transactions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Access lists require a fee-market transaction")]
    AccessListOnLegacy,

    #[error("Malformed transaction envelope: {0}")]
    Malformed(String),

    #[error("Unsupported transaction type: 0x{0:02x}")]
    UnsupportedType(u8),

    #[error("Legacy transaction without EIP-155 replay protection")]
    Unprotected,

    #[error("Contract creation transactions are not supported")]
    ContractCreation,

    #[error("{0} trailing bytes after transaction envelope")]
    TrailingBytes(usize),
}

/// Fee fields. The variant fixes the envelope kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeFields {
    /// Single gas price, legacy envelope.
    Legacy { gas_price: u128 },
    /// Base + priority fee pair, EIP-1559 envelope.
    FeeMarket {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
}

impl FeeFields {
    /// The most the sender can pay per unit of gas.
    pub fn max_fee_per_gas(&self) -> u128 {
        match self {
            Self::Legacy { gas_price } => *gas_price,
            Self::FeeMarket {
                max_fee_per_gas, ..
            } => *max_fee_per_gas,
        }
    }

    pub fn is_fee_market(&self) -> bool {
        matches!(self, Self::FeeMarket { .. })
    }
}

/// A transaction ready to be signed. Contains no secrets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub fees: FeeFields,
    pub gas_limit: u64,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    /// Only valid for fee-market transactions.
    pub access_list: AccessList,
}

impl UnsignedTransaction {
    /// Worst-case cost in wei: `gas_limit * max_fee + value`.
    pub fn max_cost(&self) -> U256 {
        U256::from(self.gas_limit) * U256::from(self.fees.max_fee_per_gas()) + self.value
    }

    fn to_consensus(&self) -> Result<ConsensusTx, CodecError> {
        match self.fees {
            FeeFields::Legacy { gas_price } => {
                if !self.access_list.is_empty() {
                    return Err(CodecError::AccessListOnLegacy);
                }
                Ok(ConsensusTx::Legacy(TxLegacy {
                    chain_id: Some(self.chain_id),
                    nonce: self.nonce,
                    gas_price,
                    gas_limit: self.gas_limit,
                    to: TxKind::Call(self.to),
                    value: self.value,
                    input: self.data.clone(),
                }))
            }
            FeeFields::FeeMarket {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => Ok(ConsensusTx::Eip1559(TxEip1559 {
                chain_id: self.chain_id,
                nonce: self.nonce,
                gas_limit: self.gas_limit,
                max_fee_per_gas,
                max_priority_fee_per_gas,
                to: TxKind::Call(self.to),
                value: self.value,
                access_list: self.access_list.clone(),
                input: self.data.clone(),
            })),
        }
    }
}

enum ConsensusTx {
    Legacy(TxLegacy),
    Eip1559(TxEip1559),
}

/// The `(r, s, recovery id)` triple. `s` is low-s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureComponents {
    pub r: U256,
    pub s: U256,
    /// Recovery id as parity of the nonce point's y coordinate.
    pub y_parity: bool,
}

impl SignatureComponents {
    pub fn recovery_id(&self) -> u8 {
        self.y_parity as u8
    }

    fn to_signature(self) -> Signature {
        Signature::new(self.r, self.s, self.y_parity)
    }

    fn from_signature(sig: &Signature) -> Self {
        Self {
            r: sig.r(),
            s: sig.s(),
            y_parity: sig.v(),
        }
    }
}

/// A signed transaction envelope ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub tx: UnsignedTransaction,
    pub signature: SignatureComponents,
    /// Canonical EIP-2718 bytes (plain RLP for legacy).
    pub raw: Bytes,
    /// Transaction hash, `keccak256(raw)`.
    pub hash: B256,
    /// Sender recovered from the envelope. `None` until verified.
    pub sender: Option<Address>,
}

/// Encode the exact payload that must be hashed and signed.
pub fn encode_unsigned(tx: &UnsignedTransaction) -> Result<Vec<u8>, CodecError> {
    Ok(match tx.to_consensus()? {
        ConsensusTx::Legacy(inner) => inner.encoded_for_signing(),
        ConsensusTx::Eip1559(inner) => inner.encoded_for_signing(),
    })
}

/// Keccak-256, the chain's signing hash.
pub fn digest(payload: &[u8]) -> B256 {
    keccak256(payload)
}

/// Digest of the signing payload of `tx`.
pub fn signing_hash(tx: &UnsignedTransaction) -> Result<B256, CodecError> {
    Ok(digest(&encode_unsigned(tx)?))
}

/// Assemble the signed envelope.
pub fn encode_signed(
    tx: &UnsignedTransaction,
    signature: SignatureComponents,
) -> Result<SignedTransaction, CodecError> {
    let sig = signature.to_signature();
    let envelope: TxEnvelope = match tx.to_consensus()? {
        ConsensusTx::Legacy(inner) => inner.into_signed(sig).into(),
        ConsensusTx::Eip1559(inner) => inner.into_signed(sig).into(),
    };

    Ok(SignedTransaction {
        tx: tx.clone(),
        signature,
        raw: envelope.encoded_2718().into(),
        hash: *envelope.tx_hash(),
        sender: None,
    })
}

/// Decode a signed envelope back into its parts.
pub fn decode_signed(raw: &[u8]) -> Result<(UnsignedTransaction, SignatureComponents), CodecError> {
    let mut buf = raw;
    let envelope =
        TxEnvelope::decode_2718(&mut buf).map_err(|e| CodecError::Malformed(e.to_string()))?;
    if !buf.is_empty() {
        return Err(CodecError::TrailingBytes(buf.len()));
    }

    let tx_type = u8::from(envelope.tx_type());
    match envelope {
        TxEnvelope::Legacy(signed) => {
            let (tx, sig, _) = signed.into_parts();
            let chain_id = tx.chain_id.ok_or(CodecError::Unprotected)?;
            let to = call_target(tx.to)?;
            Ok((
                UnsignedTransaction {
                    chain_id,
                    nonce: tx.nonce,
                    fees: FeeFields::Legacy {
                        gas_price: tx.gas_price,
                    },
                    gas_limit: tx.gas_limit,
                    to,
                    value: tx.value,
                    data: tx.input,
                    access_list: AccessList::default(),
                },
                SignatureComponents::from_signature(&sig),
            ))
        }
        TxEnvelope::Eip1559(signed) => {
            let (tx, sig, _) = signed.into_parts();
            let to = call_target(tx.to)?;
            Ok((
                UnsignedTransaction {
                    chain_id: tx.chain_id,
                    nonce: tx.nonce,
                    fees: FeeFields::FeeMarket {
                        max_fee_per_gas: tx.max_fee_per_gas,
                        max_priority_fee_per_gas: tx.max_priority_fee_per_gas,
                    },
                    gas_limit: tx.gas_limit,
                    to,
                    value: tx.value,
                    data: tx.input,
                    access_list: tx.access_list,
                },
                SignatureComponents::from_signature(&sig),
            ))
        }
        _ => Err(CodecError::UnsupportedType(tx_type)),
    }
}

fn call_target(kind: TxKind) -> Result<Address, CodecError> {
    match kind {
        TxKind::Call(to) => Ok(to),
        TxKind::Create => Err(CodecError::ContractCreation),
    }
}
