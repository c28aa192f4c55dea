// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction signing through the remote oracle.
//!
//! This is the only path that produces signed transactions:
//!
//! 1. Encode the signing payload and hash it.
//! 2. Have the oracle sign the digest (low-s normalized).
//! 3. Resolve the recovery id against the signer address.
//! 4. Assemble the envelope.
//! 5. Decode the envelope again and check it recovers the signer.
//!
//! Nothing leaves this module unless step 5 passed.

use std::sync::Arc;

use alloy::primitives::{keccak256, Address, B256};
use tracing::{debug, error};

use super::codec::{decode_signed, encode_signed, signing_hash, CodecError, SignedTransaction, UnsignedTransaction};
use super::identity::SignerIdentity;
use super::kms::{OracleError, RemoteSigningClient};
use super::recovery::{from_components, recover_address, resolve_recovery_id, to_components, RecoveryError};

/// Errors produced while signing a transaction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SigningError {
    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Transaction is for chain {actual}, signer is bound to chain {expected}")]
    ChainIdMismatch { expected: u64, actual: u64 },

    #[error("Signed envelope does not match the transaction that was signed")]
    EnvelopeMismatch,

    #[error("Signed envelope carries a high-s signature")]
    HighS,

    #[error("Signed envelope recovers {actual}, expected {expected}")]
    SenderMismatch { expected: Address, actual: Address },
}

/// Signs transactions for one [`SignerIdentity`].
pub struct KmsSigner {
    client: Arc<RemoteSigningClient>,
    identity: Arc<SignerIdentity>,
}

impl KmsSigner {
    pub fn new(client: Arc<RemoteSigningClient>, identity: Arc<SignerIdentity>) -> Self {
        Self { client, identity }
    }

    pub fn identity(&self) -> &SignerIdentity {
        &self.identity
    }

    /// Sign `tx` and verify the resulting envelope.
    pub async fn sign_transaction(
        &self,
        tx: &UnsignedTransaction,
    ) -> Result<SignedTransaction, SigningError> {
        if tx.chain_id != self.identity.chain_id {
            return Err(SigningError::ChainIdMismatch {
                expected: self.identity.chain_id,
                actual: tx.chain_id,
            });
        }

        let digest = signing_hash(tx)?;
        let signature = self.client.sign_digest(digest).await?;

        let recovery_id = match resolve_recovery_id(&digest, &signature, self.identity.address) {
            Ok(id) => id,
            Err(e) => {
                error!(
                    digest = %digest,
                    signer = %self.identity.address,
                    nonce = tx.nonce,
                    "Oracle signature does not recover the signer address"
                );
                return Err(e.into());
            }
        };

        let mut signed = encode_signed(tx, to_components(&signature, recovery_id))?;
        signed.sender = Some(self.verify(&signed)?);

        debug!(
            tx_hash = %signed.hash,
            nonce = tx.nonce,
            recovery_id,
            "Transaction signed"
        );
        Ok(signed)
    }

    /// Check a signed envelope decodes to its transaction and recovers
    /// the signer address. Returns the recovered sender.
    pub fn verify(&self, signed: &SignedTransaction) -> Result<Address, SigningError> {
        let (decoded, components) = decode_signed(&signed.raw)?;
        if decoded != signed.tx || components != signed.signature {
            return Err(SigningError::EnvelopeMismatch);
        }

        let signature = from_components(&components)?;
        if signature.normalize_s().is_some() {
            return Err(SigningError::HighS);
        }

        let digest = signing_hash(&decoded)?;
        let sender = recover_address(&digest, &signature, components.recovery_id())?;
        if sender != self.identity.address {
            return Err(SigningError::SenderMismatch {
                expected: self.identity.address,
                actual: sender,
            });
        }
        if signed.hash != keccak256(&signed.raw) {
            return Err(SigningError::EnvelopeMismatch);
        }
        Ok(sender)
    }

    /// Sign a throwaway digest and check it recovers the signer address.
    ///
    /// Used by the operator `verify` command. Nothing is broadcast.
    pub async fn probe(&self) -> Result<B256, SigningError> {
        let digest = keccak256(format!(
            "kms-signer probe {} {}",
            self.identity.chain_id,
            chrono::Utc::now().timestamp()
        ));
        let signature = self.client.sign_digest(digest).await?;
        resolve_recovery_id(&digest, &signature, self.identity.address)?;
        Ok(digest)
    }
}
