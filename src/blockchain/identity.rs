// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signer identity: the address controlled by the oracle key.

use alloy::primitives::Address;
use k256::ecdsa::VerifyingKey;
use tracing::{error, info};

use super::kms::{OracleError, RemoteSigningClient};
use super::recovery::address_from_public_key;

/// Errors resolving the signer identity at startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error("Oracle key controls {actual}, expected {expected}")]
    AddressMismatch { expected: Address, actual: Address },
}

/// The account this process signs for. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerIdentity {
    pub chain_id: u64,
    pub address: Address,
    pub public_key: VerifyingKey,
}

impl SignerIdentity {
    /// Derive the identity from the oracle's public key.
    pub async fn discover(
        client: &RemoteSigningClient,
        chain_id: u64,
    ) -> Result<Self, OracleError> {
        let public_key = client.public_key().await?;
        Ok(Self {
            chain_id,
            address: address_from_public_key(&public_key),
            public_key,
        })
    }

    /// Derive the identity and check it against the configured address.
    pub async fn resolve(
        client: &RemoteSigningClient,
        expected: Address,
        chain_id: u64,
    ) -> Result<Self, IdentityError> {
        let identity = Self::discover(client, chain_id).await?;

        if identity.address != expected {
            error!(
                expected = %expected,
                actual = %identity.address,
                "Signer address mismatch"
            );
            return Err(IdentityError::AddressMismatch {
                expected,
                actual: identity.address,
            });
        }

        info!(address = %identity.address, chain_id, "Signer identity verified");
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::LocalKeyOracle;
    use std::{sync::Arc, time::Duration};

    fn client(oracle: Arc<LocalKeyOracle>) -> RemoteSigningClient {
        RemoteSigningClient::new(oracle, Duration::from_secs(5), 1)
    }

    #[tokio::test]
    async fn test_resolve_accepts_matching_address() {
        let oracle = Arc::new(LocalKeyOracle::new(0x11));
        let identity = SignerIdentity::resolve(&client(oracle.clone()), oracle.address(), 80002)
            .await
            .unwrap();

        assert_eq!(identity.address, oracle.address());
        assert_eq!(identity.chain_id, 80002);
    }

    #[tokio::test]
    async fn test_resolve_rejects_other_address() {
        let oracle = Arc::new(LocalKeyOracle::new(0x11));
        let other = LocalKeyOracle::new(0x22).address();

        let err = SignerIdentity::resolve(&client(oracle.clone()), other, 80002)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            IdentityError::AddressMismatch {
                expected: other,
                actual: oracle.address()
            }
        );
    }

    #[tokio::test]
    async fn test_discover_surfaces_oracle_errors() {
        let oracle = Arc::new(LocalKeyOracle::new(0x11));
        oracle.fail_public_key(OracleError::Rejected("NotFoundException".into()));

        let err = SignerIdentity::discover(&client(oracle), 1).await.unwrap_err();
        assert!(matches!(err, OracleError::Rejected(_)));
    }
}
