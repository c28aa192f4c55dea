// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Recovery id resolution.
//!
//! The signing oracle returns `(r, s)` only. The chain also needs the parity
//! of the nonce point's y coordinate, so we try both candidates, recover the
//! public key for each and keep the one whose address is the signer's.

use alloy::primitives::{keccak256, Address, B256, U256};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

use super::codec::SignatureComponents;

/// Errors produced while resolving the recovery id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecoveryError {
    /// Neither candidate recovers the expected address. The oracle signed
    /// with a different key, or over a different digest.
    #[error("Signature does not recover to {expected}")]
    SignatureRecoveryFailed { expected: Address },

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
}

/// Derive the account address from a public key:
/// the last 20 bytes of `keccak256(uncompressed_point[1..])`.
pub fn address_from_public_key(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// Recover the signer address for a given recovery id.
pub fn recover_address(
    digest: &B256,
    signature: &Signature,
    recovery_id: u8,
) -> Result<Address, RecoveryError> {
    let id = RecoveryId::from_byte(recovery_id).ok_or_else(|| {
        RecoveryError::InvalidSignature(format!("recovery id {recovery_id} out of range"))
    })?;
    let key = VerifyingKey::recover_from_prehash(digest.as_slice(), signature, id)
        .map_err(|e| RecoveryError::InvalidSignature(e.to_string()))?;
    Ok(address_from_public_key(&key))
}

/// Find the recovery id (0 or 1) under which `signature` over `digest`
/// recovers `expected`.
///
/// Candidates are tried in order and the first match wins. There is no
/// fallback value.
pub fn resolve_recovery_id(
    digest: &B256,
    signature: &Signature,
    expected: Address,
) -> Result<u8, RecoveryError> {
    for candidate in [0u8, 1] {
        match recover_address(digest, signature, candidate) {
            Ok(address) if address == expected => return Ok(candidate),
            Ok(address) => {
                tracing::trace!(candidate, recovered = %address, "Recovery id candidate rejected");
            }
            // A candidate that yields no valid point is just a non-match.
            Err(e) => {
                tracing::trace!(candidate, error = %e, "Recovery id candidate invalid");
            }
        }
    }

    Err(RecoveryError::SignatureRecoveryFailed { expected })
}

/// Combine a low-s signature and its resolved recovery id.
pub fn to_components(signature: &Signature, recovery_id: u8) -> SignatureComponents {
    let (r, s) = signature.split_bytes();
    SignatureComponents {
        r: U256::from_be_slice(r.as_slice()),
        s: U256::from_be_slice(s.as_slice()),
        y_parity: recovery_id == 1,
    }
}

/// Rebuild a k256 signature from envelope components.
pub fn from_components(components: &SignatureComponents) -> Result<Signature, RecoveryError> {
    Signature::from_scalars(
        components.r.to_be_bytes::<32>(),
        components.s.to_be_bytes::<32>(),
    )
    .map_err(|e| RecoveryError::InvalidSignature(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::b256;
    use k256::ecdsa::SigningKey;

    fn key(byte: u8) -> SigningKey {
        SigningKey::from_slice(&[byte; 32]).unwrap()
    }

    fn address_of(key: &SigningKey) -> Address {
        address_from_public_key(key.verifying_key())
    }

    #[test]
    fn test_resolves_recovery_id_of_local_signature() {
        let signer = key(0x11);
        for seed in 0u8..16 {
            let digest = keccak256([seed]);
            let (sig, recid) = signer.sign_prehash_recoverable(digest.as_slice()).unwrap();

            let resolved = resolve_recovery_id(&digest, &sig, address_of(&signer)).unwrap();
            assert_eq!(resolved, recid.to_byte());
        }
    }

    #[test]
    fn test_foreign_key_fails_closed() {
        let signer = key(0x11);
        let other = key(0x22);
        let digest = keccak256(b"transfer");
        let (sig, _) = other.sign_prehash_recoverable(digest.as_slice()).unwrap();

        let err = resolve_recovery_id(&digest, &sig, address_of(&signer)).unwrap_err();
        assert_eq!(
            err,
            RecoveryError::SignatureRecoveryFailed {
                expected: address_of(&signer)
            }
        );
    }

    #[test]
    fn test_wrong_digest_fails_closed() {
        let signer = key(0x11);
        let (sig, _) = signer
            .sign_prehash_recoverable(keccak256(b"a").as_slice())
            .unwrap();

        assert!(resolve_recovery_id(&keccak256(b"b"), &sig, address_of(&signer)).is_err());
    }

    #[test]
    fn test_eip155_reference_signature() {
        // EIP-155 example, signed with the 0x4646...46 key.
        let digest = b256!("daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53");
        let components = SignatureComponents {
            r: U256::from_str_radix(
                "18515461264373351373200002665853028612451056578545711640558177340181847433846",
                10,
            )
            .unwrap(),
            s: U256::from_str_radix(
                "46948507304638947509940763649030358759909902576025900602547168820602576006531",
                10,
            )
            .unwrap(),
            y_parity: false,
        };
        let sig = from_components(&components).unwrap();

        let expected = address_of(&key(0x46));
        assert_eq!(resolve_recovery_id(&digest, &sig, expected).unwrap(), 0);
        assert_eq!(to_components(&sig, 0), components);
    }

    #[test]
    fn test_address_derivation_is_stable() {
        let signer = key(0x46);
        assert_eq!(
            address_of(&signer),
            alloy::primitives::address!("9d8A62f656a8d1615C1294fd71e9CFb3E4855A4F")
        );
    }
}
