// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Remote signing oracle (AWS KMS).
//!
//! The signing key lives in an HSM behind KMS. We only ever hold its public
//! key. The oracle signs 32-byte digests with `MessageType::Digest`, so KMS
//! does not hash a second time, and returns a DER-encoded ECDSA signature
//! without a recovery id.
//!
//! [`RemoteSigningClient`] wraps any [`SigningOracle`] with per-call timeouts,
//! bounded retries, low-s normalization and a cached public key.

use std::{future::Future, sync::Arc, time::Duration};

use alloy::primitives::B256;
use async_trait::async_trait;
use aws_sdk_kms::{
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::Blob,
    types::{KeySpec, MessageType, SigningAlgorithmSpec},
    Client,
};
use k256::{
    ecdsa::{Signature, VerifyingKey},
    pkcs8::DecodePublicKey,
};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Default delay before the first retry. Doubles on each attempt.
const DEFAULT_BACKOFF: Duration = Duration::from_millis(200);

/// Errors returned by the signing oracle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("Signing oracle unavailable: {0}")]
    Unavailable(String),

    #[error("Signing oracle throttled: {0}")]
    Throttled(String),

    #[error("Malformed oracle response: {0}")]
    Malformed(String),

    /// Access denied, disabled key, wrong key usage. Retrying cannot help.
    #[error("Signing oracle rejected the request: {0}")]
    Rejected(String),

    #[error("Signing oracle request timed out")]
    Timeout,
}

impl OracleError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

/// A remote key that signs digests.
#[async_trait]
pub trait SigningOracle: Send + Sync {
    /// DER-encoded SubjectPublicKeyInfo of the signing key.
    async fn public_key_der(&self) -> Result<Vec<u8>, OracleError>;

    /// DER-encoded ECDSA signature over a prehashed digest.
    async fn sign_digest(&self, digest: B256) -> Result<Vec<u8>, OracleError>;
}

/// [`SigningOracle`] backed by an AWS KMS `ECC_SECG_P256K1` key.
pub struct AwsKmsOracle {
    client: Client,
    key_id: String,
}

impl AwsKmsOracle {
    /// Build a KMS client from the default credential chain.
    ///
    /// # Arguments
    /// * `key_id` - Key id, ARN or alias
    /// * `region` - Region override (SDK default chain otherwise)
    /// * `endpoint_url` - Endpoint override, e.g. a local KMS emulator
    pub async fn new(key_id: String, region: Option<String>, endpoint_url: Option<String>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        if let Some(endpoint_url) = endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }
        let sdk_config = loader.load().await;

        info!(key_id = %key_id, "KMS signing oracle configured");
        Self {
            client: Client::new(&sdk_config),
            key_id,
        }
    }
}

#[async_trait]
impl SigningOracle for AwsKmsOracle {
    async fn public_key_der(&self) -> Result<Vec<u8>, OracleError> {
        let output = self
            .client
            .get_public_key()
            .key_id(&self.key_id)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        match output.key_spec() {
            Some(KeySpec::EccSecgP256K1) => {}
            other => {
                return Err(OracleError::Rejected(format!(
                    "key spec {other:?} is not ECC_SECG_P256K1"
                )))
            }
        }

        output
            .public_key()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or_else(|| OracleError::Malformed("missing public key".to_string()))
    }

    async fn sign_digest(&self, digest: B256) -> Result<Vec<u8>, OracleError> {
        let output = self
            .client
            .sign()
            .key_id(&self.key_id)
            .message(Blob::new(digest.as_slice()))
            .message_type(MessageType::Digest)
            .signing_algorithm(SigningAlgorithmSpec::EcdsaSha256)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        output
            .signature()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or_else(|| OracleError::Malformed("missing signature".to_string()))
    }
}

/// Map an SDK error onto the oracle failure taxonomy.
fn classify_sdk_error<E, R>(err: SdkError<E, R>) -> OracleError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::TimeoutError(_) => return OracleError::Timeout,
        SdkError::DispatchFailure(_) => return OracleError::Unavailable(message),
        _ => {}
    }

    match err.code() {
        Some("ThrottlingException") => OracleError::Throttled(message),
        Some(
            "KMSInternalException" | "DependencyTimeoutException" | "KeyUnavailableException",
        ) => OracleError::Unavailable(message),
        Some(_) => OracleError::Rejected(message),
        // No service error code: response or construction failure.
        None => OracleError::Unavailable(message),
    }
}

/// Parse a DER signature and normalize it to low-s.
pub fn parse_der_signature(der: &[u8]) -> Result<Signature, OracleError> {
    let signature =
        Signature::from_der(der).map_err(|e| OracleError::Malformed(e.to_string()))?;
    Ok(signature.normalize_s().unwrap_or(signature))
}

/// Client for a [`SigningOracle`] with timeouts, retries and key caching.
pub struct RemoteSigningClient {
    oracle: Arc<dyn SigningOracle>,
    public_key: OnceCell<VerifyingKey>,
    timeout: Duration,
    max_attempts: u32,
    backoff: Duration,
}

impl RemoteSigningClient {
    pub fn new(oracle: Arc<dyn SigningOracle>, timeout: Duration, max_attempts: u32) -> Self {
        Self {
            oracle,
            public_key: OnceCell::new(),
            timeout,
            max_attempts: max_attempts.max(1),
            backoff: DEFAULT_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Public key of the oracle key. Fetched once, then cached.
    pub async fn public_key(&self) -> Result<VerifyingKey, OracleError> {
        let oracle = &self.oracle;
        self.public_key
            .get_or_try_init(|| async move {
                let der = self
                    .with_retries("get_public_key", || async move {
                        oracle.public_key_der().await
                    })
                    .await?;
                VerifyingKey::from_public_key_der(&der)
                    .map_err(|e| OracleError::Malformed(format!("public key: {e}")))
            })
            .await
            .cloned()
    }

    /// Sign a digest. The returned signature is always low-s.
    pub async fn sign_digest(&self, digest: B256) -> Result<Signature, OracleError> {
        let oracle = &self.oracle;
        let signature = self
            .with_retries("sign", || async move {
                let der = oracle.sign_digest(digest).await?;
                parse_der_signature(&der)
            })
            .await?;

        debug!(digest = %digest, "Digest signed by oracle");
        Ok(signature)
    }

    async fn with_retries<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, OracleError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OracleError>>,
    {
        let mut attempt = 1u32;
        loop {
            let result = match tokio::time::timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(OracleError::Timeout),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff.saturating_mul(2u32.saturating_pow(attempt - 1));
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Signing oracle call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(operation, attempt, error = %e, "Signing oracle call failed");
                    return Err(e);
                }
            }
        }
    }
}
