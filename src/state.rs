// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signer context: every component wired together and checked at startup.

use std::sync::Arc;

use alloy::primitives::{Address, B256};
use serde::Serialize;
use tracing::{info, warn};

use crate::blockchain::{
    builder::TransactionBuilder,
    erc20::{load_abi, TokenContract},
    identity::{IdentityError, SignerIdentity},
    kms::{AwsKmsOracle, RemoteSigningClient, SigningOracle},
    node::{ChainNode, RpcNode},
    nonce::NonceSequencer,
    signer::KmsSigner,
    tracker::SubmissionTracker,
    transfer::TransferService,
    types::NetworkConfig,
};
use crate::config::{ConfigError, KeyConfig, SignerConfig};
use crate::error::TransferError;

/// Outcome of checking the KMS key on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyReport {
    /// Address derived from the key's public key.
    pub address: Address,
    pub configured_address: Option<Address>,
    /// `None` when no address is configured.
    pub matches_config: Option<bool>,
    /// Digest the key signed and that recovered to `address`.
    pub probe_digest: B256,
}

/// Discover the address behind the configured KMS key and prove it signs.
///
/// Needs KMS access only, so it also works while `SIGNER_ADDRESS` is unset
/// or wrong.
pub async fn verify_key(config: &KeyConfig) -> Result<KeyReport, TransferError> {
    let oracle = AwsKmsOracle::new(
        config.kms_key_id.clone(),
        config.kms_region.clone(),
        config.kms_endpoint_url.clone(),
    )
    .await;
    inspect_key(config, Arc::new(oracle)).await
}

pub async fn inspect_key(
    config: &KeyConfig,
    oracle: Arc<dyn SigningOracle>,
) -> Result<KeyReport, TransferError> {
    let client = Arc::new(RemoteSigningClient::new(
        oracle,
        config.kms_timeout,
        config.kms_max_attempts,
    ));
    let identity = SignerIdentity::discover(&client, config.chain_id.unwrap_or_default()).await?;
    let address = identity.address;

    let matches_config = config.signer_address.map(|expected| expected == address);
    match config.signer_address {
        Some(expected) if expected != address => {
            warn!(expected = %expected, actual = %address, "Key does not control the configured address")
        }
        Some(_) => {}
        None => info!(address = %address, "No signer address configured"),
    }

    let probe_digest = KmsSigner::new(client, Arc::new(identity)).probe().await?;
    info!(address = %address, probe_digest = %probe_digest, "Key signed the probe digest");

    Ok(KeyReport {
        address,
        configured_address: config.signer_address,
        matches_config,
        probe_digest,
    })
}

/// Shared components of a running signer.
#[derive(Clone)]
pub struct SignerContext {
    pub config: SignerConfig,
    pub network: NetworkConfig,
    pub node: Arc<dyn ChainNode>,
    pub token: Arc<TokenContract>,
    pub identity: Arc<SignerIdentity>,
    pub nonces: Arc<NonceSequencer>,
    pub signer: Arc<KmsSigner>,
    pub builder: Arc<TransactionBuilder>,
    pub tracker: Arc<SubmissionTracker>,
}

impl SignerContext {
    /// Connect to the configured node and KMS key.
    pub async fn initialize(config: SignerConfig) -> Result<Self, ConfigError> {
        let node = RpcNode::new(&config.rpc_url, config.rpc_timeout).map_err(|e| {
            ConfigError::Invalid {
                name: crate::config::NODE_RPC_URL_ENV,
                message: e.to_string(),
            }
        })?;
        let oracle = AwsKmsOracle::new(
            config.kms_key_id.clone(),
            config.kms_region.clone(),
            config.kms_endpoint_url.clone(),
        )
        .await;
        let abi = load_abi(&config.token_abi_path).map_err(|e| ConfigError::Invalid {
            name: crate::config::TOKEN_ABI_PATH_ENV,
            message: e.to_string(),
        })?;
        let token = TokenContract::new(config.token_address, config.token_decimals, abi);

        Self::with_components(config, Arc::new(node), Arc::new(oracle), token).await
    }

    /// Wire the given node, oracle and token and run the startup checks:
    /// chain id, signer address and token decimals.
    pub async fn with_components(
        config: SignerConfig,
        node: Arc<dyn ChainNode>,
        oracle: Arc<dyn SigningOracle>,
        token: TokenContract,
    ) -> Result<Self, ConfigError> {
        let actual = node
            .chain_id()
            .await
            .map_err(|e| ConfigError::Startup(e.to_string()))?;
        if actual != config.chain_id {
            return Err(ConfigError::ChainMismatch {
                expected: config.chain_id,
                actual,
            });
        }

        let client = Arc::new(
            RemoteSigningClient::new(oracle, config.kms_timeout, config.kms_max_attempts),
        );
        let identity = SignerIdentity::resolve(&client, config.signer_address, config.chain_id)
            .await
            .map_err(|e| match e {
                IdentityError::AddressMismatch { .. } => ConfigError::Invalid {
                    name: crate::config::SIGNER_ADDRESS_ENV,
                    message: e.to_string(),
                },
                IdentityError::Oracle(oracle) => ConfigError::Startup(oracle.to_string()),
            })?;
        let identity = Arc::new(identity);

        let onchain = token
            .onchain_decimals(node.as_ref())
            .await
            .map_err(|e| ConfigError::Startup(e.to_string()))?;
        if onchain != token.decimals {
            return Err(ConfigError::DecimalsMismatch {
                expected: token.decimals,
                actual: onchain,
            });
        }

        let head = node
            .block_number()
            .await
            .map_err(|e| ConfigError::Startup(e.to_string()))?;

        let network = NetworkConfig::for_chain(config.chain_id, config.explorer_url.as_deref());
        if network.explorer_url.is_none() {
            warn!(chain_id = config.chain_id, "No block explorer known for chain");
        }

        let token = Arc::new(token);
        let nonces = Arc::new(NonceSequencer::new(node.clone()));
        let builder = Arc::new(TransactionBuilder::new(
            node.clone(),
            nonces.clone(),
            token.clone(),
            &identity,
            config.fee_policy.clone(),
        ));
        let signer = Arc::new(KmsSigner::new(client, identity.clone()));
        let tracker = Arc::new(SubmissionTracker::new(node.clone(), config.poll_interval));

        info!(
            network = %network.name,
            chain_id = config.chain_id,
            signer = %identity.address,
            token = %token.address,
            decimals = token.decimals,
            abi_functions = token.abi().functions().count(),
            head,
            "Signer context ready"
        );

        Ok(Self {
            config,
            network,
            node,
            token,
            identity,
            nonces,
            signer,
            builder,
            tracker,
        })
    }

    pub fn transfer_service(&self) -> TransferService {
        TransferService::new(
            self.builder.clone(),
            self.signer.clone(),
            self.tracker.clone(),
            self.nonces.clone(),
            self.network.clone(),
            self.config.confirmation_timeout,
        )
    }
}
