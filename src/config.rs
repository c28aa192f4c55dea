// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names and default values used
//! throughout the signer. Configuration is loaded from the environment at
//! startup and any problem is fatal.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `NODE_RPC_URL` | Node JSON-RPC endpoint (http/https) | Required |
//! | `CHAIN_ID` | Chain id, verified against the node | Required |
//! | `KMS_KEY_ID` | KMS key id, ARN or alias | Required |
//! | `KMS_REGION` | KMS region | SDK default chain |
//! | `KMS_ENDPOINT_URL` | KMS endpoint override | None |
//! | `SIGNER_ADDRESS` | Expected sender, verified against the key | Required |
//! | `TOKEN_CONTRACT_ADDRESS` | ERC-20 contract | Required |
//! | `TOKEN_DECIMALS` | Token decimals, verified on chain | `18` |
//! | `TOKEN_ABI_PATH` | Contract ABI JSON file | Required |
//! | `TX_KIND` | `eip1559` or `legacy` | `eip1559` |
//! | `GAS_LIMIT_MARGIN_PERCENT` | Headroom over the gas estimate | `20` |
//! | `MAX_FEE_MULTIPLIER_PERCENT` | Base fee multiplier for the max fee | `200` |
//! | `PRIORITY_FEE_FLOOR_WEI` | Minimum priority fee | `1500000000` |
//! | `LEGACY_GAS_PRICE_MARGIN_PERCENT` | Headroom over `eth_gasPrice` | `10` |
//! | `REPLACEMENT_FEE_BUMP_PERCENT` | Fee bump for nonce replacements | `15` |
//! | `CONFIRMATION_TIMEOUT_SECS` | Receipt wait bound | `120` |
//! | `CONFIRMATION_POLL_INTERVAL_MS` | Receipt poll interval | `2000` |
//! | `RPC_TIMEOUT_SECS` | Per node request | `10` |
//! | `KMS_TIMEOUT_SECS` | Per KMS request | `10` |
//! | `KMS_MAX_ATTEMPTS` | KMS attempts per request | `3` |
//! | `EXPLORER_URL` | Block explorer base URL | Known per chain |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::{path::PathBuf, str::FromStr, time::Duration};

use alloy::primitives::Address;

use crate::blockchain::builder::{EnvelopeKind, FeePolicy, DEFAULT_PRIORITY_FEE_FLOOR};

/// Environment variable name for the node RPC endpoint.
pub const NODE_RPC_URL_ENV: &str = "NODE_RPC_URL";

/// Environment variable name for the chain id.
///
/// Signatures are bound to this chain (EIP-155). Startup fails if the node
/// reports a different one.
pub const CHAIN_ID_ENV: &str = "CHAIN_ID";

pub const KMS_KEY_ID_ENV: &str = "KMS_KEY_ID";
pub const KMS_REGION_ENV: &str = "KMS_REGION";
pub const KMS_ENDPOINT_URL_ENV: &str = "KMS_ENDPOINT_URL";

/// Environment variable name for the expected signer address.
///
/// The address derived from the KMS public key must match, so a
/// misconfigured key id cannot sign for the wrong account.
pub const SIGNER_ADDRESS_ENV: &str = "SIGNER_ADDRESS";

pub const TOKEN_CONTRACT_ADDRESS_ENV: &str = "TOKEN_CONTRACT_ADDRESS";
pub const TOKEN_DECIMALS_ENV: &str = "TOKEN_DECIMALS";
pub const TOKEN_ABI_PATH_ENV: &str = "TOKEN_ABI_PATH";
pub const TX_KIND_ENV: &str = "TX_KIND";
pub const GAS_LIMIT_MARGIN_PERCENT_ENV: &str = "GAS_LIMIT_MARGIN_PERCENT";
pub const MAX_FEE_MULTIPLIER_PERCENT_ENV: &str = "MAX_FEE_MULTIPLIER_PERCENT";
pub const PRIORITY_FEE_FLOOR_WEI_ENV: &str = "PRIORITY_FEE_FLOOR_WEI";
pub const LEGACY_GAS_PRICE_MARGIN_PERCENT_ENV: &str = "LEGACY_GAS_PRICE_MARGIN_PERCENT";
pub const REPLACEMENT_FEE_BUMP_PERCENT_ENV: &str = "REPLACEMENT_FEE_BUMP_PERCENT";
pub const CONFIRMATION_TIMEOUT_SECS_ENV: &str = "CONFIRMATION_TIMEOUT_SECS";
pub const CONFIRMATION_POLL_INTERVAL_MS_ENV: &str = "CONFIRMATION_POLL_INTERVAL_MS";
pub const RPC_TIMEOUT_SECS_ENV: &str = "RPC_TIMEOUT_SECS";
pub const KMS_TIMEOUT_SECS_ENV: &str = "KMS_TIMEOUT_SECS";
pub const KMS_MAX_ATTEMPTS_ENV: &str = "KMS_MAX_ATTEMPTS";
pub const EXPLORER_URL_ENV: &str = "EXPLORER_URL";

/// Environment variable name for the log output format.
///
/// # Values
/// - `json`: one JSON object per line
/// - anything else: human-readable
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_TOKEN_DECIMALS: u8 = 18;
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_CONFIRMATION_POLL_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_KMS_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_KMS_MAX_ATTEMPTS: u32 = 3;

/// Configuration errors. All of them stop the process at startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {message}")]
    Invalid { name: &'static str, message: String },

    #[error("Node reports chain {actual}, configured chain is {expected}")]
    ChainMismatch { expected: u64, actual: u64 },

    #[error("Token reports {actual} decimals, configured {expected}")]
    DecimalsMismatch { expected: u8, actual: u8 },

    /// A component could not be initialized from otherwise valid settings.
    #[error("Startup check failed: {0}")]
    Startup(String),
}

/// Everything the signer needs to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub kms_key_id: String,
    pub kms_region: Option<String>,
    pub kms_endpoint_url: Option<String>,
    pub signer_address: Address,
    pub token_address: Address,
    pub token_decimals: u8,
    pub token_abi_path: PathBuf,
    pub fee_policy: FeePolicy,
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
    pub rpc_timeout: Duration,
    pub kms_timeout: Duration,
    pub kms_max_attempts: u32,
    pub explorer_url: Option<String>,
}

impl SignerConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup };

        let fee_policy = FeePolicy {
            envelope: env.parsed_or(TX_KIND_ENV, EnvelopeKind::FeeMarket)?,
            gas_limit_margin_percent: env.parsed_or(GAS_LIMIT_MARGIN_PERCENT_ENV, 20)?,
            max_fee_multiplier_percent: env.parsed_or(MAX_FEE_MULTIPLIER_PERCENT_ENV, 200)?,
            priority_fee_floor_wei: env
                .parsed_or(PRIORITY_FEE_FLOOR_WEI_ENV, DEFAULT_PRIORITY_FEE_FLOOR)?,
            legacy_gas_price_margin_percent: env
                .parsed_or(LEGACY_GAS_PRICE_MARGIN_PERCENT_ENV, 10)?,
            replacement_fee_bump_percent: env.parsed_or(REPLACEMENT_FEE_BUMP_PERCENT_ENV, 15)?,
        };
        if fee_policy.max_fee_multiplier_percent < 100 {
            return Err(ConfigError::Invalid {
                name: MAX_FEE_MULTIPLIER_PERCENT_ENV,
                message: "must be at least 100".to_string(),
            });
        }
        // Nodes refuse replacements bumped by less than 10%.
        if fee_policy.replacement_fee_bump_percent < 10 {
            return Err(ConfigError::Invalid {
                name: REPLACEMENT_FEE_BUMP_PERCENT_ENV,
                message: "must be at least 10".to_string(),
            });
        }

        let kms_max_attempts = env.kms_max_attempts()?;

        Ok(Self {
            rpc_url: env.required(NODE_RPC_URL_ENV)?,
            chain_id: env.required_parsed(CHAIN_ID_ENV)?,
            kms_key_id: env.required(KMS_KEY_ID_ENV)?,
            kms_region: env.optional(KMS_REGION_ENV),
            kms_endpoint_url: env.optional(KMS_ENDPOINT_URL_ENV),
            signer_address: env.required_parsed(SIGNER_ADDRESS_ENV)?,
            token_address: env.required_parsed(TOKEN_CONTRACT_ADDRESS_ENV)?,
            token_decimals: env.parsed_or(TOKEN_DECIMALS_ENV, DEFAULT_TOKEN_DECIMALS)?,
            token_abi_path: PathBuf::from(env.required(TOKEN_ABI_PATH_ENV)?),
            fee_policy,
            confirmation_timeout: Duration::from_secs(
                env.parsed_or(CONFIRMATION_TIMEOUT_SECS_ENV, DEFAULT_CONFIRMATION_TIMEOUT_SECS)?,
            ),
            poll_interval: Duration::from_millis(env.parsed_or(
                CONFIRMATION_POLL_INTERVAL_MS_ENV,
                DEFAULT_CONFIRMATION_POLL_INTERVAL_MS,
            )?),
            rpc_timeout: Duration::from_secs(
                env.parsed_or(RPC_TIMEOUT_SECS_ENV, DEFAULT_RPC_TIMEOUT_SECS)?,
            ),
            kms_timeout: Duration::from_secs(
                env.parsed_or(KMS_TIMEOUT_SECS_ENV, DEFAULT_KMS_TIMEOUT_SECS)?,
            ),
            kms_max_attempts,
            explorer_url: env.optional(EXPLORER_URL_ENV),
        })
    }
}

/// The subset of settings needed to reach the KMS key.
///
/// Used by key verification, which must work before `SIGNER_ADDRESS` is
/// known. Node and token settings are not read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyConfig {
    pub kms_key_id: String,
    pub kms_region: Option<String>,
    pub kms_endpoint_url: Option<String>,
    pub kms_timeout: Duration,
    pub kms_max_attempts: u32,
    pub chain_id: Option<u64>,
    pub signer_address: Option<Address>,
}

impl KeyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup };
        Ok(Self {
            kms_key_id: env.required(KMS_KEY_ID_ENV)?,
            kms_region: env.optional(KMS_REGION_ENV),
            kms_endpoint_url: env.optional(KMS_ENDPOINT_URL_ENV),
            kms_timeout: Duration::from_secs(
                env.parsed_or(KMS_TIMEOUT_SECS_ENV, DEFAULT_KMS_TIMEOUT_SECS)?,
            ),
            kms_max_attempts: env.kms_max_attempts()?,
            chain_id: env.optional_parsed(CHAIN_ID_ENV)?,
            signer_address: env.optional_parsed(SIGNER_ADDRESS_ENV)?,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn optional(&self, name: &'static str) -> Option<String> {
        (self.lookup)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.optional(name).ok_or(ConfigError::Missing(name))
    }

    fn parse<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            message: e.to_string(),
        })
    }

    fn required_parsed<T>(&self, name: &'static str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Self::parse(name, &self.required(name)?)
    }

    fn optional_parsed<T>(&self, name: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.optional(name)
            .map(|value| Self::parse(name, &value))
            .transpose()
    }

    fn kms_max_attempts(&self) -> Result<u32, ConfigError> {
        let attempts = self.parsed_or(KMS_MAX_ATTEMPTS_ENV, DEFAULT_KMS_MAX_ATTEMPTS)?;
        if attempts == 0 {
            return Err(ConfigError::Invalid {
                name: KMS_MAX_ATTEMPTS_ENV,
                message: "must be at least 1".to_string(),
            });
        }
        Ok(attempts)
    }

    fn parsed_or<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(name) {
            Some(value) => Self::parse(name, &value),
            None => Ok(default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base() -> HashMap<&'static str, String> {
        HashMap::from([
            (NODE_RPC_URL_ENV, "https://rpc-amoy.polygon.technology".to_string()),
            (CHAIN_ID_ENV, "80002".to_string()),
            (KMS_KEY_ID_ENV, "alias/payouts".to_string()),
            (
                SIGNER_ADDRESS_ENV,
                "0x9d8A62f656a8d1615C1294fd71e9CFb3E4855A4F".to_string(),
            ),
            (
                TOKEN_CONTRACT_ADDRESS_ENV,
                "0x5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a".to_string(),
            ),
            (TOKEN_ABI_PATH_ENV, "/etc/signer/token.json".to_string()),
        ])
    }

    fn load(vars: &HashMap<&'static str, String>) -> Result<SignerConfig, ConfigError> {
        SignerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&base()).unwrap();

        assert_eq!(config.chain_id, 80002);
        assert_eq!(config.token_decimals, 18);
        assert_eq!(config.fee_policy, FeePolicy::default());
        assert_eq!(config.confirmation_timeout, Duration::from_secs(120));
        assert_eq!(config.poll_interval, Duration::from_millis(2_000));
        assert_eq!(config.rpc_timeout, Duration::from_secs(10));
        assert_eq!(config.kms_max_attempts, 3);
        assert_eq!(config.kms_region, None);
        assert_eq!(config.explorer_url, None);
    }

    #[test]
    fn test_overrides() {
        let mut vars = base();
        vars.insert(TX_KIND_ENV, "legacy".to_string());
        vars.insert(TOKEN_DECIMALS_ENV, "6".to_string());
        vars.insert(GAS_LIMIT_MARGIN_PERCENT_ENV, "30".to_string());
        vars.insert(KMS_REGION_ENV, "eu-west-1".to_string());
        vars.insert(CONFIRMATION_POLL_INTERVAL_MS_ENV, "500".to_string());

        let config = load(&vars).unwrap();
        assert_eq!(config.fee_policy.envelope, EnvelopeKind::Legacy);
        assert_eq!(config.fee_policy.gas_limit_margin_percent, 30);
        assert_eq!(config.token_decimals, 6);
        assert_eq!(config.kms_region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_missing_required() {
        let mut vars = base();
        vars.remove(KMS_KEY_ID_ENV);
        assert_eq!(load(&vars).unwrap_err(), ConfigError::Missing(KMS_KEY_ID_ENV));

        let mut vars = base();
        vars.insert(SIGNER_ADDRESS_ENV, "   ".to_string());
        assert_eq!(load(&vars).unwrap_err(), ConfigError::Missing(SIGNER_ADDRESS_ENV));
    }

    #[test]
    fn test_key_config_needs_only_the_key() {
        let vars = HashMap::from([(KMS_KEY_ID_ENV, "alias/payouts".to_string())]);
        let config = KeyConfig::from_lookup(|name| vars.get(name).cloned()).unwrap();

        assert_eq!(config.kms_key_id, "alias/payouts");
        assert_eq!(config.signer_address, None);
        assert_eq!(config.chain_id, None);
        assert_eq!(config.kms_max_attempts, DEFAULT_KMS_MAX_ATTEMPTS);

        let config = KeyConfig::from_lookup(|name| base().get(name).cloned()).unwrap();
        assert_eq!(config.chain_id, Some(80002));
        assert!(config.signer_address.is_some());

        let mut vars = base();
        vars.insert(SIGNER_ADDRESS_ENV, "0x1234".to_string());
        assert!(matches!(
            KeyConfig::from_lookup(|name| vars.get(name).cloned()),
            Err(ConfigError::Invalid { name, .. }) if name == SIGNER_ADDRESS_ENV
        ));
    }

    #[test]
    fn test_invalid_values() {
        for (name, value) in [
            (CHAIN_ID_ENV, "amoy"),
            (SIGNER_ADDRESS_ENV, "0x1234"),
            (TX_KIND_ENV, "eip4844"),
            (TOKEN_DECIMALS_ENV, "300"),
            (MAX_FEE_MULTIPLIER_PERCENT_ENV, "50"),
            (REPLACEMENT_FEE_BUMP_PERCENT_ENV, "5"),
            (KMS_MAX_ATTEMPTS_ENV, "0"),
        ] {
            let mut vars = base();
            vars.insert(name, value.to_string());
            assert!(
                matches!(load(&vars), Err(ConfigError::Invalid { name: n, .. }) if n == name),
                "{name}={value}"
            );
        }
    }
}
