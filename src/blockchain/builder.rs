// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction building: validation, simulation, gas and fee estimation.
//!
//! Everything that can reject a request runs before a nonce is reserved, so
//! a failed build never disturbs the nonce sequence.

use std::{str::FromStr, sync::Arc};

use alloy::primitives::{Address, Bytes, U256};
use tracing::{debug, info};

use super::amount::{to_base_units, AmountError};
use super::codec::{FeeFields, UnsignedTransaction};
use super::erc20::{TokenContract, TokenError};
use super::identity::SignerIdentity;
use super::node::{CallRequest, ChainNode, NodeError};
use super::nonce::{NonceLease, NonceSequencer};

/// Standard priority fee floor (1.5 gwei).
pub const DEFAULT_PRIORITY_FEE_FLOOR: u128 = 1_500_000_000;

/// Envelope kind to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// EIP-1559. Falls back to legacy on chains without a base fee.
    FeeMarket,
    Legacy,
}

impl FromStr for EnvelopeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eip1559" | "eip-1559" | "fee_market" => Ok(Self::FeeMarket),
            "legacy" => Ok(Self::Legacy),
            other => Err(format!("unknown transaction kind {other:?}")),
        }
    }
}

/// Gas and fee safety margins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeePolicy {
    pub envelope: EnvelopeKind,
    /// Headroom over `eth_estimateGas`.
    pub gas_limit_margin_percent: u64,
    /// `max_fee = base_fee * multiplier / 100 + priority`.
    pub max_fee_multiplier_percent: u64,
    pub priority_fee_floor_wei: u128,
    /// Headroom over `eth_gasPrice` for legacy transactions.
    pub legacy_gas_price_margin_percent: u64,
    /// Minimum fee increase when replacing a pending transaction.
    pub replacement_fee_bump_percent: u64,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            envelope: EnvelopeKind::FeeMarket,
            gas_limit_margin_percent: 20,
            max_fee_multiplier_percent: 200,
            priority_fee_floor_wei: DEFAULT_PRIORITY_FEE_FLOOR,
            legacy_gas_price_margin_percent: 10,
            replacement_fee_bump_percent: 15,
        }
    }
}

/// Scale `value` by `percent / 100`, rounding up.
fn scale_up(value: u128, percent: u64) -> u128 {
    value
        .saturating_mul(u128::from(percent))
        .saturating_add(99)
        / 100
}

/// Gas estimate plus margin.
pub fn apply_gas_margin(estimate: u64, margin_percent: u64) -> u64 {
    let scaled = scale_up(u128::from(estimate), 100 + margin_percent);
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

/// Errors that reject a request before anything is signed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),

    #[error("Amount must be greater than zero")]
    ZeroAmount,

    #[error("Insufficient token balance: need {needed}, have {available}")]
    InsufficientTokenBalance { needed: U256, available: U256 },

    #[error("Insufficient native balance for gas: need {needed} wei, have {available} wei")]
    InsufficientNativeBalance { needed: U256, available: U256 },

    #[error("Simulation reverted: {0}")]
    SimulationReverted(String),

    #[error("Token contract error: {0}")]
    Token(String),

    #[error(transparent)]
    Node(#[from] NodeError),
}

impl From<TokenError> for BuildError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Node(e) => Self::Node(e),
            other => Self::Token(other.to_string()),
        }
    }
}

fn revert_or_node(err: NodeError) -> BuildError {
    if err.is_revert() {
        match &err {
            NodeError::Rpc { message, data, .. } => BuildError::SimulationReverted(match data {
                Some(data) => format!("{message} ({data})"),
                None => message.clone(),
            }),
            other => BuildError::SimulationReverted(other.to_string()),
        }
    } else {
        BuildError::Node(err)
    }
}

/// Parse a recipient address.
///
/// Mixed-case input must carry a valid EIP-55 checksum. All-lowercase and
/// all-uppercase input is accepted as is. The zero address is refused.
pub fn parse_recipient(input: &str) -> Result<Address, BuildError> {
    let input = input.trim();
    let hex = input
        .strip_prefix("0x")
        .ok_or_else(|| BuildError::InvalidRecipient(format!("{input:?} lacks 0x prefix")))?;

    if hex.len() != 40 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(BuildError::InvalidRecipient(format!(
            "{input:?} is not 20 hex-encoded bytes"
        )));
    }

    let has_lower = hex.bytes().any(|b| b.is_ascii_lowercase());
    let has_upper = hex.bytes().any(|b| b.is_ascii_uppercase());
    let address = if has_lower && has_upper {
        Address::parse_checksummed(input, None)
            .map_err(|_| BuildError::InvalidRecipient(format!("{input:?} has a bad checksum")))?
    } else {
        Address::from_str(input).map_err(|e| BuildError::InvalidRecipient(e.to_string()))?
    };

    if address.is_zero() {
        return Err(BuildError::InvalidRecipient(
            "zero address is not a valid recipient".to_string(),
        ));
    }
    Ok(address)
}

/// A call that passed validation and simulation. Holds no nonce yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedCall {
    pub chain_id: u64,
    /// Transaction target (the token contract for transfers).
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub gas_limit: u64,
    pub fees: FeeFields,
    /// Who receives the value (the token recipient for transfers).
    pub beneficiary: Address,
    /// Token amount in base units, or the native value for plain calls.
    pub amount: U256,
}

impl SimulatedCall {
    pub fn into_unsigned(self, nonce: u64) -> UnsignedTransaction {
        UnsignedTransaction {
            chain_id: self.chain_id,
            nonce,
            fees: self.fees,
            gas_limit: self.gas_limit,
            to: self.to,
            value: self.value,
            data: self.data,
            access_list: Default::default(),
        }
    }
}

/// An unsigned transaction with its reserved nonce.
#[derive(Debug)]
pub struct BuiltTransaction {
    pub tx: UnsignedTransaction,
    pub lease: NonceLease,
    pub beneficiary: Address,
    pub amount: U256,
}

/// Builds transactions for the signer address.
pub struct TransactionBuilder {
    node: Arc<dyn ChainNode>,
    nonces: Arc<NonceSequencer>,
    token: Arc<TokenContract>,
    from: Address,
    chain_id: u64,
    policy: FeePolicy,
}

impl TransactionBuilder {
    pub fn new(
        node: Arc<dyn ChainNode>,
        nonces: Arc<NonceSequencer>,
        token: Arc<TokenContract>,
        identity: &SignerIdentity,
        policy: FeePolicy,
    ) -> Self {
        Self {
            node,
            nonces,
            token,
            from: identity.address,
            chain_id: identity.chain_id,
            policy,
        }
    }

    pub fn policy(&self) -> &FeePolicy {
        &self.policy
    }

    /// Validate and simulate an ERC-20 transfer.
    ///
    /// # Arguments
    /// * `recipient` - Recipient address (0x + 40 hex chars)
    /// * `amount` - Amount in token units (e.g., "10.5")
    pub async fn simulate_transfer(
        &self,
        recipient: &str,
        amount: &str,
    ) -> Result<SimulatedCall, BuildError> {
        let to = parse_recipient(recipient)?;
        let raw_amount = to_base_units(amount, self.token.decimals)?;
        if raw_amount.is_zero() {
            return Err(BuildError::ZeroAmount);
        }

        let available = self
            .token
            .balance_of(self.node.as_ref(), self.from)
            .await?;
        if available < raw_amount {
            return Err(BuildError::InsufficientTokenBalance {
                needed: raw_amount,
                available,
            });
        }

        let call = CallRequest {
            from: self.from,
            to: self.token.address,
            value: U256::ZERO,
            data: TokenContract::encode_transfer(to, raw_amount),
        };

        let returned = self.node.call(&call).await.map_err(revert_or_node)?;
        if !TokenContract::decode_transfer_result(&returned)? {
            return Err(BuildError::SimulationReverted(
                "transfer returned false".to_string(),
            ));
        }

        let simulated = self.price(call, to, raw_amount).await?;
        info!(
            recipient = %to,
            amount_raw = %raw_amount,
            gas_limit = simulated.gas_limit,
            "Transfer simulated"
        );
        Ok(simulated)
    }

    /// Validate and simulate an arbitrary contract call.
    pub async fn simulate_contract_call(
        &self,
        contract: Address,
        data: Bytes,
        value: U256,
    ) -> Result<SimulatedCall, BuildError> {
        if contract.is_zero() {
            return Err(BuildError::InvalidRecipient(
                "zero address is not a valid contract".to_string(),
            ));
        }

        let call = CallRequest {
            from: self.from,
            to: contract,
            value,
            data,
        };
        self.node.call(&call).await.map_err(revert_or_node)?;

        let simulated = self.price(call, contract, value).await?;
        info!(
            contract = %contract,
            gas_limit = simulated.gas_limit,
            "Contract call simulated"
        );
        Ok(simulated)
    }

    /// Estimate gas, pick fees and check the native balance covers them.
    async fn price(
        &self,
        call: CallRequest,
        beneficiary: Address,
        amount: U256,
    ) -> Result<SimulatedCall, BuildError> {
        let estimate = self
            .node
            .estimate_gas(&call)
            .await
            .map_err(revert_or_node)?;
        let gas_limit = apply_gas_margin(estimate, self.policy.gas_limit_margin_percent);
        let fees = self.current_fees().await?;

        let needed = U256::from(gas_limit) * U256::from(fees.max_fee_per_gas()) + call.value;
        let available = self.node.balance(self.from).await?;
        if available < needed {
            return Err(BuildError::InsufficientNativeBalance { needed, available });
        }

        debug!(estimate, gas_limit, ?fees, "Gas priced");
        Ok(SimulatedCall {
            chain_id: self.chain_id,
            to: call.to,
            value: call.value,
            data: call.data,
            gas_limit,
            fees,
            beneficiary,
            amount,
        })
    }

    /// Fee fields from current network conditions.
    pub async fn current_fees(&self) -> Result<FeeFields, NodeError> {
        if self.policy.envelope == EnvelopeKind::FeeMarket {
            if let Some(base_fee) = self.node.base_fee().await? {
                let suggested = match self.node.max_priority_fee().await {
                    Ok(fee) => fee,
                    Err(e) if e.is_transient() => return Err(e),
                    // Node without eth_maxPriorityFeePerGas.
                    Err(e) => {
                        debug!(error = %e, "No priority fee suggestion, using floor");
                        0
                    }
                };
                let priority = suggested.max(self.policy.priority_fee_floor_wei);
                let max_fee = scale_up(base_fee, self.policy.max_fee_multiplier_percent)
                    .saturating_add(priority);

                return Ok(FeeFields::FeeMarket {
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: priority,
                });
            }
            debug!("Latest block has no base fee, building legacy transaction");
        }

        let gas_price = self.node.gas_price().await?;
        Ok(FeeFields::Legacy {
            gas_price: scale_up(gas_price, 100 + self.policy.legacy_gas_price_margin_percent),
        })
    }

    /// Current fees bumped for replacing a pending transaction.
    pub async fn replacement_fees(&self) -> Result<FeeFields, NodeError> {
        let bump = 100 + self.policy.replacement_fee_bump_percent;
        Ok(match self.current_fees().await? {
            FeeFields::Legacy { gas_price } => FeeFields::Legacy {
                gas_price: scale_up(gas_price, bump),
            },
            FeeFields::FeeMarket {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => FeeFields::FeeMarket {
                max_fee_per_gas: scale_up(max_fee_per_gas, bump),
                max_priority_fee_per_gas: scale_up(max_priority_fee_per_gas, bump),
            },
        })
    }

    /// Reserve a nonce for a simulated call.
    pub async fn finalize(&self, simulated: SimulatedCall) -> Result<BuiltTransaction, NodeError> {
        let lease = self.nonces.reserve(self.from).await?;
        let beneficiary = simulated.beneficiary;
        let amount = simulated.amount;
        let tx = simulated.into_unsigned(lease.nonce());
        Ok(BuiltTransaction {
            tx,
            lease,
            beneficiary,
            amount,
        })
    }

    /// Simulate and reserve a nonce for an ERC-20 transfer.
    pub async fn build_transfer(
        &self,
        recipient: &str,
        amount: &str,
    ) -> Result<BuiltTransaction, BuildError> {
        let simulated = self.simulate_transfer(recipient, amount).await?;
        Ok(self.finalize(simulated).await?)
    }

    /// Simulate and reserve a nonce for a contract call.
    pub async fn build_contract_call(
        &self,
        contract: Address,
        data: Bytes,
        value: U256,
    ) -> Result<BuiltTransaction, BuildError> {
        let simulated = self.simulate_contract_call(contract, data, value).await?;
        Ok(self.finalize(simulated).await?)
    }
}
