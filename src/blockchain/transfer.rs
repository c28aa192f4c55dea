// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transfer orchestration.
//!
//! Each request moves through [`TransferStage`]s:
//!
//! ```text
//! Building -> Simulated -> Signed -> Broadcast -> ConfirmedSuccess
//!                                             -> ConfirmedReverted
//!                                             -> TimeoutUnknown
//! (any non-terminal stage) -> Rejected
//! ```
//!
//! Cancellation is honoured up to the broadcast. Once the node has the
//! transaction the only way to undo it is an explicit nonce replacement.

use std::{sync::Arc, time::Duration};

use alloy::primitives::{Address, Bytes, B256, U256};
use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::builder::{SimulatedCall, TransactionBuilder};
use super::codec::{SignedTransaction, UnsignedTransaction};
use super::nonce::{NonceLease, NonceSequencer};
use super::signer::KmsSigner;
use super::tracker::{SubmissionTracker, SubmitError};
use super::types::{NetworkConfig, SubmissionResult, SubmissionStatus, TransferIntent};
use crate::error::{FailureKind, TransferError};

/// Gas for a plain value transfer.
const NATIVE_TRANSFER_GAS: u64 = 21_000;

/// Purpose tag recorded for nonce replacements.
pub const REPLACEMENT_PURPOSE: &str = "nonce_replacement";

/// Lifecycle stage of one transfer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStage {
    Building,
    Simulated,
    Signed,
    Broadcast,
    ConfirmedSuccess,
    ConfirmedReverted,
    TimeoutUnknown,
    Rejected,
}

impl TransferStage {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::ConfirmedSuccess | Self::ConfirmedReverted | Self::TimeoutUnknown | Self::Rejected
        )
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_advance_to(self, next: Self) -> bool {
        use TransferStage::*;
        match (self, next) {
            (current, Rejected) => !current.is_terminal(),
            (Building, Simulated) | (Simulated, Signed) | (Signed, Broadcast) => true,
            // Re-signing after a nonce rebase.
            (Signed, Signed) => true,
            (Broadcast, ConfirmedSuccess | ConfirmedReverted | TimeoutUnknown) => true,
            _ => false,
        }
    }
}

/// Stage tracking for one request.
struct TransferRun {
    id: Uuid,
    stage: TransferStage,
}

impl TransferRun {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            stage: TransferStage::Building,
        }
    }

    fn advance(&mut self, next: TransferStage) -> Result<(), TransferError> {
        if !self.stage.can_advance_to(next) {
            error!(
                intent_id = %self.id,
                from = ?self.stage,
                to = ?next,
                "Illegal transfer stage transition refused"
            );
            return Err(TransferError::new(
                FailureKind::Rejected,
                format!("illegal transition {:?} -> {:?}", self.stage, next),
            ));
        }
        info!(intent_id = %self.id, from = ?self.stage, to = ?next, "Transfer stage");
        self.stage = next;
        Ok(())
    }

    fn reject(&mut self, err: TransferError) -> TransferError {
        if !self.stage.is_terminal() {
            warn!(
                intent_id = %self.id,
                stage = ?self.stage,
                kind = %err.kind,
                tx_hash = ?err.tx_hash,
                error = %err.message,
                "Transfer rejected"
            );
            self.stage = TransferStage::Rejected;
        }
        err
    }
}

/// What a run is sending, for the final record.
struct Outgoing<'a> {
    beneficiary: Address,
    amount: U256,
    purpose: &'a str,
}

/// Signs, broadcasts and confirms transfers for the signer address.
pub struct TransferService {
    builder: Arc<TransactionBuilder>,
    signer: Arc<KmsSigner>,
    tracker: Arc<SubmissionTracker>,
    nonces: Arc<NonceSequencer>,
    network: NetworkConfig,
    confirmation_timeout: Duration,
}

impl TransferService {
    pub fn new(
        builder: Arc<TransactionBuilder>,
        signer: Arc<KmsSigner>,
        tracker: Arc<SubmissionTracker>,
        nonces: Arc<NonceSequencer>,
        network: NetworkConfig,
        confirmation_timeout: Duration,
    ) -> Self {
        Self {
            builder,
            signer,
            tracker,
            nonces,
            network,
            confirmation_timeout,
        }
    }

    pub fn signer_address(&self) -> Address {
        self.signer.identity().address
    }

    /// Send `intent.amount` tokens to `intent.recipient`.
    pub async fn transfer(
        &self,
        intent: &TransferIntent,
        cancel: &CancellationToken,
    ) -> Result<SubmissionResult, TransferError> {
        let mut run = TransferRun::new(intent.id);
        info!(
            intent_id = %intent.id,
            recipient = %intent.recipient,
            amount = %intent.amount,
            purpose = %intent.purpose,
            "Transfer requested"
        );

        let simulated = self
            .builder
            .simulate_transfer(&intent.recipient, &intent.amount)
            .await
            .map_err(|e| run.reject(e.into()))?;
        run.advance(TransferStage::Simulated)?;

        self.execute(run, simulated, &intent.purpose, cancel).await
    }

    /// Sign and send an arbitrary contract call.
    pub async fn contract_call(
        &self,
        contract: Address,
        data: Bytes,
        value: U256,
        purpose: &str,
        cancel: &CancellationToken,
    ) -> Result<SubmissionResult, TransferError> {
        let mut run = TransferRun::new(Uuid::new_v4());
        info!(intent_id = %run.id, contract = %contract, purpose, "Contract call requested");

        let simulated = self
            .builder
            .simulate_contract_call(contract, data, value)
            .await
            .map_err(|e| run.reject(e.into()))?;
        run.advance(TransferStage::Simulated)?;

        self.execute(run, simulated, purpose, cancel).await
    }

    async fn execute(
        &self,
        mut run: TransferRun,
        simulated: SimulatedCall,
        purpose: &str,
        cancel: &CancellationToken,
    ) -> Result<SubmissionResult, TransferError> {
        if cancel.is_cancelled() {
            return Err(run.reject(TransferError::cancelled(
                "cancelled before nonce reservation",
            )));
        }

        let built = self
            .builder
            .finalize(simulated)
            .await
            .map_err(|e| run.reject(e.into()))?;
        let outgoing = Outgoing {
            beneficiary: built.beneficiary,
            amount: built.amount,
            purpose,
        };

        let signed = self
            .sign_and_submit(&mut run, built.tx, built.lease, cancel)
            .await?;
        self.confirm(run, signed, outgoing, cancel).await
    }

    /// Sign and broadcast, resolving the nonce lease either way.
    ///
    /// A "nonce too low" answer to the first broadcast attempt is retried
    /// exactly once on a rebased nonce.
    async fn sign_and_submit(
        &self,
        run: &mut TransferRun,
        mut tx: UnsignedTransaction,
        mut lease: NonceLease,
        cancel: &CancellationToken,
    ) -> Result<SignedTransaction, TransferError> {
        let mut rebased = false;

        loop {
            let signed = match self.signer.sign_transaction(&tx).await {
                Ok(signed) => signed,
                Err(e) => {
                    self.nonces.release(lease).await;
                    return Err(run.reject(e.into()));
                }
            };
            if let Err(e) = run.advance(TransferStage::Signed) {
                self.nonces.release(lease).await;
                return Err(e);
            }

            if cancel.is_cancelled() {
                self.nonces.release(lease).await;
                return Err(run.reject(TransferError::cancelled("cancelled before broadcast")));
            }

            match self.tracker.submit(&signed).await {
                Ok(_) => {
                    self.nonces.commit(lease).await;
                    run.advance(TransferStage::Broadcast)?;
                    return Ok(signed);
                }
                Err(SubmitError::NonceTooLow(e)) if !rebased => {
                    warn!(
                        intent_id = %run.id,
                        nonce = tx.nonce,
                        error = %e,
                        "Nonce too low, rebasing once"
                    );
                    lease = self
                        .nonces
                        .rebase(lease)
                        .await
                        .map_err(|e| run.reject(e.into()))?;
                    tx.nonce = lease.nonce();
                    rebased = true;
                }
                Err(e @ (SubmitError::NonceTooLow(_) | SubmitError::NonceOccupied(_))) => {
                    error!(
                        intent_id = %run.id,
                        nonce = tx.nonce,
                        error = %e,
                        "Nonce stuck, operator action required"
                    );
                    self.nonces.forget(lease).await;
                    return Err(run.reject(e.into()));
                }
                Err(e @ SubmitError::Rejected(_)) => {
                    self.nonces.release(lease).await;
                    return Err(run.reject(e.into()));
                }
                Err(e @ SubmitError::Unavailable(_)) => {
                    self.nonces.forget(lease).await;
                    let err = TransferError::from(e).with_tx_hash(signed.hash);
                    return Err(run.reject(err));
                }
            }
        }
    }

    async fn confirm(
        &self,
        mut run: TransferRun,
        signed: SignedTransaction,
        outgoing: Outgoing<'_>,
        cancel: &CancellationToken,
    ) -> Result<SubmissionResult, TransferError> {
        let submitted_at = Utc::now();
        let tx_hash = signed.hash;

        let (status, receipt) = match self
            .tracker
            .await_confirmation(tx_hash, self.confirmation_timeout, cancel)
            .await
        {
            Ok(receipt) if receipt.success => (SubmissionStatus::Success, Some(receipt)),
            Ok(receipt) => (SubmissionStatus::Reverted, Some(receipt)),
            Err(e) => {
                warn!(intent_id = %run.id, tx_hash = %tx_hash, error = %e, "Outcome unknown, reconcile by hash");
                (SubmissionStatus::Timeout, None)
            }
        };

        run.advance(match status {
            SubmissionStatus::Success => TransferStage::ConfirmedSuccess,
            SubmissionStatus::Reverted => TransferStage::ConfirmedReverted,
            SubmissionStatus::Timeout => TransferStage::TimeoutUnknown,
        })
        .map_err(|e| e.with_tx_hash(tx_hash))?;

        Ok(SubmissionResult {
            intent_id: run.id,
            tx_hash,
            status,
            gas_used: receipt.as_ref().map(|r| r.gas_used),
            block_number: receipt.as_ref().and_then(|r| r.block_number),
            explorer_url: self.network.tx_url(&tx_hash),
            nonce: signed.tx.nonce,
            from: self.signer_address(),
            to: outgoing.beneficiary,
            amount_raw: outgoing.amount,
            purpose: outgoing.purpose.to_string(),
            submitted_at,
            confirmed_at: receipt.map(|_| Utc::now()),
        })
    }

    /// Replace whatever is pending at `nonce` with a zero-value self-transfer.
    ///
    /// Operator escape hatch for a stuck nonce. Fees are bumped over current
    /// network levels so the node accepts the replacement.
    pub async fn replace_nonce(
        &self,
        nonce: u64,
        cancel: &CancellationToken,
    ) -> Result<SubmissionResult, TransferError> {
        let mut run = TransferRun::new(Uuid::new_v4());
        let address = self.signer_address();

        let snapshot = self
            .nonces
            .snapshot(address)
            .await
            .map_err(|e| run.reject(e.into()))?;
        if nonce < snapshot.latest || nonce >= snapshot.pending {
            return Err(run.reject(TransferError::new(
                FailureKind::InvalidRequest,
                format!(
                    "nonce {nonce} is not pending (confirmed count {}, pending count {})",
                    snapshot.latest, snapshot.pending
                ),
            )));
        }

        let fees = self
            .builder
            .replacement_fees()
            .await
            .map_err(|e| run.reject(e.into()))?;
        let tx = UnsignedTransaction {
            chain_id: self.signer.identity().chain_id,
            nonce,
            fees,
            gas_limit: NATIVE_TRANSFER_GAS,
            to: address,
            value: U256::ZERO,
            data: Bytes::new(),
            access_list: Default::default(),
        };
        warn!(intent_id = %run.id, nonce, ?fees, "Replacing pending nonce");
        run.advance(TransferStage::Simulated)?;

        let signed = self
            .signer
            .sign_transaction(&tx)
            .await
            .map_err(|e| run.reject(e.into()))?;
        run.advance(TransferStage::Signed)?;

        if cancel.is_cancelled() {
            return Err(run.reject(TransferError::cancelled("cancelled before broadcast")));
        }

        match self.tracker.submit(&signed).await {
            Ok(_) => run.advance(TransferStage::Broadcast)?,
            Err(e @ SubmitError::Unavailable(_)) => {
                let err = TransferError::from(e).with_tx_hash(signed.hash);
                return Err(run.reject(err));
            }
            Err(e) => return Err(run.reject(e.into())),
        }

        let outgoing = Outgoing {
            beneficiary: address,
            amount: U256::ZERO,
            purpose: REPLACEMENT_PURPOSE,
        };
        self.confirm(run, signed, outgoing, cancel).await
    }

    /// Look up the receipt of a previously broadcast transaction.
    pub async fn receipt(
        &self,
        tx_hash: B256,
    ) -> Result<Option<super::node::ReceiptSummary>, TransferError> {
        Ok(self.tracker.receipt(tx_hash).await?)
    }
}
