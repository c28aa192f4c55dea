// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Broadcast and confirmation tracking.
//!
//! Broadcasting is idempotent: a signed envelope always has the same hash,
//! so transport failures are retried with the identical bytes. Confirmation
//! polling is bounded by a timeout and can be cancelled. Both end states
//! mean "outcome unknown" and must be reconciled by hash, never re-sent.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use alloy::primitives::B256;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::codec::SignedTransaction;
use super::node::{ChainNode, NodeError, ReceiptSummary};

/// Broadcast attempts for transport failures.
pub const BROADCAST_ATTEMPTS: u32 = 3;

/// Delay before re-broadcasting after a transport failure.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Why a broadcast did not go through.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The node has already seen a transaction at this nonce from us.
    #[error("Nonce too low: {0}")]
    NonceTooLow(NodeError),

    /// A different transaction occupies this nonce in the mempool.
    #[error("Nonce occupied by another pending transaction: {0}")]
    NonceOccupied(NodeError),

    /// The node refused the transaction. Nothing is pending.
    #[error("Transaction rejected by node: {0}")]
    Rejected(NodeError),

    /// No answer from the node. The transaction may or may not be pending.
    #[error("Broadcast outcome unknown: {0}")]
    Unavailable(NodeError),
}

/// Why a confirmation wait ended without a receipt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    #[error("No receipt for {tx_hash} after {waited:?}")]
    Timeout { tx_hash: B256, waited: Duration },

    #[error("Confirmation wait for {tx_hash} cancelled")]
    Cancelled { tx_hash: B256 },
}

/// Broadcasts signed transactions and polls for their receipts.
pub struct SubmissionTracker {
    node: Arc<dyn ChainNode>,
    poll_interval: Duration,
    retry_delay: Duration,
}

impl SubmissionTracker {
    pub fn new(node: Arc<dyn ChainNode>, poll_interval: Duration) -> Self {
        Self {
            node,
            poll_interval,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Broadcast a signed transaction. Returns its hash once the node has it.
    pub async fn submit(&self, signed: &SignedTransaction) -> Result<B256, SubmitError> {
        let mut attempt = 1u32;
        loop {
            match self.node.send_raw_transaction(&signed.raw).await {
                Ok(hash) => {
                    if hash != signed.hash {
                        warn!(
                            expected = %signed.hash,
                            reported = %hash,
                            "Node reported a different transaction hash"
                        );
                    }
                    info!(tx_hash = %signed.hash, nonce = signed.tx.nonce, attempt, "Transaction broadcast");
                    return Ok(signed.hash);
                }
                Err(e) if e.is_already_known() => {
                    info!(tx_hash = %signed.hash, "Node already has transaction");
                    return Ok(signed.hash);
                }
                Err(e) if e.is_nonce_too_low() => {
                    // Attempt > 1 only follows a transport failure, so an earlier
                    // attempt may hold the nonce. The outcome is then tracked by
                    // hash and the transaction is never re-signed.
                    if attempt > 1 {
                        if self.is_known(signed.hash).await {
                            info!(tx_hash = %signed.hash, "Earlier broadcast attempt was mined");
                        } else {
                            warn!(
                                tx_hash = %signed.hash,
                                nonce = signed.tx.nonce,
                                error = %e,
                                "Nonce used after a lost broadcast, tracking earlier attempt"
                            );
                        }
                        return Ok(signed.hash);
                    }
                    return Err(SubmitError::NonceTooLow(e));
                }
                Err(e) if e.is_replacement_underpriced() => {
                    return Err(SubmitError::NonceOccupied(e));
                }
                Err(e) if e.is_transient() => {
                    if attempt >= BROADCAST_ATTEMPTS {
                        warn!(tx_hash = %signed.hash, attempt, error = %e, "Broadcast outcome unknown");
                        return Err(SubmitError::Unavailable(e));
                    }
                    warn!(
                        tx_hash = %signed.hash,
                        attempt,
                        error = %e,
                        "Broadcast failed, re-sending identical bytes"
                    );
                    tokio::time::sleep(self.retry_delay.saturating_mul(attempt)).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(tx_hash = %signed.hash, error = %e, "Broadcast rejected");
                    return Err(SubmitError::Rejected(e));
                }
            }
        }
    }

    async fn is_known(&self, hash: B256) -> bool {
        matches!(self.node.transaction_receipt(hash).await, Ok(Some(_)))
    }

    /// Poll for a receipt until `timeout` elapses or `cancel` fires.
    pub async fn await_confirmation(
        &self,
        tx_hash: B256,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ReceiptSummary, TrackerError> {
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            if cancel.is_cancelled() {
                return Err(TrackerError::Cancelled { tx_hash });
            }

            match self.node.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    info!(
                        tx_hash = %tx_hash,
                        success = receipt.success,
                        block_number = ?receipt.block_number,
                        gas_used = receipt.gas_used,
                        "Transaction confirmed"
                    );
                    return Ok(receipt);
                }
                Ok(None) => debug!(tx_hash = %tx_hash, "Receipt not available yet"),
                // Keep polling through node hiccups until the deadline.
                Err(e) => warn!(tx_hash = %tx_hash, error = %e, "Receipt lookup failed"),
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(tx_hash = %tx_hash, waited_secs = timeout.as_secs(), "Confirmation timed out");
                return Err(TrackerError::Timeout {
                    tx_hash,
                    waited: now - started,
                });
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval.min(deadline - now)) => {},
                _ = cancel.cancelled() => {
                    info!(tx_hash = %tx_hash, "Confirmation wait cancelled");
                    return Err(TrackerError::Cancelled { tx_hash });
                }
            }
        }
    }

    /// Single receipt lookup.
    pub async fn receipt(&self, tx_hash: B256) -> Result<Option<ReceiptSummary>, NodeError> {
        self.node.transaction_receipt(tx_hash).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::codec::{encode_signed, FeeFields, SignatureComponents, UnsignedTransaction};
    use crate::testing::{rpc_error, MockNode, SendOutcome};
    use alloy::primitives::{Address, Bytes, U256};

    fn signed_tx() -> SignedTransaction {
        let tx = UnsignedTransaction {
            chain_id: 80002,
            nonce: 3,
            fees: FeeFields::Legacy {
                gas_price: 30_000_000_000,
            },
            gas_limit: 21_000,
            to: Address::repeat_byte(0x55),
            value: U256::from(1u8),
            data: Bytes::new(),
            access_list: Default::default(),
        };
        let signature = SignatureComponents {
            r: U256::from(1u8),
            s: U256::from(2u8),
            y_parity: false,
        };
        encode_signed(&tx, signature).unwrap()
    }

    fn tracker(node: Arc<MockNode>) -> SubmissionTracker {
        SubmissionTracker::new(node, Duration::from_millis(5))
            .with_retry_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_submit_returns_envelope_hash() {
        let node = Arc::new(MockNode::new());
        let signed = signed_tx();

        let hash = tracker(node.clone()).submit(&signed).await.unwrap();
        assert_eq!(hash, signed.hash);
        assert_eq!(node.sent(), vec![signed.raw.clone()]);
    }

    #[tokio::test]
    async fn test_transport_failures_resend_identical_bytes() {
        let node = Arc::new(MockNode::new());
        node.script_send(SendOutcome::Reject(NodeError::Unavailable("reset".into())));
        node.script_send(SendOutcome::Reject(NodeError::Timeout("eth_sendRawTransaction")));
        let signed = signed_tx();

        tracker(node.clone()).submit(&signed).await.unwrap();
        assert_eq!(node.send_attempts(), vec![signed.raw.clone(); 3]);
    }

    #[tokio::test]
    async fn test_transport_failures_are_bounded() {
        let node = Arc::new(MockNode::new());
        for _ in 0..BROADCAST_ATTEMPTS {
            node.script_send(SendOutcome::Reject(NodeError::Unavailable("reset".into())));
        }

        let err = tracker(node.clone()).submit(&signed_tx()).await.unwrap_err();
        assert!(matches!(err, SubmitError::Unavailable(_)));
        assert_eq!(node.send_attempts().len(), BROADCAST_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn test_already_known_counts_as_accepted() {
        let node = Arc::new(MockNode::new());
        node.script_send(SendOutcome::Reject(rpc_error("already known")));
        let signed = signed_tx();

        assert_eq!(tracker(node).submit(&signed).await.unwrap(), signed.hash);
    }

    #[tokio::test]
    async fn test_classifies_rejections() {
        let cases = [
            ("nonce too low", "nonce_too_low"),
            ("replacement transaction underpriced", "occupied"),
            ("insufficient funds for gas * price + value", "rejected"),
        ];
        for (message, expected) in cases {
            let node = Arc::new(MockNode::new());
            node.script_send(SendOutcome::Reject(rpc_error(message)));
            let err = tracker(node).submit(&signed_tx()).await.unwrap_err();
            let actual = match err {
                SubmitError::NonceTooLow(_) => "nonce_too_low",
                SubmitError::NonceOccupied(_) => "occupied",
                SubmitError::Rejected(_) => "rejected",
                SubmitError::Unavailable(_) => "unavailable",
            };
            assert_eq!(actual, expected, "{message}");
        }
    }

    #[tokio::test]
    async fn test_lost_response_then_nonce_too_low_is_success() {
        let node = Arc::new(MockNode::new());
        node.set_receipt_status(Some(true));
        node.script_send(SendOutcome::AcceptThenFail(NodeError::Unavailable("reset".into())));
        node.script_send(SendOutcome::Reject(rpc_error("nonce too low")));
        let signed = signed_tx();

        assert_eq!(tracker(node).submit(&signed).await.unwrap(), signed.hash);
    }

    #[tokio::test]
    async fn test_lost_response_then_nonce_too_low_without_receipt_is_tracked() {
        let node = Arc::new(MockNode::new());
        node.set_receipt_status(None);
        node.script_send(SendOutcome::AcceptThenFail(NodeError::Unavailable("reset".into())));
        node.script_send(SendOutcome::Reject(rpc_error("nonce too low")));
        let signed = signed_tx();

        assert_eq!(tracker(node.clone()).submit(&signed).await.unwrap(), signed.hash);
        assert_eq!(node.sent(), vec![signed.raw.clone()]);
    }

    #[tokio::test]
    async fn test_await_confirmation_polls_until_receipt() {
        let node = Arc::new(MockNode::new());
        node.set_receipt_status(Some(false));
        node.set_receipt_delay(3);
        let tracker = tracker(node.clone());
        let hash = tracker.submit(&signed_tx()).await.unwrap();

        let receipt = tracker
            .await_confirmation(hash, Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!receipt.success);
        assert_eq!(receipt.tx_hash, hash);
    }

    #[tokio::test]
    async fn test_await_confirmation_times_out() {
        let node = Arc::new(MockNode::new());
        node.set_receipt_status(None);
        let tracker = tracker(node);
        let hash = tracker.submit(&signed_tx()).await.unwrap();

        let err = tracker
            .await_confirmation(hash, Duration::from_millis(30), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::Timeout { tx_hash, .. } if tx_hash == hash));
    }

    #[tokio::test]
    async fn test_await_confirmation_can_be_cancelled() {
        let node = Arc::new(MockNode::new());
        node.set_receipt_status(None);
        let tracker = tracker(node);
        let hash = tracker.submit(&signed_tx()).await.unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = tracker
            .await_confirmation(hash, Duration::from_secs(30), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, TrackerError::Cancelled { tx_hash: hash });
    }
}
