// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Nonce sequencing for the signer address.
//!
//! Nonces are handed out as [`NonceLease`]s. A lease ends in exactly one of:
//!
//! - [`NonceSequencer::commit`]: the node accepted the transaction.
//! - [`NonceSequencer::release`]: aborted before broadcast. The nonce is
//!   rolled back or parked for reuse so no gap is left behind.
//! - [`NonceSequencer::rebase`]: the node said "nonce too low". The lease
//!   moves to a strictly higher nonce.
//! - [`NonceSequencer::forget`]: outcome unknown. Local state is resynced
//!   from the node once nothing else is in flight.
//!
//! Reservations for one address are serialized behind an async mutex. The
//! address map itself is only locked long enough to clone the entry.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use alloy::primitives::Address;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::node::{BlockTag, ChainNode, NodeError};

/// Nonce bookkeeping for one address.
#[derive(Debug, Default)]
struct NonceState {
    /// Last seen `latest` transaction count.
    confirmed: u64,
    /// Next nonce we would issue. `None` until synced from the node.
    next: Option<u64>,
    /// Nonces returned unused, below `next`.
    released: BTreeSet<u64>,
    /// Leased and not yet resolved.
    in_flight: BTreeSet<u64>,
    /// A forgotten lease is waiting for `in_flight` to drain.
    resync_pending: bool,
}

impl NonceState {
    /// Drop parked nonces the chain has already moved past.
    fn prune_released(&mut self, floor: u64) {
        self.released.retain(|n| *n >= floor);
    }

    fn issue(&mut self, floor: u64) -> u64 {
        self.prune_released(floor);

        let nonce = match self.released.pop_first() {
            Some(reused) => reused,
            None => {
                let nonce = floor.max(self.next.unwrap_or(0));
                self.next = Some(nonce + 1);
                nonce
            }
        };
        self.in_flight.insert(nonce);
        nonce
    }

    /// Drop local state once a forgotten lease has nothing else in flight,
    /// so the next reservation starts from the node's counts again.
    fn settle(&mut self) -> bool {
        if !self.resync_pending || !self.in_flight.is_empty() {
            return false;
        }
        self.next = None;
        self.released.clear();
        self.resync_pending = false;
        true
    }

    fn give_back(&mut self, nonce: u64) {
        if self.next == Some(nonce + 1) {
            self.next = Some(nonce);
            // Collapse parked nonces that are now at the top.
            while let Some(last) = self.released.last().copied() {
                if self.next != Some(last + 1) {
                    break;
                }
                self.released.remove(&last);
                self.next = Some(last);
            }
        } else if self.next.is_some_and(|next| nonce < next) {
            self.released.insert(nonce);
        }
    }
}

/// A reserved nonce. Must be resolved through the sequencer that issued it.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a nonce lease must be committed, released, rebased or forgotten"]
pub struct NonceLease {
    address: Address,
    nonce: u64,
}

impl NonceLease {
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }
}

/// Point-in-time view of nonce state for one address.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct NonceSnapshot {
    pub address: Address,
    pub latest: u64,
    pub pending: u64,
    pub local_next: Option<u64>,
    pub in_flight: Vec<u64>,
}

impl NonceSnapshot {
    /// Whether transactions from this address sit in the mempool.
    pub fn has_pending(&self) -> bool {
        self.pending > self.latest
    }
}

/// Per-address nonce sequencer.
pub struct NonceSequencer {
    node: Arc<dyn ChainNode>,
    states: std::sync::Mutex<HashMap<Address, Arc<Mutex<NonceState>>>>,
}

impl NonceSequencer {
    pub fn new(node: Arc<dyn ChainNode>) -> Self {
        Self {
            node,
            states: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn state_for(&self, address: Address) -> Arc<Mutex<NonceState>> {
        // Only held to clone the entry, never across an await.
        let mut states = self
            .states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(states.entry(address).or_default())
    }

    async fn chain_counts(&self, address: Address) -> Result<(u64, u64), NodeError> {
        let latest = self
            .node
            .transaction_count(address, BlockTag::Latest)
            .await?;
        let pending = self
            .node
            .transaction_count(address, BlockTag::Pending)
            .await?;
        Ok((latest, pending))
    }

    /// Reserve the next nonce for `address`.
    pub async fn reserve(&self, address: Address) -> Result<NonceLease, NodeError> {
        let state = self.state_for(address);
        let mut state = state.lock().await;

        let (latest, pending) = self.chain_counts(address).await?;
        state.confirmed = latest;
        let nonce = state.issue(latest.max(pending));

        debug!(
            address = %address,
            nonce,
            latest,
            pending,
            in_flight = state.in_flight.len(),
            "Nonce reserved"
        );
        Ok(NonceLease { address, nonce })
    }

    /// Reserve and immediately commit a nonce.
    pub async fn next_nonce(&self, address: Address) -> Result<u64, NodeError> {
        let lease = self.reserve(address).await?;
        let nonce = lease.nonce;
        self.commit(lease).await;
        Ok(nonce)
    }

    /// The node accepted the transaction carrying this nonce.
    pub async fn commit(&self, lease: NonceLease) {
        let state = self.state_for(lease.address);
        let mut state = state.lock().await;
        state.in_flight.remove(&lease.nonce);
        if state.settle() {
            info!(address = %lease.address, "Nonce state resynced after forgotten lease");
        }
        debug!(address = %lease.address, nonce = lease.nonce, "Nonce committed");
    }

    /// Return an unused nonce. Nothing was broadcast with it.
    pub async fn release(&self, lease: NonceLease) {
        let state = self.state_for(lease.address);
        let mut state = state.lock().await;
        state.in_flight.remove(&lease.nonce);
        state.give_back(lease.nonce);
        if state.settle() {
            info!(address = %lease.address, "Nonce state resynced after forgotten lease");
        }
        debug!(
            address = %lease.address,
            nonce = lease.nonce,
            next = ?state.next,
            "Nonce released"
        );
    }

    /// Move a lease past a nonce the node reports as already used.
    ///
    /// The returned lease always carries a strictly higher nonce.
    pub async fn rebase(&self, lease: NonceLease) -> Result<NonceLease, NodeError> {
        let state = self.state_for(lease.address);
        let mut state = state.lock().await;
        state.in_flight.remove(&lease.nonce);

        let (latest, pending) = match self.chain_counts(lease.address).await {
            Ok(counts) => counts,
            Err(e) => {
                // The old nonce is spent either way.
                warn!(address = %lease.address, nonce = lease.nonce, error = %e, "Nonce rebase failed");
                return Err(e);
            }
        };
        state.confirmed = latest;
        state.settle();
        state.prune_released(lease.nonce + 1);

        let floor = latest.max(pending).max(lease.nonce + 1);
        let nonce = state.issue(floor);

        info!(
            address = %lease.address,
            old_nonce = lease.nonce,
            new_nonce = nonce,
            latest,
            pending,
            "Nonce rebased after nonce too low"
        );
        Ok(NonceLease {
            address: lease.address,
            nonce,
        })
    }

    /// The broadcast outcome is unknown. Resync from the node next time.
    pub async fn forget(&self, lease: NonceLease) {
        let state = self.state_for(lease.address);
        let mut state = state.lock().await;
        state.in_flight.remove(&lease.nonce);
        state.resync_pending = true;
        state.settle();
        warn!(
            address = %lease.address,
            nonce = lease.nonce,
            "Nonce outcome unknown, local state will resync"
        );
    }

    /// Current chain and local nonce state for `address`.
    pub async fn snapshot(&self, address: Address) -> Result<NonceSnapshot, NodeError> {
        let state = self.state_for(address);
        let state = state.lock().await;
        let (latest, pending) = self.chain_counts(address).await?;

        Ok(NonceSnapshot {
            address,
            latest,
            pending,
            local_next: state.next,
            in_flight: state.in_flight.iter().copied().collect(),
        })
    }
}
