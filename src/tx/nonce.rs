//! Nonce sequencing for reliable transaction submission
//!
//! Handles:
//! - Seeding from the node's pending transaction count
//! - Serialized assignment per account so one process never reuses a nonce
//! - Returning a nonce that never reached the network

use crate::chain::NodeClient;
use crate::error::PipelineResult;

use dashmap::DashMap;
use ethers::types::Address;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Per-account nonce state
#[derive(Debug, Default)]
struct AccountNonce {
    /// Next nonce this process would hand out, once seeded
    next: Option<u64>,
}

/// Assigns nonces per sending account.
///
/// Each account has its own lock, so different accounts never wait on each
/// other. State lives only as long as the sequencer.
#[derive(Debug, Default)]
pub struct NonceSequencer {
    accounts: DashMap<Address, Arc<Mutex<AccountNonce>>>,
}

impl NonceSequencer {
    /// Create a new nonce sequencer
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, account: Address) -> Arc<Mutex<AccountNonce>> {
        // Clone the Arc out so the map shard is not held across an await
        self.accounts.entry(account).or_default().clone()
    }

    /// Assign the next nonce for `account`.
    ///
    /// The node's pending count is re-read under the account lock every time,
    /// so transactions sent by other processes are accounted for as well.
    pub async fn next<N: NodeClient + ?Sized>(
        &self,
        node: &N,
        account: Address,
    ) -> PipelineResult<u64> {
        let slot = self.slot(account);
        let mut state = slot.lock().await;

        let pending = node.pending_nonce(account).await?;
        let nonce = match state.next {
            Some(local) if local > pending => {
                debug!(
                    "Node reports pending nonce {} for {:?}, local sequence is at {}",
                    pending, account, local
                );
                local
            }
            _ => pending,
        };
        state.next = Some(nonce + 1);

        debug!("Allocated nonce {} for {:?}", nonce, account);
        Ok(nonce)
    }

    /// Release a nonce whose transaction never reached the network.
    ///
    /// Only the most recently assigned nonce can be handed back; returns
    /// whether it was.
    pub async fn release(&self, account: Address, nonce: u64) -> bool {
        let slot = self.slot(account);
        let mut state = slot.lock().await;

        match state.next {
            Some(next) if next == nonce + 1 => {
                state.next = Some(nonce);
                debug!("Released nonce {} for {:?}", nonce, account);
                true
            }
            _ => {
                warn!(
                    "Cannot release nonce {} for {:?}; a later nonce was already assigned",
                    nonce, account
                );
                false
            }
        }
    }

    /// Next nonce the sequencer would assign without consulting the node
    #[cfg(test)]
    pub async fn peek(&self, account: Address) -> Option<u64> {
        let slot = self.accounts.get(&account)?.clone();
        let state = slot.lock().await;
        state.next
    }
}
