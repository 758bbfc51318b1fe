//! Waiting for a broadcast transaction to be mined
//!
//! Inclusion has no hard deadline on any chain, so running out of time is an
//! outcome (`TimedOut`) rather than an error: the transaction may still land.
//! The same holds when the node stops answering mid-wait (`Unresolved`).

use super::provider::{NodeClient, Receipt};
use crate::error::PipelineResult;

use ethers::types::H256;
use serde::Serialize;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Terminal observation of a broadcast transaction
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InclusionStatus {
    /// Mined and executed successfully
    Included(Receipt),
    /// Mined but reverted
    Rejected(Receipt),
    /// Not observed (with enough confirmations) before the deadline
    TimedOut {
        tx_hash: H256,
        #[serde(with = "duration_secs")]
        waited: Duration,
    },
    /// The node stopped answering before the outcome was observed
    Unresolved {
        tx_hash: H256,
        #[serde(with = "duration_secs")]
        waited: Duration,
        error: String,
    },
}

impl InclusionStatus {
    pub fn receipt(&self) -> Option<&Receipt> {
        match self {
            InclusionStatus::Included(receipt) | InclusionStatus::Rejected(receipt) => {
                Some(receipt)
            }
            InclusionStatus::TimedOut { .. } | InclusionStatus::Unresolved { .. } => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            InclusionStatus::Included(_) => "included",
            InclusionStatus::Rejected(_) => "rejected",
            InclusionStatus::TimedOut { .. } => "timed_out",
            InclusionStatus::Unresolved { .. } => "unresolved",
        }
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}

/// Polls a node for a transaction receipt
pub struct InclusionWatcher<'a, N: NodeClient + ?Sized> {
    node: &'a N,
    poll_interval: Duration,
    /// Required confirmation blocks (1 = the inclusion block itself)
    confirmations: u64,
}

impl<'a, N: NodeClient + ?Sized> InclusionWatcher<'a, N> {
    pub fn new(node: &'a N, poll_interval: Duration, confirmations: u64) -> Self {
        Self {
            node,
            poll_interval,
            confirmations: confirmations.max(1),
        }
    }

    /// Poll until the transaction is mined with enough confirmations or `timeout` elapses.
    ///
    /// Never fails: the transaction is already broadcast, so a node that stops
    /// answering yields `Unresolved` carrying the hash and the last error.
    pub async fn await_inclusion(&self, tx_hash: H256, timeout: Duration) -> InclusionStatus {
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            let last_error = match self.poll(tx_hash).await {
                Ok(Some(receipt)) => return self.classify(receipt, started.elapsed()),
                Ok(None) => None,
                Err(e) => {
                    warn!("Polling for {:?} failed: {}", tx_hash, e);
                    Some(e.to_string())
                }
            };

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "Transaction {:?} not included after {:?}; leaving it to the node",
                    tx_hash, timeout
                );
                let waited = started.elapsed();
                return match last_error {
                    Some(error) => InclusionStatus::Unresolved {
                        tx_hash,
                        waited,
                        error,
                    },
                    None => InclusionStatus::TimedOut { tx_hash, waited },
                };
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// One poll: the receipt, once it is buried deep enough
    async fn poll(&self, tx_hash: H256) -> PipelineResult<Option<Receipt>> {
        let receipt = match self.node.transaction_receipt(tx_hash).await? {
            Some(receipt) => receipt,
            None => {
                debug!("Transaction {:?} not yet mined", tx_hash);
                return Ok(None);
            }
        };

        match receipt.block_number {
            Some(block) if self.is_deep_enough(block).await? => Ok(Some(receipt)),
            _ => Ok(None),
        }
    }

    async fn is_deep_enough(&self, block: u64) -> PipelineResult<bool> {
        if self.confirmations == 1 {
            return Ok(true);
        }

        let current = self.node.block_number().await?;
        let confirmations = current.saturating_sub(block) + 1;
        debug!(
            "Inclusion block {} has {} / {} confirmations",
            block, confirmations, self.confirmations
        );
        Ok(confirmations >= self.confirmations)
    }

    fn classify(&self, receipt: Receipt, waited: Duration) -> InclusionStatus {
        if receipt.succeeded {
            info!(
                "Transaction {:?} included in block {:?} after {:?}",
                receipt.tx_hash, receipt.block_number, waited
            );
            InclusionStatus::Included(receipt)
        } else {
            warn!(
                "Transaction {:?} reverted in block {:?}",
                receipt.tx_hash, receipt.block_number
            );
            InclusionStatus::Rejected(receipt)
        }
    }
}
