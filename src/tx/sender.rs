//! Broadcasting signed envelopes and waiting for their inclusion

use super::signer::SignedEnvelope;
use crate::chain::{InclusionStatus, InclusionWatcher, NodeClient};
use crate::config::PipelineConfig;
use crate::error::PipelineResult;

use chrono::{DateTime, Utc};
use ethers::types::H256;
use std::time::Duration;
use tracing::{info, warn};

/// A transaction the node has accepted into its pool
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub tx_hash: H256,
    pub envelope: SignedEnvelope,
    pub submitted_at: DateTime<Utc>,
}

/// Sends envelopes exactly once and observes their outcome
pub struct Submitter<'a, N: NodeClient + ?Sized> {
    node: &'a N,
    poll_interval: Duration,
    confirmations: u64,
}

impl<'a, N: NodeClient + ?Sized> Submitter<'a, N> {
    pub fn new(node: &'a N, config: &PipelineConfig) -> Self {
        Self {
            node,
            poll_interval: config.poll_interval(),
            confirmations: config.confirmations,
        }
    }

    /// Broadcast a signed envelope. The envelope is consumed; resending it is
    /// a separate, deliberate operation.
    pub async fn broadcast(&self, envelope: SignedEnvelope) -> PipelineResult<Broadcast> {
        let tx_hash = self.node.send_raw_transaction(envelope.raw.clone()).await?;

        if tx_hash != envelope.hash {
            warn!(
                "Node reported hash {:?} for envelope {:?}",
                tx_hash, envelope.hash
            );
        }
        info!(
            "Transaction sent: {:?} (nonce {}, gas limit {})",
            tx_hash, envelope.nonce, envelope.fee.gas_limit
        );

        Ok(Broadcast {
            tx_hash,
            envelope,
            submitted_at: Utc::now(),
        })
    }

    /// Poll for inclusion. Running out of time yields `TimedOut` and a node
    /// that stops answering yields `Unresolved`; neither is an error.
    pub async fn await_inclusion(&self, broadcast: &Broadcast, timeout: Duration) -> InclusionStatus {
        InclusionWatcher::new(self.node, self.poll_interval, self.confirmations)
            .await_inclusion(broadcast.tx_hash, timeout)
            .await
    }
}
