//! Node access: the `NodeClient` seam and its JSON-RPC implementation

use crate::config::NetworkConfig;
use crate::error::{PipelineError, PipelineResult, Stage};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, JsonRpcClient, Provider, ProviderError, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::utils::keccak256;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Read-only call or simulation request
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
}

impl CallRequest {
    fn to_typed(&self) -> TypedTransaction {
        let mut tx = TransactionRequest::new().to(self.to).data(self.data.clone());
        if let Some(from) = self.from {
            tx = tx.from(from);
        }
        TypedTransaction::Legacy(tx)
    }
}

/// Node-reported outcome of a mined transaction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receipt {
    pub tx_hash: H256,
    /// None while the node knows the transaction but has not mined it
    pub block_number: Option<u64>,
    pub gas_used: Option<U256>,
    pub succeeded: bool,
    pub log_count: usize,
}

impl From<TransactionReceipt> for Receipt {
    fn from(receipt: TransactionReceipt) -> Self {
        Self {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.map(|b| b.as_u64()),
            gas_used: receipt.gas_used,
            // Pre-byzantium receipts carry no status
            succeeded: receipt.status != Some(U64::zero()),
            log_count: receipt.logs.len(),
        }
    }
}

/// Everything the pipeline asks of a node.
///
/// All calls are single requests; nothing here retries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Transaction count including the node's pending pool
    async fn pending_nonce(&self, account: Address) -> PipelineResult<u64>;

    /// Simulate a call and return its gas use; fails if the call would revert
    async fn estimate_gas(&self, request: &CallRequest) -> PipelineResult<U256>;

    /// Execute a read-only call against latest state
    async fn call(&self, request: &CallRequest) -> PipelineResult<Bytes>;

    /// Legacy gas price suggested by the node
    async fn gas_price(&self) -> PipelineResult<U256>;

    /// Base fee of the latest block, if the network has one
    async fn base_fee(&self) -> PipelineResult<Option<U256>>;

    /// Submit a signed raw transaction
    async fn send_raw_transaction(&self, raw: Bytes) -> PipelineResult<H256>;

    async fn transaction_receipt(&self, tx_hash: H256) -> PipelineResult<Option<Receipt>>;

    async fn block_number(&self) -> PipelineResult<u64>;
}

/// JSON-RPC node for one network
pub struct ChainProvider<P = Http> {
    /// Network name
    network: String,
    /// Chain ID
    chain_id: u64,
    provider: Provider<P>,
}

impl ChainProvider<Http> {
    /// Create a new chain provider
    pub fn new(network: &str, config: &NetworkConfig) -> PipelineResult<Self> {
        let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
            .map_err(|e| {
                PipelineError::Config(format!("Invalid RPC URL for network {}: {}", network, e))
            })?
            .interval(Duration::from_millis(100));

        debug!("Added HTTP provider for network {}: {}", network, config.rpc_url);
        Ok(Self::with_provider(network, config.chain_id, provider))
    }
}

impl<P: JsonRpcClient> ChainProvider<P> {
    pub fn with_provider(network: &str, chain_id: u64, provider: Provider<P>) -> Self {
        Self {
            network: network.to_string(),
            chain_id,
            provider,
        }
    }

    /// Get chain ID
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    fn node_error(&self, stage: Stage, e: impl std::fmt::Display) -> PipelineError {
        PipelineError::Node {
            stage,
            message: format!("network {}: {}", self.network, e),
        }
    }
}

#[async_trait]
impl<P: JsonRpcClient + 'static> NodeClient for ChainProvider<P> {
    async fn pending_nonce(&self, account: Address) -> PipelineResult<u64> {
        let nonce = self
            .provider
            .get_transaction_count(account, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| PipelineError::Nonce {
                account: format!("{:?}", account),
                message: e.to_string(),
            })?;

        Ok(nonce.as_u64())
    }

    async fn estimate_gas(&self, request: &CallRequest) -> PipelineResult<U256> {
        self.provider
            .estimate_gas(&request.to_typed(), None)
            .await
            .map_err(|e| PipelineError::Estimation(e.to_string()))
    }

    async fn call(&self, request: &CallRequest) -> PipelineResult<Bytes> {
        self.provider
            .call(&request.to_typed(), None)
            .await
            .map_err(|e| self.node_error(Stage::Verify, e))
    }

    async fn gas_price(&self) -> PipelineResult<U256> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| PipelineError::Estimation(e.to_string()))
    }

    async fn base_fee(&self) -> PipelineResult<Option<U256>> {
        let block = self
            .provider
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| PipelineError::Estimation(e.to_string()))?
            .ok_or_else(|| PipelineError::Estimation("No latest block".to_string()))?;

        Ok(block.base_fee_per_gas)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> PipelineResult<H256> {
        let tx_hash = H256::from(keccak256(&raw));
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| broadcast_error(tx_hash, e))?;

        Ok(pending.tx_hash())
    }

    async fn transaction_receipt(&self, tx_hash: H256) -> PipelineResult<Option<Receipt>> {
        self.provider
            .get_transaction_receipt(tx_hash)
            .await
            .map(|receipt| receipt.map(Receipt::from))
            .map_err(|e| self.node_error(Stage::Confirm, e))
    }

    async fn block_number(&self) -> PipelineResult<u64> {
        self.provider
            .get_block_number()
            .await
            .map(|b| b.as_u64())
            .map_err(|e| self.node_error(Stage::Confirm, e))
    }
}

/// Only a JSON-RPC error response proves the node refused the envelope. A
/// transport failure may have happened after the node received it.
fn broadcast_error(tx_hash: H256, e: ProviderError) -> PipelineError {
    if RpcError::as_error_response(&e).is_some() {
        PipelineError::BroadcastRejected(e.to_string())
    } else {
        PipelineError::BroadcastUnknown {
            tx_hash: format!("{:?}", tx_hash),
            message: e.to_string(),
        }
    }
}

/// Gas price types
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}
