//! The contract call pipeline
//!
//! One call walks `Resolved -> Encoded -> Estimated -> NonceAssigned -> Signed
//! -> Broadcast -> {Included | Rejected | TimedOut | Unresolved}`. Nothing is
//! retried: a failure at any stage aborts the call and the error names its
//! stage. Once the node has the envelope the run always returns a report.

mod report;

pub use report::{CallReport, SubmissionReport};

use crate::chain::{CallRequest, ChainProvider, InclusionStatus, NodeClient};
use crate::config::{PipelineConfig, Settings};
use crate::contract::{encoder, AddressBook, ContractRef, InterfaceLoader, NamedValue};
use crate::error::{PipelineError, PipelineResult, Stage};
use crate::metrics;
use crate::tx::{
    sign, FeeParameters, FeePolicy, GasEstimator, NonceSequencer, SigningKey, Submitter,
    UnsignedEnvelope,
};

use ethers::abi::{Abi, Token};
use ethers::types::Address;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Read-only method used to observe contract state around a call
#[derive(Debug, Clone)]
pub struct Accessor {
    pub method: String,
    pub args: Vec<Token>,
}

/// A state-changing call to issue
#[derive(Debug, Clone)]
pub struct ContractCall {
    pub contract: ContractRef,
    pub contract_type: String,
    pub method: String,
    pub args: Vec<Token>,
    /// Read before the call and again after inclusion
    pub accessor: Option<Accessor>,
    /// Zero-argument method returning the address allowed to make the call
    pub owner_accessor: Option<String>,
}

/// Pipeline bound to one network
pub struct Pipeline<N: NodeClient> {
    network: String,
    chain_id: u64,
    node: N,
    addresses: AddressBook,
    interfaces: InterfaceLoader,
    estimator: GasEstimator,
    fees: FeePolicy,
    nonces: NonceSequencer,
    config: PipelineConfig,
}

impl Pipeline<ChainProvider> {
    /// Connect to a configured network over JSON-RPC
    pub fn connect(settings: &Settings, network: &str) -> PipelineResult<Self> {
        let network_config = settings
            .network(network)
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        let node = ChainProvider::new(network, network_config)?;
        info!(
            "Using node {} for network {} (chain {})",
            network_config.rpc_url,
            node.network(),
            node.chain_id()
        );
        Self::new(settings, network, node)
    }
}

impl<N: NodeClient> Pipeline<N> {
    pub fn new(settings: &Settings, network: &str, node: N) -> PipelineResult<Self> {
        let network_config = settings
            .network(network)
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        Ok(Self {
            network: network.to_string(),
            chain_id: network_config.chain_id,
            node,
            addresses: AddressBook::from_tables(settings.address_tables())?,
            interfaces: InterfaceLoader::new(&settings.artifacts),
            estimator: GasEstimator::new(settings.pipeline.gas_limit_buffer_percent),
            fees: FeePolicy::from_config(network_config),
            nonces: NonceSequencer::new(),
            config: settings.pipeline.clone(),
        })
    }

    /// Resolve a contract reference on this pipeline's network
    pub fn resolve(&self, contract: &ContractRef) -> PipelineResult<Address> {
        self.addresses.resolve(contract, &self.network)
    }

    /// Call a read-only method and decode its outputs
    pub async fn read(
        &self,
        contract: &ContractRef,
        contract_type: &str,
        method: &str,
        args: &[Token],
    ) -> PipelineResult<Vec<NamedValue>> {
        let address = self.resolve(contract)?;
        let abi = self.interfaces.load(contract_type)?;
        self.read_at(&abi, address, method, args).await
    }

    /// Parse string arguments for `method` of `contract_type`
    pub fn tokenize(
        &self,
        contract_type: &str,
        method: &str,
        raw: &[String],
    ) -> PipelineResult<Vec<Token>> {
        let abi = self.interfaces.load(contract_type)?;
        encoder::tokenize(&abi, method, raw)
    }

    async fn read_at(
        &self,
        abi: &Abi,
        address: Address,
        method: &str,
        args: &[Token],
    ) -> PipelineResult<Vec<NamedValue>> {
        let payload = encoder::encode(abi, method, args)?;
        let data = self
            .node
            .call(&CallRequest {
                from: None,
                to: address,
                data: payload.to_bytes(),
            })
            .await?;
        encoder::decode_output(abi, method, args.len(), &data)
    }

    /// Run a call through every stage. With `dry_run` the call stops after
    /// estimation: no nonce is taken and nothing is signed or sent.
    pub async fn execute(
        &self,
        call: &ContractCall,
        key: &SigningKey,
        dry_run: bool,
    ) -> PipelineResult<CallReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "call",
            %run_id,
            network = %self.network,
            contract = %call.contract,
            method = %call.method
        );

        let result = self.run(run_id, call, key, dry_run).instrument(span).await;
        if let Err(e) = &result {
            metrics::record_stage_failure(&self.network, e.stage());
        }
        result
    }

    async fn run(
        &self,
        run_id: Uuid,
        call: &ContractCall,
        key: &SigningKey,
        dry_run: bool,
    ) -> PipelineResult<CallReport> {
        let sender = key.address();

        let contract = self.resolve(&call.contract)?;
        let abi = self.interfaces.load(&call.contract_type)?;
        info!(stage = %Stage::Resolve, "Resolved {} to {:?}", call.contract, contract);

        let payload = encoder::encode(&abi, &call.method, &call.args)?;
        info!(stage = %Stage::Encode, "Encoded {}", payload);

        let owner = match &call.owner_accessor {
            Some(method) => Some(self.read_owner(&abi, contract, method, sender).await?),
            None => None,
        };
        let before = match &call.accessor {
            Some(accessor) => {
                Some(self.read_at(&abi, contract, &accessor.method, &accessor.args).await?)
            }
            None => None,
        };

        // Estimation and nonce assignment are independent; both finish before signing
        let estimate = async {
            let gas = self
                .estimator
                .estimate(&self.node, &payload, sender, contract)
                .await?;
            let limit = self.estimator.gas_limit(gas)?;
            let price = self.fees.gas_price(&self.node).await?;
            Ok::<_, PipelineError>((gas, limit, price))
        };
        let nonce = async {
            if dry_run {
                Ok(None)
            } else {
                self.nonces.next(&self.node, sender).await.map(Some)
            }
        };
        let (estimate, nonce) = futures::future::join(estimate, nonce).await;

        let (gas_estimate, gas_limit, gas_price) = match (estimate, &nonce) {
            (Ok(estimate), _) => estimate,
            (Err(e), Ok(Some(assigned))) => {
                self.nonces.release(sender, *assigned).await;
                return Err(e);
            }
            (Err(e), _) => return Err(e),
        };
        let nonce = nonce?;

        let fee = FeeParameters {
            gas_limit,
            gas_price,
        };
        info!(
            stage = %Stage::Estimate,
            "Gas estimate {}, limit {}, max cost {} wei",
            gas_estimate,
            fee.gas_limit,
            fee.max_cost()
        );

        let mut report = CallReport {
            run_id,
            network: self.network.clone(),
            contract,
            sender,
            method: call.method.clone(),
            payload: payload.to_string(),
            gas_estimate,
            fee: fee.clone(),
            owner,
            before,
            after: None,
            after_error: None,
            submission: None,
        };

        let nonce = match nonce {
            Some(nonce) => nonce,
            None => {
                info!("Dry run complete; nothing signed or sent");
                return Ok(report);
            }
        };
        info!(stage = %Stage::AssignNonce, "Nonce {}", nonce);

        let unsigned = UnsignedEnvelope {
            chain_id: self.chain_id,
            to: contract,
            data: payload,
            fee,
            nonce,
        };
        let envelope = match sign(unsigned, key) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.nonces.release(sender, nonce).await;
                return Err(e);
            }
        };
        info!(stage = %Stage::Sign, "Signed envelope {:?}", envelope.hash);

        let submitter = Submitter::new(&self.node, &self.config);
        let broadcast = match submitter.broadcast(envelope).await {
            Ok(broadcast) => broadcast,
            Err(e) => {
                // A lost request may still have landed; its nonce stays spent
                if !e.reached_network() {
                    self.nonces.release(sender, nonce).await;
                }
                return Err(e);
            }
        };
        metrics::record_tx_submitted(&self.network);

        let status = submitter
            .await_inclusion(&broadcast, self.config.inclusion_timeout())
            .await;
        let latency = (chrono::Utc::now() - broadcast.submitted_at)
            .to_std()
            .unwrap_or_default();
        metrics::record_inclusion(&self.network, &status, latency.as_secs_f64());

        if let (InclusionStatus::Included(_), Some(accessor)) = (&status, &call.accessor) {
            match self
                .read_at(&abi, contract, &accessor.method, &accessor.args)
                .await
            {
                Ok(after) => report.after = Some(after),
                Err(e) => {
                    warn!(stage = %Stage::Verify, "Verification read failed: {}", e);
                    report.after_error = Some(e.to_string());
                }
            }
        }

        report.submission = Some(SubmissionReport {
            nonce,
            tx_hash: broadcast.tx_hash,
            submitted_at: broadcast.submitted_at,
            status,
        });
        Ok(report)
    }

    async fn read_owner(
        &self,
        abi: &Arc<Abi>,
        contract: Address,
        method: &str,
        sender: Address,
    ) -> PipelineResult<Address> {
        let values = self.read_at(abi, contract, method, &[]).await?;
        let owner = values
            .first()
            .and_then(|v| v.value.clone().into_address())
            .ok_or_else(|| PipelineError::Encoding {
                method: method.to_string(),
                message: "does not return an address".to_string(),
            })?;

        if owner != sender {
            warn!(
                "Signer {:?} is not the contract owner {:?}; estimation will likely revert",
                sender, owner
            );
        }
        Ok(owner)
    }
}
