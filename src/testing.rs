//! Test fixtures: a mining pool interface and an in-memory node

use crate::chain::{CallRequest, NodeClient, Receipt};
use crate::error::{PipelineError, PipelineResult, Stage};

use async_trait::async_trait;
use ethers::abi::{Abi, Token};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use ethers::utils::rlp::Rlp;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Well-known development key (Hardhat/Anvil account 0)
pub const TEST_PRIVATE_KEY: &str =
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

pub const TEST_ACCOUNT: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

/// Subset of the mining pool interface the operator touches
pub const MINING_ABI: &str = r#"[
  {"type":"function","name":"owner","inputs":[],"outputs":[{"name":"","type":"address"}],"stateMutability":"view"},
  {"type":"function","name":"rewardInfos","inputs":[{"name":"","type":"uint256"}],"outputs":[
    {"name":"rewardToken","type":"address"},
    {"name":"provider","type":"address"},
    {"name":"accRewardPerShare","type":"uint256"},
    {"name":"rewardPerBlock","type":"uint256"}
  ],"stateMutability":"view"},
  {"type":"function","name":"modifyRewardPerBlock","inputs":[
    {"name":"rewardIdx","type":"uint256"},
    {"name":"_rewardPerBlock","type":"uint256"}
  ],"outputs":[],"stateMutability":"nonpayable"}
]"#;

pub fn mining_abi() -> Abi {
    serde_json::from_str(MINING_ABI).unwrap()
}

struct ChainState {
    /// Next nonce the chain will mine
    confirmed_nonce: u64,
    /// Next nonce including the pool
    pending_nonce: u64,
    mining: bool,
    revert_reason: Option<String>,
    owner: Address,
    reward_per_block: U256,
    block: u64,
    receipts: HashMap<H256, Receipt>,
    broadcasts: usize,
    gas_estimate: U256,
    /// Accept broadcasts but fail the response in transit
    lose_broadcast_responses: bool,
    failing_receipts: bool,
}

/// In-memory node hosting a single mining pool contract
pub struct FakeNode {
    abi: Abi,
    state: Mutex<ChainState>,
    gate: Mutex<Option<(Address, Arc<Notify>)>>,
}

impl FakeNode {
    pub fn with_pending_nonce(nonce: u64) -> Self {
        Self {
            abi: mining_abi(),
            state: Mutex::new(ChainState {
                confirmed_nonce: nonce,
                pending_nonce: nonce,
                mining: true,
                revert_reason: None,
                owner: TEST_ACCOUNT.parse().unwrap(),
                reward_per_block: U256::from(1_000u64),
                block: 100,
                receipts: HashMap::new(),
                broadcasts: 0,
                gas_estimate: U256::from(45_000u64),
                lose_broadcast_responses: false,
                failing_receipts: false,
            }),
            gate: Mutex::new(None),
        }
    }

    pub fn pool_address() -> Address {
        "0x895d1C6dc05EC9F29440a4A8A2A6E1E087827411".parse().unwrap()
    }

    pub fn set_pending_nonce(&self, nonce: u64) {
        self.state.lock().unwrap().pending_nonce = nonce;
    }

    /// Pretend transactions from elsewhere were mined up to `nonce`
    pub fn set_confirmed_nonce(&self, nonce: u64) {
        self.state.lock().unwrap().confirmed_nonce = nonce;
    }

    /// Keep accepting broadcasts but drop every response to them
    pub fn lose_broadcast_responses(&self) {
        self.state.lock().unwrap().lose_broadcast_responses = true;
    }

    /// Fail every receipt query as if the connection dropped
    pub fn fail_receipts(&self) {
        self.state.lock().unwrap().failing_receipts = true;
    }

    pub fn set_gas_estimate(&self, estimate: U256) {
        self.state.lock().unwrap().gas_estimate = estimate;
    }

    /// Stop mining broadcasts; they stay pending forever
    pub fn set_mining(&self, mining: bool) {
        self.state.lock().unwrap().mining = mining;
    }

    /// Make every simulation revert with `reason`
    pub fn set_revert(&self, reason: &str) {
        self.state.lock().unwrap().revert_reason = Some(reason.to_string());
    }

    pub fn set_owner(&self, owner: Address) {
        self.state.lock().unwrap().owner = owner;
    }

    pub fn reward_per_block(&self) -> U256 {
        self.state.lock().unwrap().reward_per_block
    }

    pub fn broadcast_count(&self) -> usize {
        self.state.lock().unwrap().broadcasts
    }

    /// Hold nonce reads for `account` until the returned handle is notified
    pub fn gate_account(&self, account: Address) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some((account, notify.clone()));
        notify
    }

    fn selector(&self, name: &str) -> [u8; 4] {
        self.abi.function(name).unwrap().short_signature()
    }
}

#[async_trait]
impl NodeClient for FakeNode {
    async fn pending_nonce(&self, account: Address) -> PipelineResult<u64> {
        let gate = self
            .gate
            .lock()
            .unwrap()
            .as_ref()
            .filter(|(gated, _)| *gated == account)
            .map(|(_, notify)| notify.clone());
        if let Some(notify) = gate {
            notify.notified().await;
        }
        Ok(self.state.lock().unwrap().pending_nonce)
    }

    async fn estimate_gas(&self, _request: &CallRequest) -> PipelineResult<U256> {
        let state = self.state.lock().unwrap();
        match &state.revert_reason {
            Some(reason) => Err(PipelineError::Estimation(format!(
                "execution reverted: {}",
                reason
            ))),
            None => Ok(state.gas_estimate),
        }
    }

    async fn call(&self, request: &CallRequest) -> PipelineResult<Bytes> {
        let state = self.state.lock().unwrap();
        let selector = request.data.get(..4).unwrap_or_default();

        let tokens = if selector == self.selector("owner") {
            vec![Token::Address(state.owner)]
        } else if selector == self.selector("rewardInfos") {
            vec![
                Token::Address(Address::repeat_byte(0x0a)),
                Token::Address(state.owner),
                Token::Uint(U256::zero()),
                Token::Uint(state.reward_per_block),
            ]
        } else {
            return Err(PipelineError::Node {
                stage: Stage::Verify,
                message: "execution reverted".to_string(),
            });
        };

        Ok(Bytes::from(ethers::abi::encode(&tokens)))
    }

    async fn gas_price(&self) -> PipelineResult<U256> {
        Ok(U256::from(1_000_000_000u64))
    }

    async fn base_fee(&self) -> PipelineResult<Option<U256>> {
        Ok(Some(U256::from(1_000_000_000u64)))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> PipelineResult<H256> {
        let (tx, _) = TypedTransaction::decode_signed(&Rlp::new(&raw))
            .map_err(|e| PipelineError::BroadcastRejected(format!("malformed envelope: {}", e)))?;
        let nonce = tx.nonce().map(|n| n.as_u64()).unwrap_or_default();
        let data = tx.data().cloned().unwrap_or_default();

        let mut state = self.state.lock().unwrap();
        if nonce < state.confirmed_nonce {
            return Err(PipelineError::BroadcastRejected("nonce too low".to_string()));
        }

        let tx_hash = H256::from(keccak256(&raw));
        state.broadcasts += 1;
        state.pending_nonce = state.pending_nonce.max(nonce + 1);
        if !state.mining {
            return lost_or(&state, tx_hash);
        }

        if data.get(..4) == Some(&self.selector("modifyRewardPerBlock")[..]) {
            let args = self
                .abi
                .function("modifyRewardPerBlock")
                .unwrap()
                .decode_input(&data[4..])
                .unwrap();
            state.reward_per_block = args[1].clone().into_uint().unwrap();
        }

        state.confirmed_nonce = nonce + 1;
        state.block += 1;
        let receipt = Receipt {
            tx_hash,
            block_number: Some(state.block),
            gas_used: Some(U256::from(41_000)),
            succeeded: true,
            log_count: 1,
        };
        state.receipts.insert(tx_hash, receipt);
        lost_or(&state, tx_hash)
    }

    async fn transaction_receipt(&self, tx_hash: H256) -> PipelineResult<Option<Receipt>> {
        let state = self.state.lock().unwrap();
        if state.failing_receipts {
            return Err(PipelineError::Node {
                stage: Stage::Confirm,
                message: "connection reset".to_string(),
            });
        }
        Ok(state.receipts.get(&tx_hash).cloned())
    }

    async fn block_number(&self) -> PipelineResult<u64> {
        Ok(self.state.lock().unwrap().block)
    }
}

fn lost_or(state: &ChainState, tx_hash: H256) -> PipelineResult<H256> {
    if state.lose_broadcast_responses {
        Err(PipelineError::BroadcastUnknown {
            tx_hash: format!("{:?}", tx_hash),
            message: "request timed out".to_string(),
        })
    } else {
        Ok(tx_hash)
    }
}
