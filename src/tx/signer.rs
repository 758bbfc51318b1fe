//! Transaction signing
//!
//! Signatures are deterministic (RFC 6979): signing identical fields with the
//! same key always produces the same signature and raw bytes.

use super::gas::FeeParameters;
use crate::chain::GasPrice;
use crate::contract::CallPayload;
use crate::error::{PipelineError, PipelineResult};

use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::utils::keccak256;
use std::fmt;

/// Private key confined to signing. `Debug` shows only the address.
pub struct SigningKey {
    wallet: LocalWallet,
}

impl SigningKey {
    /// Parse a hex private key, with or without `0x`
    pub fn parse(secret: &str) -> PipelineResult<Self> {
        let wallet = secret
            .trim()
            .parse::<LocalWallet>()
            .map_err(|_| PipelineError::Wallet("Invalid private key".to_string()))?;
        Ok(Self { wallet })
    }

    /// Load from the named environment variable
    pub fn from_env(var: &str) -> PipelineResult<Self> {
        let secret = std::env::var(var).map_err(|_| {
            PipelineError::Wallet(format!("No private key configured. Set {}", var))
        })?;
        Self::parse(&secret)
            .map_err(|_| PipelineError::Wallet(format!("Invalid private key in {}", var)))
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Fields of a transaction before signing. Consumed by `sign`.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsignedEnvelope {
    pub chain_id: u64,
    pub to: Address,
    pub data: CallPayload,
    pub fee: FeeParameters,
    pub nonce: u64,
}

/// A signed, network-ready transaction
#[derive(Debug, Clone, PartialEq)]
pub struct SignedEnvelope {
    pub chain_id: u64,
    pub from: Address,
    pub to: Address,
    pub data: CallPayload,
    pub fee: FeeParameters,
    pub nonce: u64,
    pub signature: Signature,
    /// RLP-encoded signed transaction
    pub raw: Bytes,
    pub hash: H256,
}

impl UnsignedEnvelope {
    fn validate(&self) -> PipelineResult<()> {
        let malformed = |message: &str| Err(PipelineError::Signing(message.to_string()));

        if self.chain_id == 0 {
            return malformed("chain id is zero");
        }
        if self.to.is_zero() {
            return malformed("destination is the zero address");
        }
        if self.fee.gas_limit.is_zero() {
            return malformed("gas limit is zero");
        }
        match &self.fee.gas_price {
            GasPrice::Legacy(price) if price.is_zero() => malformed("gas price is zero"),
            GasPrice::Eip1559 {
                max_fee_per_gas, ..
            } if max_fee_per_gas.is_zero() => malformed("max fee per gas is zero"),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } if max_priority_fee_per_gas > max_fee_per_gas => {
                malformed("priority fee exceeds max fee")
            }
            _ => Ok(()),
        }
    }

    /// Build the typed transaction for these fields
    fn to_typed(&self, from: Address) -> TypedTransaction {
        let data = self.data.to_bytes();

        match &self.fee.gas_price {
            GasPrice::Legacy(price) => {
                let tx = TransactionRequest::new()
                    .from(from)
                    .to(self.to)
                    .data(data)
                    .nonce(self.nonce)
                    .gas(self.fee.gas_limit)
                    .gas_price(*price)
                    .chain_id(self.chain_id);
                TypedTransaction::Legacy(tx)
            }
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let tx = Eip1559TransactionRequest::new()
                    .from(from)
                    .to(self.to)
                    .data(data)
                    .nonce(self.nonce)
                    .gas(self.fee.gas_limit)
                    .max_fee_per_gas(*max_fee_per_gas)
                    .max_priority_fee_per_gas(*max_priority_fee_per_gas)
                    .chain_id(self.chain_id);
                TypedTransaction::Eip1559(tx)
            }
        }
    }
}

/// Sign an envelope. Fails only on malformed fields.
pub fn sign(unsigned: UnsignedEnvelope, key: &SigningKey) -> PipelineResult<SignedEnvelope> {
    unsigned.validate()?;

    let from = key.address();
    let tx = unsigned.to_typed(from);
    let wallet = key.wallet.clone().with_chain_id(unsigned.chain_id);

    let signature = wallet
        .sign_transaction_sync(&tx)
        .map_err(|e| PipelineError::Signing(e.to_string()))?;
    let raw = tx.rlp_signed(&signature);
    let hash = H256::from(keccak256(&raw));

    Ok(SignedEnvelope {
        chain_id: unsigned.chain_id,
        from,
        to: unsigned.to,
        data: unsigned.data,
        fee: unsigned.fee,
        nonce: unsigned.nonce,
        signature,
        raw,
        hash,
    })
}
