//! Error types for the pool admin pipeline

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Stage of a single contract call at which an error aborted it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configure,
    Resolve,
    LoadInterface,
    Encode,
    Estimate,
    AssignNonce,
    Sign,
    Broadcast,
    Confirm,
    Verify,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Configure => "configure",
            Stage::Resolve => "resolve",
            Stage::LoadInterface => "load_interface",
            Stage::Encode => "encode",
            Stage::Estimate => "estimate",
            Stage::AssignNonce => "assign_nonce",
            Stage::Sign => "sign",
            Stage::Broadcast => "broadcast",
            Stage::Confirm => "confirm",
            Stage::Verify => "verify",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown contract {identifier} on network {network}")]
    UnknownContract { identifier: String, network: String },

    #[error("Missing interface for contract type {contract_type}: {message}")]
    MissingInterface {
        contract_type: String,
        message: String,
    },

    #[error("Encoding error for {method}: {message}")]
    Encoding { method: String, message: String },

    #[error("Gas estimation error: {0}")]
    Estimation(String),

    #[error("Nonce error for {account}: {message}")]
    Nonce { account: String, message: String },

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Broadcast rejected by node: {0}")]
    BroadcastRejected(String),

    #[error("Broadcast of {tx_hash} failed in transit; the node may have it: {message}")]
    BroadcastUnknown { tx_hash: String, message: String },

    #[error("Transaction {tx_hash} not included after {waited:?}; it may still be mined")]
    PendingTimeout { tx_hash: String, waited: Duration },

    #[error("Outcome of transaction {tx_hash} unknown; it may still be mined: {message}")]
    Unconfirmed { tx_hash: String, message: String },

    #[error("Node error during {stage}: {message}")]
    Node { stage: Stage, message: String },
}

impl PipelineError {
    /// Stage this error aborts
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Config(_) | PipelineError::Wallet(_) => Stage::Configure,
            PipelineError::UnknownContract { .. } => Stage::Resolve,
            PipelineError::MissingInterface { .. } => Stage::LoadInterface,
            PipelineError::Encoding { .. } => Stage::Encode,
            PipelineError::Estimation(_) => Stage::Estimate,
            PipelineError::Nonce { .. } => Stage::AssignNonce,
            PipelineError::Signing(_) => Stage::Sign,
            PipelineError::BroadcastRejected(_) | PipelineError::BroadcastUnknown { .. } => {
                Stage::Broadcast
            }
            PipelineError::PendingTimeout { .. } | PipelineError::Unconfirmed { .. } => {
                Stage::Confirm
            }
            PipelineError::Node { stage, .. } => *stage,
        }
    }

    /// Whether the transaction may have reached the chain.
    ///
    /// True once the signed envelope may be in the node's pool; every other
    /// error failed before the node accepted anything.
    pub fn reached_network(&self) -> bool {
        matches!(
            self,
            PipelineError::BroadcastUnknown { .. }
                | PipelineError::PendingTimeout { .. }
                | PipelineError::Unconfirmed { .. }
        )
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
