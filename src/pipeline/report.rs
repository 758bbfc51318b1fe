//! What a pipeline run tells the operator

use crate::chain::InclusionStatus;
use crate::contract::NamedValue;
use crate::tx::FeeParameters;

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Broadcast half of a run; absent on dry runs
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReport {
    pub nonce: u64,
    pub tx_hash: H256,
    pub submitted_at: DateTime<Utc>,
    pub status: InclusionStatus,
}

/// Outcome of one contract call
#[derive(Debug, Clone, Serialize)]
pub struct CallReport {
    pub run_id: Uuid,
    pub network: String,
    pub contract: Address,
    pub sender: Address,
    pub method: String,
    pub payload: String,
    pub gas_estimate: U256,
    pub fee: FeeParameters,
    /// Contract owner, when the call names an owner accessor
    pub owner: Option<Address>,
    /// Accessor values before the call
    pub before: Option<Vec<NamedValue>>,
    /// Accessor values after inclusion
    pub after: Option<Vec<NamedValue>>,
    /// Why the post-inclusion read failed, if it did
    pub after_error: Option<String>,
    pub submission: Option<SubmissionReport>,
}

impl CallReport {
    pub fn is_dry_run(&self) -> bool {
        self.submission.is_none()
    }

    /// Whether the accessor reads differ before and after
    pub fn state_changed(&self) -> Option<bool> {
        match (&self.before, &self.after) {
            (Some(before), Some(after)) => Some(before != after),
            _ => None,
        }
    }
}

fn join_values(values: &[NamedValue]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for CallReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "network:   {}", self.network)?;
        writeln!(f, "addr:      {:?}", self.contract)?;
        if let Some(owner) = self.owner {
            writeln!(f, "owner:     {:?}", owner)?;
        }
        writeln!(f, "sender:    {:?}", self.sender)?;
        if let Some(before) = &self.before {
            writeln!(f, "before:    {}", join_values(before))?;
        }
        writeln!(f, "call:      {} {}", self.method, self.payload)?;
        writeln!(
            f,
            "gas:       estimate {}, limit {}",
            self.gas_estimate, self.fee.gas_limit
        )?;
        writeln!(f, "price:     {:?}", self.fee.gas_price)?;

        match &self.submission {
            None => writeln!(f, "dry run:   not signed or sent")?,
            Some(sub) => {
                writeln!(f, "nonce:     {}", sub.nonce)?;
                writeln!(f, "tx:        {:?}", sub.tx_hash)?;
                write!(f, "status:    {}", sub.status.label())?;
                if let Some(receipt) = sub.status.receipt() {
                    write!(
                        f,
                        " (block {}, gas used {})",
                        receipt.block_number.unwrap_or_default(),
                        receipt.gas_used.unwrap_or_default()
                    )?;
                }
                if let InclusionStatus::Unresolved { error, .. } = &sub.status {
                    write!(f, " (node error: {})", error)?;
                }
                writeln!(f)?;
            }
        }

        if let Some(after) = &self.after {
            writeln!(f, "after:     {}", join_values(after))?;
        }
        if let Some(error) = &self.after_error {
            writeln!(f, "after:     read failed: {}", error)?;
        }
        Ok(())
    }
}
