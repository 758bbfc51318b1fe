//! Chain module - node access and inclusion tracking
//!
//! This module provides:
//! - The `NodeClient` seam the pipeline talks through
//! - A JSON-RPC implementation over ethers `Provider<Http>`
//! - Receipt polling with optional confirmation depth

pub mod inclusion;
pub mod provider;

pub use inclusion::{InclusionStatus, InclusionWatcher};
pub use provider::{CallRequest, ChainProvider, GasPrice, NodeClient, Receipt};
