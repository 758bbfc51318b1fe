//! Transaction construction: fees, nonces, signing and submission

mod gas;
mod nonce;
mod sender;
mod signer;

pub use gas::{FeeParameters, FeePolicy, GasEstimator};
pub use nonce::NonceSequencer;
pub use sender::Submitter;
pub use signer::{sign, SigningKey, UnsignedEnvelope};
