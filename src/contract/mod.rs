//! Contract-side plumbing: where a contract lives, what its interface is, and
//! how calls against it are encoded

pub mod encoder;
pub mod interface;
pub mod reference;

pub use encoder::{CallPayload, NamedValue};
pub use interface::InterfaceLoader;
pub use reference::{AddressBook, ContractRef};
