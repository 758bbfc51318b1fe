//! Contract references and per-network address tables

use crate::error::{PipelineError, PipelineResult};

use ethers::types::Address;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// A contract named either by a literal address or by a symbol in the address table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractRef {
    Literal(Address),
    Symbolic(String),
}

impl FromStr for ContractRef {
    type Err = PipelineError;

    fn from_str(identifier: &str) -> Result<Self, Self::Err> {
        let has_prefix = identifier
            .get(..2)
            .map(|p| p.eq_ignore_ascii_case("0x"))
            .unwrap_or(false);

        if !has_prefix {
            return Ok(ContractRef::Symbolic(identifier.to_string()));
        }

        let bytes = hex::decode(&identifier[2..]).map_err(|e| {
            PipelineError::Config(format!("Malformed address literal {}: {}", identifier, e))
        })?;
        if bytes.len() != Address::len_bytes() {
            return Err(PipelineError::Config(format!(
                "Address literal {} is {} bytes, expected 20",
                identifier,
                bytes.len()
            )));
        }

        Ok(ContractRef::Literal(Address::from_slice(&bytes)))
    }
}

impl fmt::Display for ContractRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractRef::Literal(address) => write!(f, "{:?}", address),
            ContractRef::Symbolic(name) => f.write_str(name),
        }
    }
}

/// Static mapping of network -> symbol -> address
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    networks: HashMap<String, HashMap<String, Address>>,
}

impl AddressBook {
    /// Build from raw tables, rejecting malformed addresses
    pub fn from_tables(
        tables: HashMap<String, HashMap<String, String>>,
    ) -> PipelineResult<Self> {
        let mut networks = HashMap::with_capacity(tables.len());

        for (network, entries) in tables {
            let mut resolved = HashMap::with_capacity(entries.len());
            for (symbol, raw) in entries {
                let address = raw.parse::<Address>().map_err(|e| {
                    PipelineError::Config(format!(
                        "Malformed address for {} on {}: {}",
                        symbol, network, e
                    ))
                })?;
                resolved.insert(symbol, address);
            }
            networks.insert(network, resolved);
        }

        Ok(Self { networks })
    }

    /// Resolve a reference against a network's table. Literals bypass the table.
    pub fn resolve(&self, reference: &ContractRef, network: &str) -> PipelineResult<Address> {
        match reference {
            ContractRef::Literal(address) => Ok(*address),
            ContractRef::Symbolic(name) => self
                .networks
                .get(network)
                .and_then(|table| table.get(name))
                .copied()
                .ok_or_else(|| PipelineError::UnknownContract {
                    identifier: name.clone(),
                    network: network.to_string(),
                }),
        }
    }

    /// Parse an operator-supplied identifier and resolve it
    pub fn resolve_identifier(&self, identifier: &str, network: &str) -> PipelineResult<Address> {
        let reference: ContractRef = identifier.parse()?;
        self.resolve(&reference, network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USDC: &str = "0xd3B76498DdB2773809A01de45dD42AfDF15B3d5C";

    fn book() -> AddressBook {
        let mut test = HashMap::new();
        test.insert("USDC".to_string(), USDC.to_string());
        let mut tables = HashMap::new();
        tables.insert("test".to_string(), test);
        tables.insert("rinkeby".to_string(), HashMap::new());
        AddressBook::from_tables(tables).unwrap()
    }

    #[test]
    fn test_resolve_symbol() {
        let address = book().resolve_identifier("USDC", "test").unwrap();
        assert_eq!(address, USDC.parse::<Address>().unwrap());
    }

    #[test]
    fn test_literal_bypasses_table() {
        let literal = "0x895d1C6dc05EC9F29440a4A8A2A6E1E087827411";
        let expected: Address = literal.parse().unwrap();
        // Same result whatever the network table holds, or if the network is unknown
        for network in ["test", "rinkeby", "nowhere"] {
            assert_eq!(book().resolve_identifier(literal, network).unwrap(), expected);
        }
        // Uppercase prefix is still a literal
        let upper = format!("0X{}", &literal[2..]);
        assert_eq!(book().resolve_identifier(&upper, "test").unwrap(), expected);
    }

    #[test]
    fn test_unknown_symbol_fails() {
        let err = book().resolve_identifier("USDT", "test").unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UnknownContract { ref identifier, ref network }
                if identifier == "USDT" && network == "test"
        ));

        // Known on one network, absent on another
        let err = book().resolve_identifier("USDC", "rinkeby").unwrap_err();
        assert!(matches!(err, PipelineError::UnknownContract { .. }));
    }

    #[test]
    fn test_malformed_literal() {
        assert!("0xd3B7".parse::<ContractRef>().is_err());
        assert!("0xzz".parse::<ContractRef>().is_err());
        assert_eq!(
            "miningUSDCvUSDT".parse::<ContractRef>().unwrap(),
            ContractRef::Symbolic("miningUSDCvUSDT".to_string())
        );
    }
}
