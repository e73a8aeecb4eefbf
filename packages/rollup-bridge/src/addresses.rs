//! Contract address registry
//!
//! Addresses are authored outside this crate and loaded from a JSON file of
//! `{chainId, contract, region, address}` entries.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{BridgeError, Result};

/// Contract names used in the registry
pub mod names {
    pub const INBOX: &str = "inbox";
    pub const BRIDGE: &str = "bridge";
    pub const OUTBOX: &str = "outbox";
    pub const ROLLUP: &str = "rollup";
    pub const NFT: &str = "nft";
    pub const NFT_GATEWAY: &str = "nftGateway";
    pub const NFT_BRIDGE: &str = "nftBridge";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressEntry {
    pub chain_id: u64,
    pub contract: String,
    pub region: String,
    pub address: Address,
}

#[derive(Debug, Clone, Default)]
pub struct AddressRegistry {
    entries: HashMap<(u64, String, String), Address>,
}

impl AddressRegistry {
    pub fn from_entries(entries: Vec<AddressEntry>) -> Result<Self> {
        let mut map = HashMap::new();
        for entry in entries {
            let key = (entry.chain_id, entry.contract.clone(), entry.region.clone());
            if let Some(existing) = map.insert(key, entry.address) {
                if existing != entry.address {
                    return Err(BridgeError::Config(format!(
                        "conflicting addresses for {} on chain {} ({})",
                        entry.contract, entry.chain_id, entry.region
                    )));
                }
            }
        }
        Ok(Self { entries: map })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let entries: Vec<AddressEntry> = serde_json::from_str(json)
            .map_err(|e| BridgeError::Config(format!("address registry: {}", e)))?;
        Self::from_entries(entries)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("address registry {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    pub fn get(&self, chain_id: u64, contract: &str, region: &str) -> Option<Address> {
        self.entries
            .get(&(chain_id, contract.to_string(), region.to_string()))
            .copied()
    }

    pub fn require(&self, chain_id: u64, contract: &str, region: &str) -> Result<Address> {
        self.get(chain_id, contract, region).ok_or_else(|| {
            BridgeError::Config(format!(
                "no {} address for chain {} in region {}",
                contract, chain_id, region
            ))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Every contract the tracker talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeContracts {
    pub inbox: Address,
    pub bridge: Address,
    pub outbox: Address,
    pub rollup: Address,
    /// Parent-chain NFT collection
    pub parent_nft: Address,
    pub parent_nft_gateway: Address,
    pub child_nft_bridge: Address,
}

impl BridgeContracts {
    pub fn from_registry(
        registry: &AddressRegistry,
        parent_chain_id: u64,
        child_chain_id: u64,
        region: &str,
    ) -> Result<Self> {
        Ok(Self {
            inbox: registry.require(parent_chain_id, names::INBOX, region)?,
            bridge: registry.require(parent_chain_id, names::BRIDGE, region)?,
            outbox: registry.require(parent_chain_id, names::OUTBOX, region)?,
            rollup: registry.require(parent_chain_id, names::ROLLUP, region)?,
            parent_nft: registry.require(parent_chain_id, names::NFT, region)?,
            parent_nft_gateway: registry.require(parent_chain_id, names::NFT_GATEWAY, region)?,
            child_nft_bridge: registry.require(child_chain_id, names::NFT_BRIDGE, region)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_json() -> String {
        let entry = |chain: u64, contract: &str, byte: u8| {
            format!(
                r#"{{"chainId":{},"contract":"{}","region":"mainnet","address":"0x{}"}}"#,
                chain,
                contract,
                format!("{:02x}", byte).repeat(20)
            )
        };
        let entries = [
            entry(1, names::INBOX, 1),
            entry(1, names::BRIDGE, 2),
            entry(1, names::OUTBOX, 3),
            entry(1, names::ROLLUP, 4),
            entry(1, names::NFT, 5),
            entry(1, names::NFT_GATEWAY, 6),
            entry(42161, names::NFT_BRIDGE, 7),
        ];
        format!("[{}]", entries.join(","))
    }

    #[test]
    fn test_lookup_by_chain_contract_region() {
        let registry = AddressRegistry::from_json(&registry_json()).unwrap();
        assert_eq!(registry.len(), 7);
        assert_eq!(
            registry.get(1, names::OUTBOX, "mainnet"),
            Some(Address::repeat_byte(3))
        );
        assert_eq!(registry.get(1, names::OUTBOX, "testnet"), None);
        assert_eq!(registry.get(42161, names::OUTBOX, "mainnet"), None);
    }

    #[test]
    fn test_bridge_contracts_from_registry() {
        let registry = AddressRegistry::from_json(&registry_json()).unwrap();
        let contracts = BridgeContracts::from_registry(&registry, 1, 42161, "mainnet").unwrap();
        assert_eq!(contracts.child_nft_bridge, Address::repeat_byte(7));
        assert_eq!(contracts.parent_nft_gateway, Address::repeat_byte(6));

        let err = BridgeContracts::from_registry(&registry, 1, 42161, "testnet")
            .err()
            .unwrap();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn test_conflicting_entries_rejected() {
        let entries = vec![
            AddressEntry {
                chain_id: 1,
                contract: names::INBOX.into(),
                region: "r".into(),
                address: Address::repeat_byte(1),
            },
            AddressEntry {
                chain_id: 1,
                contract: names::INBOX.into(),
                region: "r".into(),
                address: Address::repeat_byte(2),
            },
        ];
        assert!(AddressRegistry::from_entries(entries).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("addresses.json");
        std::fs::write(&path, registry_json()).unwrap();
        assert_eq!(AddressRegistry::load(&path).unwrap().len(), 7);
        assert!(AddressRegistry::load(dir.path().join("missing.json")).is_err());
    }
}
