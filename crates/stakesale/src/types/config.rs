use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, Error};
use crate::types::address::Address;

/// Named contract role within a network entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContractRole {
    Token,
    Crowdsale,
    StakingAsset,
    Staking,
}

impl ContractRole {
    pub fn key(&self) -> &'static str {
        match self {
            ContractRole::Token => "token",
            ContractRole::Crowdsale => "crowdsale",
            ContractRole::StakingAsset => "stakingAsset",
            ContractRole::Staking => "staking",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        match key {
            "token" => Some(ContractRole::Token),
            "crowdsale" => Some(ContractRole::Crowdsale),
            "stakingAsset" => Some(ContractRole::StakingAsset),
            "staking" => Some(ContractRole::Staking),
            _ => None,
        }
    }

    /// Decimals assumed when an entry does not state them.
    pub fn default_decimals(&self) -> u8 {
        match self {
            ContractRole::StakingAsset => 8,
            _ => 18,
        }
    }
}

impl fmt::Display for ContractRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Roles the crowdsale screen binds.
pub const SALE_ROLES: &[ContractRole] = &[ContractRole::Token, ContractRole::Crowdsale];

/// Roles the staking dashboard binds.
pub const STAKE_ROLES: &[ContractRole] = &[ContractRole::StakingAsset, ContractRole::Staking];

/// A deployed contract: its address and the decimals of the asset it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractEntry {
    pub address: Address,
    pub decimals: u8,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    address: String,
    #[serde(default)]
    decimals: Option<u8>,
}

/// Contracts deployed on one network.
#[derive(Debug, Clone, Default)]
pub struct NetworkContracts {
    chain_id: u64,
    entries: HashMap<ContractRole, ContractEntry>,
}

impl NetworkContracts {
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn get(&self, role: ContractRole) -> Result<&ContractEntry, ConfigError> {
        self.entries
            .get(&role)
            .ok_or_else(|| ConfigError::MissingRole {
                network: self.chain_id.to_string(),
                role: role.to_string(),
            })
    }
}

/// Network id -> role -> deployed address. Loaded once and never mutated.
#[derive(Debug, Clone, Default)]
pub struct NetworkConfig {
    networks: BTreeMap<u64, NetworkContracts>,
}

impl NetworkConfig {
    /// Parse the `{ "<chainId>": { "<role>": { "address": "0x..." } } }` format.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: HashMap<String, HashMap<String, RawEntry>> =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let mut networks = BTreeMap::new();
        for (network, roles) in raw {
            let chain_id: u64 = network
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidNetworkId(network.clone()))?;

            let mut entries = HashMap::new();
            for (key, entry) in roles {
                let Some(role) = ContractRole::from_key(&key) else {
                    debug!(network = %network, role = %key, "ignoring unknown contract role");
                    continue;
                };
                let address = entry.address.parse().map_err(|_| ConfigError::InvalidAddress {
                    network: network.clone(),
                    role: key.clone(),
                    address: entry.address.clone(),
                })?;
                entries.insert(
                    role,
                    ContractEntry {
                        address,
                        decimals: entry.decimals.unwrap_or_else(|| role.default_decimals()),
                    },
                );
            }
            networks.insert(chain_id, NetworkContracts { chain_id, entries });
        }

        Ok(Self { networks })
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    /// Fail at startup if any configured network lacks one of `roles`.
    pub fn require_roles(&self, roles: &[ContractRole]) -> Result<(), ConfigError> {
        for contracts in self.networks.values() {
            for role in roles {
                contracts.get(*role)?;
            }
        }
        Ok(())
    }

    /// Configured network ids in ascending order.
    pub fn supported(&self) -> Vec<u64> {
        self.networks.keys().copied().collect()
    }

    pub fn network(&self, chain_id: u64) -> Option<&NetworkContracts> {
        self.networks.get(&chain_id)
    }

    /// Like [`network`](Self::network), but a missing id is an `UnsupportedNetwork` error.
    pub fn lookup(&self, chain_id: u64) -> Result<&NetworkContracts, Error> {
        self.networks
            .get(&chain_id)
            .ok_or_else(|| Error::UnsupportedNetwork {
                current: chain_id,
                supported: self.supported().iter().map(|id| id.to_string()).collect(),
            })
    }
}
