use crate::{
    address::AddressDeriver,
    delegation::DelegationOracle,
    program::{
        DELEGATION_PROGRAM_ID,
        TOMO_PROGRAM_ID,
    },
    wallet::ChainDescriptor,
};
use solana_sdk::{
    commitment_config::CommitmentConfig,
    pubkey::Pubkey,
};
use std::{
    fmt,
    time::Duration,
};

pub const DEFAULT_DEVNET_RPC_URL: &str = "https://api.devnet.solana.com";
pub const DEFAULT_TESTNET_RPC_URL: &str = "https://api.testnet.solana.com";
pub const DEFAULT_LOCAL_RPC_URL: &str = "http://localhost:8899";

pub const DEFAULT_DEVNET_ROLLUP_URL: &str = "https://devnet.magicblock.app/";
pub const DEFAULT_LOCAL_ROLLUP_URL: &str = "http://localhost:7799";

pub const APP_NAME: &str = "tomo";
pub const APP_URI: &str = "https://example.com";

const DEFAULT_CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Network {
    Devnet,
    Testnet,
    Local,
}

impl Network {
    pub fn chain_id(&self) -> &'static str {
        match self {
            Network::Devnet => "solana:devnet",
            Network::Testnet => "solana:testnet",
            Network::Local => "solana:localnet",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Network::Devnet => DEFAULT_DEVNET_RPC_URL,
            Network::Testnet => DEFAULT_TESTNET_RPC_URL,
            Network::Local => DEFAULT_LOCAL_RPC_URL,
        }
    }

    /// Testnet has no rollup of its own; it shares the devnet one.
    pub fn default_rollup_url(&self) -> &'static str {
        match self {
            Network::Devnet | Network::Testnet => DEFAULT_DEVNET_ROLLUP_URL,
            Network::Local => DEFAULT_LOCAL_ROLLUP_URL,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Devnet => "devnet",
            Network::Testnet => "testnet",
            Network::Local => "local",
        };
        write!(f, "{name}")
    }
}

/// Everything the services need to reach one deployment.
#[derive(Clone, Debug)]
pub struct ClusterConfig {
    pub network: Network,
    pub base_rpc_url: String,
    pub rollup_rpc_url: String,
    pub program_id: Pubkey,
    pub delegation_program_id: Pubkey,
    pub commitment: CommitmentConfig,
    pub confirm_poll_interval: Duration,
    pub chain: ChainDescriptor,
}

impl ClusterConfig {
    pub fn for_network(network: Network) -> Self {
        Self {
            network,
            base_rpc_url: network.default_base_url().to_string(),
            rollup_rpc_url: network.default_rollup_url().to_string(),
            program_id: TOMO_PROGRAM_ID,
            delegation_program_id: DELEGATION_PROGRAM_ID,
            commitment: CommitmentConfig::confirmed(),
            confirm_poll_interval: DEFAULT_CONFIRM_POLL_INTERVAL,
            chain: ChainDescriptor {
                chain_id: network.chain_id().to_string(),
                app_name: APP_NAME.to_string(),
                app_uri: APP_URI.to_string(),
            },
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_rpc_url = url.into();
        self
    }

    pub fn with_rollup_url(mut self, url: impl Into<String>) -> Self {
        self.rollup_rpc_url = url.into();
        self
    }

    pub fn with_program_id(mut self, program_id: Pubkey) -> Self {
        self.program_id = program_id;
        self
    }

    pub fn with_confirm_poll_interval(mut self, interval: Duration) -> Self {
        self.confirm_poll_interval = interval;
        self
    }

    pub fn deriver(&self) -> AddressDeriver {
        AddressDeriver::new(self.program_id, self.delegation_program_id)
    }

    pub fn oracle(&self) -> DelegationOracle {
        DelegationOracle::new(self.delegation_program_id)
    }
}
