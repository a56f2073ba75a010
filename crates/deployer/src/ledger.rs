//! Collaborator interfaces and the per-shard client registry

use crate::{
    types::{DeploymentTransaction, Receipt, ShardId, Submission},
    DeployerError, Result,
};
use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Read and submit access to a single shard
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Shard this client talks to
    fn shard(&self) -> ShardId;

    async fn get_balance(&self, address: Address) -> Result<U256>;

    /// Deployed code at an address; empty when nothing is deployed
    async fn get_code(&self, address: Address) -> Result<Bytes>;

    async fn get_gas_price(&self, shard: ShardId) -> Result<U256>;

    /// Receipt for a transaction, `None` while it is not yet visible
    async fn get_transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>>;

    async fn get_chain_id(&self) -> Result<u64>;

    /// Submit a deployment and return the address the ledger assigned
    async fn submit_deployment(&self, tx: &DeploymentTransaction) -> Result<Submission>;
}

/// Faucet that tops up accounts; requests are acknowledged, never confirmed
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Faucet: Send + Sync {
    async fn request_funds(&self, address: Address, amount: U256, token: &str) -> Result<()>;
}

/// Builds a ledger client for a shard on first use
pub type ClientFactory = Arc<dyn Fn(ShardId) -> Result<Arc<dyn LedgerClient>> + Send + Sync>;

/// Lazily populated map of shard clients
pub struct ShardRegistry {
    clients: DashMap<ShardId, Arc<dyn LedgerClient>>,
    factory: Option<ClientFactory>,
}

impl ShardRegistry {
    pub fn new(factory: ClientFactory) -> Self {
        Self {
            clients: DashMap::new(),
            factory: Some(factory),
        }
    }

    /// Registry holding only the given clients
    pub fn from_clients(clients: impl IntoIterator<Item = Arc<dyn LedgerClient>>) -> Self {
        let registry = Self {
            clients: DashMap::new(),
            factory: None,
        };
        for client in clients {
            registry.clients.insert(client.shard(), client);
        }
        registry
    }

    /// Client for a shard, built through the factory on first use
    pub fn client(&self, shard: ShardId) -> Result<Arc<dyn LedgerClient>> {
        if let Some(client) = self.clients.get(&shard) {
            return Ok(Arc::clone(client.value()));
        }

        let factory = self.factory.as_ref().ok_or_else(|| {
            DeployerError::InvalidConfiguration(format!("no ledger client for shard {shard}"))
        })?;

        let client = factory(shard)?;
        debug!("Created ledger client for shard {}", shard);

        // A concurrent caller may have inserted first; keep whichever landed.
        let entry = self.clients.entry(shard).or_insert(client);
        Ok(Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
