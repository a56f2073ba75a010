//! Shard Deployer
//!
//! Off-chain orchestration for deploying and funding contracts on a sharded ledger.
//! Contract addresses are derived client-side before anything exists on chain, the
//! target is funded through a faucet and verified by balance reads, and the deployment
//! is confirmed by polling an eventually-consistent read path.

use serde::Deserialize;
use thiserror::Error;

pub mod address;
pub mod confirmation;
pub mod deployer;
pub mod event_stream;
pub mod fees;
pub mod funding;
pub mod ledger;
pub mod retry;
pub mod sequencer;
pub mod strategy;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use address::{shard_of, AddressDeriver};
pub use confirmation::{ConfirmationConfig, ConfirmationPoller, ConfirmationState};
pub use deployer::Deployer;
pub use event_stream::{DeploymentEvent, EventStream};
pub use fees::{ComplexityClass, FeeEstimator};
pub use funding::{FundingConfig, FundingGuard, FundingOutcome, FundingPlan};
pub use ledger::{ClientFactory, Faucet, LedgerClient, ShardRegistry};
pub use retry::{BoundedRetry, LinearBackoff, RetryOutcome};
pub use sequencer::{ConstructorArg, DependentOutcome, DependentPair, DeploymentTemplate};
pub use strategy::DeploymentStrategy;
pub use types::{
    DeployMode, DeploymentRecord, DeploymentRequest, DeploymentTransaction, FinalState, Ratio,
    Receipt, ReceiptStatus, ShardId, Submission,
};

#[derive(Debug, Error)]
pub enum DeployerError {
    #[error("Salt {salt} is outside the accepted range 0..={max}")]
    InvalidSalt { salt: u64, max: u64 },

    #[error("Bytecode must not be empty")]
    EmptyBytecode,

    #[error("Shard {shard} is outside the configured range {min}..={max}")]
    InvalidShard { shard: ShardId, min: u16, max: u16 },

    #[error("ABI encoding failed: {0}")]
    Abi(String),

    #[error("Constructor template has no dependency placeholder")]
    MissingDependencyPlaceholder,

    #[error("Gas price unavailable: {0}")]
    PriceUnavailable(String),

    #[error("Ledger RPC error: {0}")]
    Rpc(String),

    #[error("Faucet error: {0}")]
    Faucet(String),

    #[error("No unused salt found after {0} draws")]
    SaltSpaceExhausted(u32),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl From<alloy_dyn_abi::Error> for DeployerError {
    fn from(err: alloy_dyn_abi::Error) -> Self {
        Self::Abi(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DeployerError>;

/// Orchestrator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DeployerConfig {
    /// Lowest shard id accepted for deployment
    #[serde(default = "default_min_shard")]
    pub min_shard: u16,

    /// Highest shard id accepted for deployment
    #[serde(default = "default_max_shard")]
    pub max_shard: u16,

    /// Upper bound (inclusive) for salts
    #[serde(default = "default_max_salt")]
    pub max_salt: u64,

    /// Token requested from the faucet
    #[serde(default = "default_faucet_token")]
    pub faucet_token: String,

    #[serde(default)]
    pub funding: FundingConfig,

    #[serde(default)]
    pub confirmation: ConfirmationConfig,
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            min_shard: default_min_shard(),
            max_shard: default_max_shard(),
            max_salt: default_max_salt(),
            faucet_token: default_faucet_token(),
            funding: FundingConfig::default(),
            confirmation: ConfirmationConfig::default(),
        }
    }
}

impl DeployerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.min_shard > self.max_shard {
            return Err(DeployerError::InvalidConfiguration(format!(
                "min_shard {} is greater than max_shard {}",
                self.min_shard, self.max_shard
            )));
        }

        if self.faucet_token.is_empty() {
            return Err(DeployerError::InvalidConfiguration(
                "faucet_token must not be empty".to_string(),
            ));
        }

        self.funding.validate()?;
        self.confirmation.validate()?;

        Ok(())
    }

    /// Check that a shard id lies in the configured range
    pub fn check_shard(&self, shard: ShardId) -> Result<()> {
        if (self.min_shard..=self.max_shard).contains(&shard.get()) {
            Ok(())
        } else {
            Err(DeployerError::InvalidShard {
                shard,
                min: self.min_shard,
                max: self.max_shard,
            })
        }
    }
}

fn default_min_shard() -> u16 { 1 }
fn default_max_shard() -> u16 { 4 }
fn default_max_salt() -> u64 { 9_999 }
fn default_faucet_token() -> String { "native".to_string() }
