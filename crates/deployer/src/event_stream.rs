//! Deployment progress event streaming

use crate::{
    confirmation::ConfirmationState,
    strategy::DeploymentStrategy,
    types::{DeploymentRecord, ShardId},
};
use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Deployment progress events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentEvent {
    /// Salt fixed and target address derived for a strategy attempt
    SaltChosen {
        shard: ShardId,
        salt: u64,
        address: Address,
        strategy: DeploymentStrategy,
    },

    /// Faucet top-up requested
    FundingRequested {
        address: Address,
        amount: U256,
        attempt: u32,
    },

    /// Balance observed at or above the required amount
    FundingSettled {
        address: Address,
        balance: U256,
        faucet_requests: u32,
    },

    /// Funding schedule ran out without a sufficient balance
    FundingExhausted {
        address: Address,
        last_balance: Option<U256>,
        faucet_requests: u32,
    },

    /// Deployment transaction accepted by the ledger
    Submitted {
        address: Address,
        hash: B256,
        strategy: DeploymentStrategy,
    },

    /// Confirmation state transition
    StateChanged {
        address: Address,
        state: ConfirmationState,
    },

    /// Internal strategy failed and external takes over
    StrategyFallback {
        from: DeploymentStrategy,
        to: DeploymentStrategy,
        reason: String,
    },

    /// Deployment finished with a terminal state
    DeploymentFinished { record: DeploymentRecord },
}

/// Broadcasts deployment events to any number of subscribers
pub struct EventStream {
    sender: broadcast::Sender<DeploymentEvent>,
}

impl EventStream {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1000); // Buffer up to 1000 events

        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeploymentEvent> {
        self.sender.subscribe()
    }

    /// Emit an event; dropped silently when nobody listens
    pub fn emit(&self, event: DeploymentEvent) {
        debug!("Emitting event: {:?}", event);

        match self.sender.send(event) {
            Ok(count) => {
                debug!("Event sent to {} receivers", count);
            }
            Err(_) => {
                debug!("No receivers for event");
            }
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventStream {
    fn default() -> Self {
        Self::new()
    }
}
