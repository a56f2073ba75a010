//! Deployment confirmation polling
//!
//! A deployment is confirmed once its receipt reports success and non-empty code is
//! visible at the contract address. Both are polled under the same progressive backoff.

use crate::{
    event_stream::{DeploymentEvent, EventStream},
    ledger::LedgerClient,
    retry::{BoundedRetry, LinearBackoff, RetryOutcome},
    types::{FinalState, Receipt, ReceiptStatus},
    DeployerError, Result,
};
use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Observable state of a submitted deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfirmationState {
    Pending,
    TransactionFailed,
    InsufficientFunds,
    CodeNotYetVisible,
    Confirmed,
    TimedOut,
}

impl ConfirmationState {
    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            ConfirmationState::Pending | ConfirmationState::CodeNotYetVisible
        )
    }
}

impl fmt::Display for ConfirmationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfirmationState::Pending => "pending",
            ConfirmationState::TransactionFailed => "transaction failed",
            ConfirmationState::InsufficientFunds => "insufficient funds",
            ConfirmationState::CodeNotYetVisible => "code not yet visible",
            ConfirmationState::Confirmed => "confirmed",
            ConfirmationState::TimedOut => "timed out",
        };
        f.write_str(name)
    }
}

impl From<ConfirmationState> for FinalState {
    fn from(state: ConfirmationState) -> Self {
        match state {
            ConfirmationState::Confirmed => FinalState::Confirmed,
            ConfirmationState::InsufficientFunds => FinalState::InsufficientFunds,
            ConfirmationState::TransactionFailed => FinalState::TransactionFailed,
            // A non-terminal state at the end of polling means the budget ran out.
            ConfirmationState::Pending
            | ConfirmationState::CodeNotYetVisible
            | ConfirmationState::TimedOut => FinalState::TimedOut,
        }
    }
}

/// Confirmation polling configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmationConfig {
    /// Delay before the first read
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,

    /// Delay increase per attempt
    #[serde(default = "default_step_secs")]
    pub step_secs: u64,

    /// Delay cap
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,

    /// Attempt limit for each of the receipt and code waits
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay_secs(),
            step_secs: default_step_secs(),
            max_delay_secs: default_max_delay_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ConfirmationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(DeployerError::InvalidConfiguration(
                "confirmation.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.initial_delay_secs > self.max_delay_secs {
            return Err(DeployerError::InvalidConfiguration(format!(
                "confirmation.initial_delay_secs {} exceeds max_delay_secs {}",
                self.initial_delay_secs, self.max_delay_secs
            )));
        }

        Ok(())
    }

    pub fn backoff(&self) -> LinearBackoff {
        LinearBackoff::new(
            Duration::from_secs(self.initial_delay_secs),
            Duration::from_secs(self.step_secs),
            Duration::from_secs(self.max_delay_secs),
        )
    }

    fn retry(&self, deadline: Option<Instant>) -> BoundedRetry<LinearBackoff> {
        BoundedRetry::new(self.max_attempts, self.backoff()).with_deadline(deadline)
    }
}

fn default_initial_delay_secs() -> u64 { 5 }
fn default_step_secs() -> u64 { 1 }
fn default_max_delay_secs() -> u64 { 30 }
fn default_max_attempts() -> u32 { 30 }

/// Drives a submitted deployment to a terminal confirmation state
pub struct ConfirmationPoller {
    ledger: Arc<dyn LedgerClient>,
    config: ConfirmationConfig,
    events: Arc<EventStream>,
}

impl ConfirmationPoller {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        config: ConfirmationConfig,
        events: Arc<EventStream>,
    ) -> Self {
        Self {
            ledger,
            config,
            events,
        }
    }

    /// Poll the receipt, then the code, until a terminal state is reached
    pub async fn await_confirmation(
        &self,
        address: Address,
        hash: B256,
        deadline: Option<Instant>,
    ) -> ConfirmationState {
        self.transition(address, ConfirmationState::Pending);

        let ledger = &self.ledger;
        let receipt = self
            .config
            .retry(deadline)
            .poll(
                move |attempt| async move {
                    match ledger.get_transaction_receipt(hash).await {
                        Ok(receipt) => receipt,
                        Err(e) => {
                            warn!("Receipt read for {} failed on attempt {}: {}", hash, attempt, e);
                            None
                        }
                    }
                },
                Option::is_some,
            )
            .await;

        let receipt = match receipt {
            RetryOutcome::Succeeded {
                value: Some(receipt),
                attempts,
            } => {
                debug!("Receipt for {} visible after {} attempt(s)", hash, attempts);
                receipt
            }
            _ => {
                warn!("No receipt for {} within the attempt budget", hash);
                return self.transition(address, ConfirmationState::TimedOut);
            }
        };

        match receipt_state(&receipt) {
            ConfirmationState::CodeNotYetVisible => {
                self.transition(address, ConfirmationState::CodeNotYetVisible);
            }
            state => return self.transition(address, state),
        }

        let code = self
            .config
            .retry(deadline)
            .poll(
                move |attempt| async move {
                    match ledger.get_code(address).await {
                        Ok(code) => !code.is_empty(),
                        Err(e) => {
                            warn!("Code read for {} failed on attempt {}: {}", address, attempt, e);
                            false
                        }
                    }
                },
                |visible| *visible,
            )
            .await;

        match code {
            RetryOutcome::Succeeded { attempts, .. } => {
                debug!("Code at {} visible after {} attempt(s)", address, attempts);
                self.transition(address, ConfirmationState::Confirmed)
            }
            _ => {
                warn!("Code at {} never became visible", address);
                self.transition(address, ConfirmationState::TimedOut)
            }
        }
    }

    fn transition(&self, address: Address, state: ConfirmationState) -> ConfirmationState {
        match state {
            ConfirmationState::Confirmed => info!("{} -> {}", address, state),
            ConfirmationState::TransactionFailed | ConfirmationState::InsufficientFunds => {
                error!("{} -> {}", address, state);
            }
            ConfirmationState::TimedOut => warn!("{} -> {}", address, state),
            ConfirmationState::Pending | ConfirmationState::CodeNotYetVisible => {
                debug!("{} -> {}", address, state);
            }
        }

        self.events
            .emit(DeploymentEvent::StateChanged { address, state });
        state
    }
}

fn receipt_state(receipt: &Receipt) -> ConfirmationState {
    match &receipt.status {
        ReceiptStatus::Success => ConfirmationState::CodeNotYetVisible,
        ReceiptStatus::InsufficientFunds => ConfirmationState::InsufficientFunds,
        ReceiptStatus::Failed { reason } => {
            error!("Transaction {} failed: {}", receipt.hash, reason);
            ConfirmationState::TransactionFailed
        }
    }
}
