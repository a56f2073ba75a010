//! Funding sufficiency loop
//!
//! A target is funded by asking the faucet for decreasing multiples of the required
//! amount and re-reading the balance after a settle interval. Success is only ever
//! reported from a live balance read.

use crate::{
    event_stream::{DeploymentEvent, EventStream},
    ledger::{Faucet, LedgerClient},
    retry::{BoundedRetry, RetryOutcome},
    types::Ratio,
    DeployerError, Result,
};
use alloy_primitives::{Address, U256};
use backoff::backoff::Constant;
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Funding loop configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FundingConfig {
    /// Faucet request sizes as multiples of the required amount, in order
    #[serde(default = "default_multipliers")]
    pub multipliers: Vec<Ratio>,

    /// Wait between a faucet request and the balance re-check
    #[serde(default = "default_settle_interval_secs")]
    pub settle_interval_secs: u64,
}

impl Default for FundingConfig {
    fn default() -> Self {
        Self {
            multipliers: default_multipliers(),
            settle_interval_secs: default_settle_interval_secs(),
        }
    }
}

impl FundingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.multipliers.is_empty() {
            return Err(DeployerError::InvalidConfiguration(
                "funding.multipliers must not be empty".to_string(),
            ));
        }

        if let Some(ratio) = self.multipliers.iter().find(|r| r.den == 0 || r.num == 0) {
            return Err(DeployerError::InvalidConfiguration(format!(
                "funding multiplier {ratio} must be a positive ratio"
            )));
        }

        Ok(())
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_secs(self.settle_interval_secs)
    }
}

fn default_multipliers() -> Vec<Ratio> {
    vec![Ratio::new(2, 1), Ratio::new(1, 1), Ratio::new(1, 2)]
}

fn default_settle_interval_secs() -> u64 { 3 }

/// What to fund and how much to ask for on each attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingPlan {
    pub target: Address,
    pub required: U256,
    pub schedule: Vec<U256>,
}

impl FundingPlan {
    pub fn new(target: Address, required: U256, config: &FundingConfig) -> Self {
        let schedule = config
            .multipliers
            .iter()
            .map(|ratio| ratio.apply_ceil(required))
            .collect();

        Self {
            target,
            required,
            schedule,
        }
    }
}

/// Result of a funding run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FundingOutcome {
    /// Balance already covered the requirement; no faucet request was made
    AlreadyFunded { balance: U256 },
    /// Balance reached the requirement after faucet requests
    Funded { balance: U256, requests: u32 },
    /// Every scheduled request was made without reaching the requirement
    Exhausted {
        last_balance: Option<U256>,
        requests: u32,
    },
    /// The caller deadline ended the loop early
    DeadlineExceeded {
        last_balance: Option<U256>,
        requests: u32,
    },
}

impl FundingOutcome {
    pub fn is_funded(&self) -> bool {
        matches!(
            self,
            FundingOutcome::AlreadyFunded { .. } | FundingOutcome::Funded { .. }
        )
    }
}

/// Ensures accounts hold at least a required balance
pub struct FundingGuard {
    ledger: Arc<dyn LedgerClient>,
    faucet: Arc<dyn Faucet>,
    settle_interval: Duration,
    token: String,
    events: Arc<EventStream>,
}

impl FundingGuard {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        faucet: Arc<dyn Faucet>,
        config: &FundingConfig,
        token: impl Into<String>,
        events: Arc<EventStream>,
    ) -> Self {
        Self {
            ledger,
            faucet,
            settle_interval: config.settle_interval(),
            token: token.into(),
            events,
        }
    }

    pub async fn ensure_funded(&self, plan: &FundingPlan, deadline: Option<Instant>) -> FundingOutcome {
        let target = plan.target;
        let required = plan.required;

        match self.ledger.get_balance(target).await {
            Ok(balance) if balance >= required => {
                info!("{} already holds {} (required {})", target, balance, required);
                self.events.emit(DeploymentEvent::FundingSettled {
                    address: target,
                    balance,
                    faucet_requests: 0,
                });
                return FundingOutcome::AlreadyFunded { balance };
            }
            Ok(balance) => {
                debug!("{} holds {}, requires {}", target, balance, required);
            }
            Err(e) => {
                warn!("Balance read for {} failed, assuming insufficient: {}", target, e);
            }
        }

        let ledger = &self.ledger;
        let faucet = &self.faucet;
        let events = &self.events;
        let token = self.token.as_str();
        let schedule = &plan.schedule;

        let mut retry = BoundedRetry::new(schedule.len() as u32, Constant::new(self.settle_interval))
            .with_deadline(deadline);

        let outcome = retry
            .run(
                move |attempt| {
                    let amount = schedule
                        .get(attempt as usize - 1)
                        .copied()
                        .unwrap_or(required);
                    events.emit(DeploymentEvent::FundingRequested {
                        address: target,
                        amount,
                        attempt,
                    });
                    async move {
                        info!("Requesting {} {} for {} (attempt {})", amount, token, target, attempt);
                        if let Err(e) = faucet.request_funds(target, amount, token).await {
                            warn!("Faucet request for {} failed: {}", target, e);
                        }
                    }
                },
                move |_| async move {
                    match ledger.get_balance(target).await {
                        Ok(balance) => Some(balance),
                        Err(e) => {
                            warn!("Balance re-check for {} failed: {}", target, e);
                            None
                        }
                    }
                },
                |balance| matches!(balance, Some(balance) if *balance >= required),
            )
            .await;

        match outcome {
            RetryOutcome::Succeeded { value, attempts } => {
                let balance = value.unwrap_or_default();
                info!("{} funded with {} after {} request(s)", target, balance, attempts);
                self.events.emit(DeploymentEvent::FundingSettled {
                    address: target,
                    balance,
                    faucet_requests: attempts,
                });
                FundingOutcome::Funded {
                    balance,
                    requests: attempts,
                }
            }
            RetryOutcome::Exhausted { last, attempts } => {
                let last_balance = last.flatten();
                warn!(
                    "Funding schedule exhausted for {} after {} request(s), last balance {:?}",
                    target, attempts, last_balance
                );
                self.events.emit(DeploymentEvent::FundingExhausted {
                    address: target,
                    last_balance,
                    faucet_requests: attempts,
                });
                FundingOutcome::Exhausted {
                    last_balance,
                    requests: attempts,
                }
            }
            RetryOutcome::DeadlineExceeded { last, attempts } => {
                warn!("Deadline reached while funding {}", target);
                FundingOutcome::DeadlineExceeded {
                    last_balance: last.flatten(),
                    requests: attempts,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ledger::MockFaucet,
        testing::{ScriptedFaucet, ScriptedLedger},
        types::ShardId,
    };

    fn target() -> Address {
        let mut bytes = [0x42u8; 20];
        bytes[..2].copy_from_slice(&ShardId::new(1).to_be_bytes());
        Address::from(bytes)
    }

    fn guard(ledger: &Arc<ScriptedLedger>, faucet: Arc<dyn Faucet>) -> FundingGuard {
        FundingGuard::new(
            Arc::clone(ledger) as Arc<dyn LedgerClient>,
            faucet,
            &FundingConfig::default(),
            "native",
            Arc::new(EventStream::new()),
        )
    }

    #[test]
    fn test_plan_schedule() {
        let plan = FundingPlan::new(target(), U256::from(1_000_001), &FundingConfig::default());

        assert_eq!(
            plan.schedule,
            vec![U256::from(2_000_002), U256::from(1_000_001), U256::from(500_001)]
        );
    }

    #[test]
    fn test_config_validation() {
        assert!(FundingConfig::default().validate().is_ok());

        let empty = FundingConfig {
            multipliers: vec![],
            ..FundingConfig::default()
        };
        assert!(empty.validate().is_err());

        let zero = FundingConfig {
            multipliers: vec![Ratio::new(1, 0)],
            ..FundingConfig::default()
        };
        assert!(zero.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_funded_makes_no_faucet_call() {
        let ledger = Arc::new(ScriptedLedger::new(ShardId::new(1)));
        ledger.credit(target(), U256::from(5_000_000));

        let mut faucet = MockFaucet::new();
        faucet.expect_request_funds().times(0);

        let guard = guard(&ledger, Arc::new(faucet));
        let plan = FundingPlan::new(target(), U256::from(1_000_000), &FundingConfig::default());

        let first = guard.ensure_funded(&plan, None).await;
        let second = guard.ensure_funded(&plan, None).await;

        assert_eq!(first, FundingOutcome::AlreadyFunded { balance: U256::from(5_000_000) });
        assert_eq!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_request_then_recheck() {
        let ledger = Arc::new(ScriptedLedger::new(ShardId::new(1)));
        let faucet = Arc::new(ScriptedFaucet::new(vec![Arc::clone(&ledger)]));
        let guard = guard(&ledger, Arc::clone(&faucet) as Arc<dyn Faucet>);
        let plan = FundingPlan::new(target(), U256::from(1_000_000), &FundingConfig::default());
        let start = Instant::now();

        let outcome = guard.ensure_funded(&plan, None).await;

        assert_eq!(
            outcome,
            FundingOutcome::Funded {
                balance: U256::from(2_000_000),
                requests: 1
            }
        );
        assert_eq!(faucet.calls(), vec![(target(), U256::from(2_000_000))]);
        // initial read plus one re-check
        assert_eq!(ledger.balance_reads(), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_faucet_error_consumes_attempt() {
        let ledger = Arc::new(ScriptedLedger::new(ShardId::new(1)));
        let faucet = Arc::new(ScriptedFaucet::new(vec![Arc::clone(&ledger)]).fail_first(1));
        let guard = guard(&ledger, Arc::clone(&faucet) as Arc<dyn Faucet>);
        let plan = FundingPlan::new(target(), U256::from(1_000_000), &FundingConfig::default());

        let outcome = guard.ensure_funded(&plan, None).await;

        assert_eq!(
            outcome,
            FundingOutcome::Funded {
                balance: U256::from(1_000_000),
                requests: 2
            }
        );
        assert_eq!(
            faucet.calls(),
            vec![
                (target(), U256::from(2_000_000)),
                (target(), U256::from(1_000_000))
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_initial_read_assumes_insufficient() {
        let ledger = Arc::new(ScriptedLedger::new(ShardId::new(1)));
        ledger.credit(target(), U256::from(5_000_000));
        ledger.fail_balance_reads(1);

        let faucet = Arc::new(ScriptedFaucet::new(vec![Arc::clone(&ledger)]));
        let guard = guard(&ledger, Arc::clone(&faucet) as Arc<dyn Faucet>);
        let plan = FundingPlan::new(target(), U256::from(1_000_000), &FundingConfig::default());

        let outcome = guard.ensure_funded(&plan, None).await;

        assert!(outcome.is_funded());
        assert_eq!(faucet.calls().len(), 1);
        assert_eq!(ledger.balance_of(target()), U256::from(7_000_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dry_faucet_exhausts_schedule() {
        let ledger = Arc::new(ScriptedLedger::new(ShardId::new(1)));
        let faucet = Arc::new(ScriptedFaucet::new(vec![Arc::clone(&ledger)]).dry());
        let guard = guard(&ledger, Arc::clone(&faucet) as Arc<dyn Faucet>);
        let plan = FundingPlan::new(target(), U256::from(1_000_000), &FundingConfig::default());
        let start = Instant::now();

        let outcome = guard.ensure_funded(&plan, None).await;

        assert_eq!(
            outcome,
            FundingOutcome::Exhausted {
                last_balance: Some(U256::ZERO),
                requests: 3
            }
        );
        let amounts: Vec<U256> = faucet.calls().into_iter().map(|(_, amount)| amount).collect();
        assert_eq!(
            amounts,
            vec![U256::from(2_000_000), U256::from(1_000_000), U256::from(500_000)]
        );
        assert_eq!(start.elapsed(), Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_ends_funding() {
        let ledger = Arc::new(ScriptedLedger::new(ShardId::new(1)));
        let faucet = Arc::new(ScriptedFaucet::new(vec![Arc::clone(&ledger)]).dry());
        let guard = guard(&ledger, Arc::clone(&faucet) as Arc<dyn Faucet>);
        let plan = FundingPlan::new(target(), U256::from(1_000_000), &FundingConfig::default());

        let outcome = guard
            .ensure_funded(&plan, Some(Instant::now() + Duration::from_secs(4)))
            .await;

        assert_eq!(
            outcome,
            FundingOutcome::DeadlineExceeded {
                last_balance: Some(U256::ZERO),
                requests: 1
            }
        );
        assert!(!outcome.is_funded());
        assert_eq!(faucet.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_request_that_cannot_be_verified_before_deadline() {
        let ledger = Arc::new(ScriptedLedger::new(ShardId::new(1)));
        let faucet = Arc::new(ScriptedFaucet::new(vec![Arc::clone(&ledger)]).fail_first(1));
        let guard = guard(&ledger, Arc::clone(&faucet) as Arc<dyn Faucet>);
        let plan = FundingPlan::new(target(), U256::from(1_000_000), &FundingConfig::default());

        let outcome = guard
            .ensure_funded(&plan, Some(Instant::now() + Duration::from_secs(4)))
            .await;

        // the failed first request is re-checked at 3s; a second would settle past 4s
        assert_eq!(
            outcome,
            FundingOutcome::DeadlineExceeded {
                last_balance: Some(U256::ZERO),
                requests: 1
            }
        );
        assert_eq!(faucet.calls(), vec![(target(), U256::from(2_000_000))]);
        assert_eq!(ledger.balance_of(target()), U256::ZERO);
    }
}
