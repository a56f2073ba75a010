//! Deployment orchestration
//!
//! One `deploy` call validates the request, resolves the shard client, fixes the fee
//! credit and then runs the requested strategy, falling back from internal to
//! external once if the internal attempt does not confirm.

use crate::{
    address::AddressDeriver,
    confirmation::ConfirmationPoller,
    event_stream::{DeploymentEvent, EventStream},
    fees::FeeEstimator,
    funding::{FundingGuard, FundingOutcome, FundingPlan},
    ledger::{Faucet, LedgerClient, ShardRegistry},
    strategy::DeploymentStrategy,
    types::{
        DeployMode, DeploymentRecord, DeploymentRequest, DeploymentTransaction, FinalState,
        ShardId,
    },
    DeployerConfig, DeployerError, Result,
};
use alloy_primitives::{Address, Bytes, B256, U256};
use futures::future::join_all;
use std::sync::Arc;
use tokio::{sync::broadcast, time::Instant};
use tracing::{debug, error, info, warn};

/// Draws attempted before giving up on finding an unused salt
const MAX_SALT_DRAWS: u32 = 16;

/// Inputs fixed once per `deploy` call and shared by every strategy attempt
struct AttemptContext<'a> {
    shard: ShardId,
    salt: Option<u64>,
    init_code: &'a Bytes,
    ledger: &'a Arc<dyn LedgerClient>,
    chain_id: u64,
    fee_credit: U256,
    deadline: Option<Instant>,
}

impl AttemptContext<'_> {
    fn record(
        &self,
        address: Address,
        transaction_hash: Option<B256>,
        strategy_used: DeploymentStrategy,
        final_state: FinalState,
        salt: u64,
    ) -> DeploymentRecord {
        DeploymentRecord {
            address,
            transaction_hash,
            shard: self.shard,
            strategy_used,
            final_state,
            salt,
            fee_credit: self.fee_credit,
        }
    }
}

/// Deploys and funds contracts across shards
pub struct Deployer {
    config: DeployerConfig,
    deriver: AddressDeriver,
    registry: Arc<ShardRegistry>,
    faucet: Arc<dyn Faucet>,
    events: Arc<EventStream>,
}

impl Deployer {
    pub fn new(
        config: DeployerConfig,
        registry: Arc<ShardRegistry>,
        faucet: Arc<dyn Faucet>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            deriver: AddressDeriver::new(config.max_salt),
            config,
            registry,
            faucet,
            events: Arc::new(EventStream::new()),
        })
    }

    pub fn config(&self) -> &DeployerConfig {
        &self.config
    }

    pub fn deriver(&self) -> AddressDeriver {
        self.deriver
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeploymentEvent> {
        self.events.subscribe()
    }

    /// Deploy one contract and report its terminal state
    pub async fn deploy(&self, request: DeploymentRequest) -> Result<DeploymentRecord> {
        let deadline = request.deadline.map(|d| Instant::now() + d);

        self.config.check_shard(request.shard)?;
        if let Some(salt) = request.salt {
            self.deriver.validate_salt(salt)?;
        }
        let init_code = request.init_code()?;

        let ledger = self.registry.client(request.shard)?;
        let chain_id = ledger.get_chain_id().await?;
        let fee_credit = match request.fee_credit_hint {
            Some(fee_credit) => fee_credit,
            None => {
                FeeEstimator::new(Arc::clone(&ledger))
                    .estimate(request.complexity)
                    .await?
            }
        };

        info!(
            "Deploying {} bytes to shard {} ({} strategy, fee credit {})",
            init_code.len(),
            request.shard,
            request.strategy,
            fee_credit
        );

        let ctx = AttemptContext {
            shard: request.shard,
            salt: request.salt,
            init_code: &init_code,
            ledger: &ledger,
            chain_id,
            fee_credit,
            deadline,
        };

        let order = DeploymentStrategy::attempt_order(request.strategy);
        for (index, &strategy) in order.iter().enumerate() {
            let fallback = order.get(index + 1).copied();

            let result = match strategy {
                DeploymentStrategy::Internal => self.run_internal(&ctx).await,
                DeploymentStrategy::External => self.run_external(&ctx).await,
            };

            let reason = match (result, fallback) {
                (Ok(record), _) if record.final_state.is_confirmed() => {
                    return Ok(self.finish(record));
                }
                (Ok(record), None) => return Ok(self.finish(record)),
                (Err(e), None) => return Err(e),
                (Ok(record), Some(_)) => record.final_state.to_string(),
                (Err(e), Some(_)) => e.to_string(),
            };

            if let Some(next) = fallback {
                warn!("{} deployment did not confirm ({}), falling back to {}", strategy, reason, next);
                self.events.emit(DeploymentEvent::StrategyFallback {
                    from: strategy,
                    to: next,
                    reason,
                });
            }
        }

        Err(DeployerError::InvalidConfiguration(
            "no deployment strategy to attempt".to_string(),
        ))
    }

    /// Deploy independent requests concurrently
    pub async fn deploy_batch(
        &self,
        requests: impl IntoIterator<Item = DeploymentRequest>,
    ) -> Vec<Result<DeploymentRecord>> {
        join_all(requests.into_iter().map(|request| self.deploy(request))).await
    }

    async fn run_internal(&self, ctx: &AttemptContext<'_>) -> Result<DeploymentRecord> {
        let strategy = DeploymentStrategy::Internal;
        let salt = ctx
            .salt
            .unwrap_or_else(|| self.deriver.random_salt(&mut rand::thread_rng()));
        let deployer = self.deriver.derive_deployer(salt, ctx.shard, ctx.chain_id)?;
        // Reported when nothing was submitted and the ledger never assigned an address.
        let expected = self.deriver.derive(salt, ctx.init_code, ctx.shard, ctx.chain_id)?;

        debug!("Ephemeral deployer {} for salt {}", deployer, salt);
        self.events.emit(DeploymentEvent::SaltChosen {
            shard: ctx.shard,
            salt,
            address: deployer,
            strategy,
        });

        let plan = FundingPlan::new(deployer, ctx.fee_credit, &self.config.funding);
        let funding = self.funding_guard(ctx.ledger).ensure_funded(&plan, ctx.deadline).await;
        if let Some(state) = funding_failure(&funding) {
            return Ok(ctx.record(expected, None, strategy, state, salt));
        }

        let tx = DeploymentTransaction {
            mode: DeployMode::Internal { deployer },
            shard: ctx.shard,
            init_code: ctx.init_code.clone(),
            salt: U256::from(salt),
            fee_credit: ctx.fee_credit,
        };

        let submission = match ctx.ledger.submit_deployment(&tx).await {
            Ok(submission) => submission,
            Err(e) => {
                error!("Internal submission through {} failed: {}", deployer, e);
                let state = FinalState::SubmissionFailed {
                    reason: e.to_string(),
                };
                return Ok(ctx.record(expected, None, strategy, state, salt));
            }
        };

        info!("Submitted {} via {}, ledger assigned {}", submission.hash, deployer, submission.address);
        self.events.emit(DeploymentEvent::Submitted {
            address: submission.address,
            hash: submission.hash,
            strategy,
        });

        let state = self
            .poller(ctx.ledger)
            .await_confirmation(submission.address, submission.hash, ctx.deadline)
            .await;

        Ok(ctx.record(
            submission.address,
            Some(submission.hash),
            strategy,
            state.into(),
            salt,
        ))
    }

    async fn run_external(&self, ctx: &AttemptContext<'_>) -> Result<DeploymentRecord> {
        let strategy = DeploymentStrategy::External;

        let (salt, address) = match ctx.salt {
            Some(salt) => {
                let address = self.deriver.derive(salt, ctx.init_code, ctx.shard, ctx.chain_id)?;
                if has_code(ctx.ledger, address).await {
                    info!("Contract already deployed at {} for salt {}", address, salt);
                    return Ok(ctx.record(address, None, strategy, FinalState::Confirmed, salt));
                }
                (salt, address)
            }
            None => self.draw_unused_salt(ctx).await?,
        };

        debug!("Derived {} for salt {} on shard {}", address, salt, ctx.shard);
        self.events.emit(DeploymentEvent::SaltChosen {
            shard: ctx.shard,
            salt,
            address,
            strategy,
        });

        let plan = FundingPlan::new(address, ctx.fee_credit, &self.config.funding);
        let funding = self.funding_guard(ctx.ledger).ensure_funded(&plan, ctx.deadline).await;
        if let Some(state) = funding_failure(&funding) {
            return Ok(ctx.record(address, None, strategy, state, salt));
        }

        let tx = DeploymentTransaction {
            mode: DeployMode::External { address },
            shard: ctx.shard,
            init_code: ctx.init_code.clone(),
            salt: U256::from(salt),
            fee_credit: ctx.fee_credit,
        };

        let submission = match ctx.ledger.submit_deployment(&tx).await {
            Ok(submission) => submission,
            Err(e) => {
                error!("External submission to {} failed: {}", address, e);
                let state = FinalState::SubmissionFailed {
                    reason: e.to_string(),
                };
                return Ok(ctx.record(address, None, strategy, state, salt));
            }
        };

        if submission.address != address {
            error!(
                "Ledger deployed to {} instead of derived address {}",
                submission.address, address
            );
            let state = FinalState::SubmissionFailed {
                reason: format!(
                    "ledger assigned {} instead of derived {}",
                    submission.address, address
                ),
            };
            return Ok(ctx.record(address, Some(submission.hash), strategy, state, salt));
        }

        info!("Submitted {} for {}", submission.hash, address);
        self.events.emit(DeploymentEvent::Submitted {
            address,
            hash: submission.hash,
            strategy,
        });

        let state = self
            .poller(ctx.ledger)
            .await_confirmation(address, submission.hash, ctx.deadline)
            .await;

        Ok(ctx.record(address, Some(submission.hash), strategy, state.into(), salt))
    }

    /// Random salt whose derived address holds no code yet
    async fn draw_unused_salt(&self, ctx: &AttemptContext<'_>) -> Result<(u64, Address)> {
        for draw in 1..=MAX_SALT_DRAWS {
            let salt = self.deriver.random_salt(&mut rand::thread_rng());
            let address = self.deriver.derive(salt, ctx.init_code, ctx.shard, ctx.chain_id)?;

            if !has_code(ctx.ledger, address).await {
                return Ok((salt, address));
            }
            debug!("Salt {} already used at {} (draw {})", salt, address, draw);
        }

        Err(DeployerError::SaltSpaceExhausted(MAX_SALT_DRAWS))
    }

    fn funding_guard(&self, ledger: &Arc<dyn LedgerClient>) -> FundingGuard {
        FundingGuard::new(
            Arc::clone(ledger),
            Arc::clone(&self.faucet),
            &self.config.funding,
            self.config.faucet_token.clone(),
            Arc::clone(&self.events),
        )
    }

    fn poller(&self, ledger: &Arc<dyn LedgerClient>) -> ConfirmationPoller {
        ConfirmationPoller::new(
            Arc::clone(ledger),
            self.config.confirmation.clone(),
            Arc::clone(&self.events),
        )
    }

    fn finish(&self, record: DeploymentRecord) -> DeploymentRecord {
        if record.final_state.is_confirmed() {
            info!(
                "Deployment confirmed at {} on shard {} ({} strategy)",
                record.address, record.shard, record.strategy_used
            );
        } else {
            error!(
                "Deployment to {} on shard {} ended {}",
                record.address, record.shard, record.final_state
            );
        }

        self.events.emit(DeploymentEvent::DeploymentFinished {
            record: record.clone(),
        });
        record
    }
}

async fn has_code(ledger: &Arc<dyn LedgerClient>, address: Address) -> bool {
    match ledger.get_code(address).await {
        Ok(code) => !code.is_empty(),
        Err(e) => {
            warn!("Code read for {} failed, assuming empty: {}", address, e);
            false
        }
    }
}

fn funding_failure(outcome: &FundingOutcome) -> Option<FinalState> {
    match outcome {
        FundingOutcome::AlreadyFunded { .. } | FundingOutcome::Funded { .. } => None,
        FundingOutcome::Exhausted { .. } => Some(FinalState::FundingExhausted),
        FundingOutcome::DeadlineExceeded { .. } => Some(FinalState::TimedOut),
    }
}
