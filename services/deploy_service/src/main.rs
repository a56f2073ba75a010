//! Shard Deploy Service
//!
//! Command-line front end for the deployment orchestrator. Deploys single contracts
//! or dependent pairs described by TOML plans and prints the resulting records as JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shard_deployer::{
    ClientFactory, DeployerConfig, Deployer, DeployerError, DeploymentEvent, Faucet,
    LedgerClient, ShardRegistry,
};
use std::{path::PathBuf, sync::Arc};
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod plan;
mod rpc;

use config::Config;
use plan::{DeployPlan, PairPlan};
use rpc::{HttpFaucet, JsonRpcLedgerClient};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Deploy a single contract
    Deploy {
        /// Plan file with a [contract] table
        #[arg(long)]
        plan: PathBuf,
    },

    /// Deploy two contracts where the second takes the first one's address
    DeployPair {
        /// Plan file with [first] and [second] tables
        #[arg(long)]
        plan: PathBuf,
    },

    /// Print the address a planned contract will occupy, without contacting the ledger
    Derive {
        /// Plan file with a [contract] table that fixes the salt
        #[arg(long)]
        plan: PathBuf,

        /// Chain id of the target ledger
        #[arg(long)]
        chain_id: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(log_filter(&args.log_level))
        .with_target(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Deploy { plan } => {
            let deployer = build_deployer(args.config.as_deref())?;
            let (plan, base_dir) = DeployPlan::load(&plan)?;
            let request = plan.contract.into_request(&base_dir)?;

            let log_task = tokio::spawn(log_events(deployer.subscribe()));
            let record = deployer.deploy(request).await.context("Deployment failed")?;
            drop(deployer);
            if let Err(e) = log_task.await {
                warn!("Event log task ended abnormally: {}", e);
            }

            println!("{}", serde_json::to_string_pretty(&record)?);
            if !record.final_state.is_confirmed() {
                anyhow::bail!("Deployment ended {}", record.final_state);
            }
        }

        Command::DeployPair { plan } => {
            let deployer = build_deployer(args.config.as_deref())?;
            let (plan, base_dir) = PairPlan::load(&plan)?;
            let pair = plan.into_pair(&base_dir)?;

            let log_task = tokio::spawn(log_events(deployer.subscribe()));
            let outcome = deployer
                .deploy_dependent_pair(pair)
                .await
                .context("Dependent deployment failed")?;
            drop(deployer);
            if let Err(e) = log_task.await {
                warn!("Event log task ended abnormally: {}", e);
            }

            println!("{}", serde_json::to_string_pretty(&outcome)?);
            let confirmed = outcome
                .second
                .as_ref()
                .is_some_and(|second| second.final_state.is_confirmed());
            if !confirmed {
                anyhow::bail!("Dependent pair did not fully confirm");
            }
        }

        Command::Derive { plan, chain_id } => {
            let deployer_config = match args.config.as_deref() {
                Some(path) => Config::load(Some(path))?.deployer,
                None => DeployerConfig::default(),
            };
            let (plan, base_dir) = DeployPlan::load(&plan)?;
            let request = plan.contract.into_request(&base_dir)?;
            let salt = request
                .salt
                .context("Derivation needs a fixed salt in the plan")?;

            deployer_config.check_shard(request.shard)?;
            let deriver = shard_deployer::AddressDeriver::new(deployer_config.max_salt);
            let address = deriver.derive(salt, &request.init_code()?, request.shard, chain_id)?;

            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "address": address,
                    "shard": request.shard,
                    "salt": salt,
                    "chain_id": chain_id,
                }))?
            );
        }
    }

    Ok(())
}

/// `RUST_LOG` takes precedence over `--log-level`
fn log_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
}

fn build_deployer(config_path: Option<&str>) -> Result<Deployer> {
    let config = Config::load(config_path)?;
    info!(
        "Loaded configuration for {} shard endpoint(s)",
        config.shards.len()
    );

    let endpoints = config.shard_endpoints();
    let timeout = config.request_timeout();
    let factory: ClientFactory = Arc::new(move |shard| {
        let url = endpoints.get(&shard).ok_or_else(|| {
            DeployerError::InvalidConfiguration(format!("no RPC endpoint for shard {shard}"))
        })?;
        let client = JsonRpcLedgerClient::new(shard, url.clone(), timeout)?;
        Ok(Arc::new(client) as Arc<dyn LedgerClient>)
    });

    let faucet: Arc<dyn Faucet> = Arc::new(HttpFaucet::new(config.faucet_url.clone(), timeout)?);
    let deployer = Deployer::new(
        config.deployer.clone(),
        Arc::new(ShardRegistry::new(factory)),
        faucet,
    )?;

    Ok(deployer)
}

async fn log_events(mut events: Receiver<DeploymentEvent>) {
    loop {
        match events.recv().await {
            Ok(DeploymentEvent::SaltChosen {
                shard,
                salt,
                address,
                strategy,
            }) => info!("[{}] salt {} -> {} on shard {}", strategy, salt, address, shard),
            Ok(DeploymentEvent::FundingRequested {
                address,
                amount,
                attempt,
            }) => info!("Faucet request #{} for {}: {}", attempt, address, amount),
            Ok(DeploymentEvent::FundingSettled {
                address, balance, ..
            }) => info!("{} funded, balance {}", address, balance),
            Ok(DeploymentEvent::FundingExhausted { address, .. }) => {
                warn!("Funding exhausted for {}", address);
            }
            Ok(DeploymentEvent::Submitted { address, hash, .. }) => {
                info!("Submitted {} for {}", hash, address);
            }
            Ok(DeploymentEvent::StateChanged { address, state }) => {
                info!("{} is {}", address, state);
            }
            Ok(DeploymentEvent::StrategyFallback { from, to, reason }) => {
                warn!("Falling back from {} to {}: {}", from, to, reason);
            }
            Ok(DeploymentEvent::DeploymentFinished { record }) => {
                if record.final_state.is_confirmed() {
                    info!("Finished: {} confirmed", record.address);
                } else {
                    error!("Finished: {} {}", record.address, record.final_state);
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!("Event log skipped {} event(s)", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}
