//! Configuration module for the deployment service

use anyhow::{Context, Result};
use serde::Deserialize;
use shard_deployer::{DeployerConfig, ShardId};
use std::{
    collections::{HashMap, HashSet},
    fs,
    time::Duration,
};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Ledger RPC endpoint per shard
    pub shards: Vec<ShardEndpoint>,

    /// Faucet JSON-RPC URL
    pub faucet_url: String,

    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Orchestrator settings
    #[serde(default)]
    pub deployer: DeployerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShardEndpoint {
    pub shard: u16,
    pub rpc_url: String,
}

impl Config {
    /// Load configuration from file or environment variables
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        // Load from .env file if it exists
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("Could not load .env file: {}", e);
        }

        let config = if let Some(path) = config_path {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {path}"))?;

            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {path}"))?
        } else {
            Self::from_env()?
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let shards = parse_shard_urls(
            &std::env::var("SHARD_RPC_URLS")
                .context("SHARD_RPC_URLS environment variable is required")?,
        )?;

        let mut deployer = DeployerConfig::default();
        if let Ok(value) = std::env::var("MIN_SHARD") {
            deployer.min_shard = value.parse().context("Invalid MIN_SHARD")?;
        }
        if let Ok(value) = std::env::var("MAX_SHARD") {
            deployer.max_shard = value.parse().context("Invalid MAX_SHARD")?;
        }
        if let Ok(value) = std::env::var("MAX_SALT") {
            deployer.max_salt = value.parse().context("Invalid MAX_SALT")?;
        }
        if let Ok(value) = std::env::var("FAUCET_TOKEN") {
            deployer.faucet_token = value;
        }

        Ok(Config {
            shards,
            faucet_url: std::env::var("FAUCET_URL")
                .context("FAUCET_URL environment variable is required")?,
            request_timeout_secs: std::env::var("REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| default_request_timeout_secs().to_string())
                .parse()
                .context("Invalid REQUEST_TIMEOUT_SECS")?,
            deployer,
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if !self.faucet_url.starts_with("http") {
            anyhow::bail!("Faucet URL must start with http or https");
        }

        if self.shards.is_empty() {
            anyhow::bail!("At least one shard endpoint must be configured");
        }

        let mut seen = HashSet::new();
        for endpoint in &self.shards {
            if !endpoint.rpc_url.starts_with("http") {
                anyhow::bail!(
                    "RPC URL for shard {} must start with http or https",
                    endpoint.shard
                );
            }
            if !seen.insert(endpoint.shard) {
                anyhow::bail!("Shard {} is configured more than once", endpoint.shard);
            }
            self.deployer
                .check_shard(ShardId::new(endpoint.shard))
                .context("Shard endpoint outside the deployable range")?;
        }

        self.deployer
            .validate()
            .context("Invalid deployer configuration")?;

        Ok(())
    }

    pub fn shard_endpoints(&self) -> HashMap<ShardId, String> {
        self.shards
            .iter()
            .map(|endpoint| (ShardId::new(endpoint.shard), endpoint.rpc_url.clone()))
            .collect()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Parse `1=http://a,2=http://b`
fn parse_shard_urls(value: &str) -> Result<Vec<ShardEndpoint>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (shard, url) = entry
                .split_once('=')
                .with_context(|| format!("Expected <shard>=<url>, got {entry}"))?;
            Ok(ShardEndpoint {
                shard: shard.trim().parse().with_context(|| format!("Invalid shard id: {shard}"))?,
                rpc_url: url.trim().to_string(),
            })
        })
        .collect()
}

// Default values
fn default_request_timeout_secs() -> u64 { 30 }
