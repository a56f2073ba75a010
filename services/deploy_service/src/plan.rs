//! Deployment plans read from TOML files

use alloy_dyn_abi::{DynSolType, Specifier};
use alloy_json_abi::JsonAbi;
use alloy_primitives::{Bytes, U256};
use anyhow::{Context, Result};
use serde::Deserialize;
use shard_deployer::{
    ComplexityClass, ConstructorArg, DependentPair, DeploymentRequest, DeploymentStrategy,
    DeploymentTemplate, ShardId,
};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

/// Constructor argument replaced by the first contract's address
pub const DEPENDENCY_PLACEHOLDER: &str = "$dependency";

/// Plan for a single deployment
#[derive(Debug, Deserialize)]
pub struct DeployPlan {
    pub contract: ContractPlan,
}

/// Plan for a dependent pair
#[derive(Debug, Deserialize)]
pub struct PairPlan {
    pub first: ContractPlan,
    pub second: ContractPlan,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractPlan {
    /// File holding the creation bytecode as hex
    pub bytecode: PathBuf,

    /// ABI JSON file; required when constructor arguments are given
    pub abi: Option<PathBuf>,

    /// Constructor arguments, coerced against the ABI constructor inputs
    #[serde(default)]
    pub args: Vec<String>,

    pub shard: u16,

    pub salt: Option<u64>,

    /// Fee credit override, decimal or 0x-prefixed hex
    pub fee_credit: Option<String>,

    #[serde(default)]
    pub strategy: DeploymentStrategy,

    #[serde(default)]
    pub complexity: ComplexityClass,

    pub deadline_secs: Option<u64>,
}

impl DeployPlan {
    pub fn load(path: &Path) -> Result<(Self, PathBuf)> {
        load_toml(path)
    }
}

impl PairPlan {
    pub fn load(path: &Path) -> Result<(Self, PathBuf)> {
        load_toml(path)
    }

    pub fn into_pair(self, base_dir: &Path) -> Result<DependentPair> {
        Ok(DependentPair {
            first: self
                .first
                .into_request(base_dir)
                .context("Invalid first contract")?,
            second: self
                .second
                .into_template(base_dir)
                .context("Invalid second contract")?,
        })
    }
}

impl ContractPlan {
    /// Request with every constructor argument resolved
    pub fn into_request(self, base_dir: &Path) -> Result<DeploymentRequest> {
        let (base, abi) = self.base_request(base_dir)?;
        let types = constructor_types(&abi, self.args.len())?;

        let values = self
            .args
            .iter()
            .zip(&types)
            .map(|(arg, ty)| {
                if arg == DEPENDENCY_PLACEHOLDER {
                    anyhow::bail!("{DEPENDENCY_PLACEHOLDER} is only allowed in the second contract of a pair");
                }
                ty.coerce_str(arg)
                    .with_context(|| format!("Cannot parse {arg:?} as {ty}"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(base.with_constructor(abi, values))
    }

    /// Template whose placeholder arguments wait for the dependency address
    pub fn into_template(self, base_dir: &Path) -> Result<DeploymentTemplate> {
        let (base, abi) = self.base_request(base_dir)?;
        let types = constructor_types(&abi, self.args.len())?;

        let args = self
            .args
            .iter()
            .zip(&types)
            .map(|(arg, ty)| {
                if arg == DEPENDENCY_PLACEHOLDER {
                    if *ty != DynSolType::Address {
                        anyhow::bail!("{DEPENDENCY_PLACEHOLDER} must fill an address parameter, not {ty}");
                    }
                    return Ok(ConstructorArg::DependencyAddress);
                }
                ty.coerce_str(arg)
                    .map(ConstructorArg::Value)
                    .with_context(|| format!("Cannot parse {arg:?} as {ty}"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(DeploymentTemplate::new(base.with_constructor(abi, Vec::new()), args))
    }

    fn base_request(&self, base_dir: &Path) -> Result<(DeploymentRequest, JsonAbi)> {
        let bytecode = read_bytecode(&base_dir.join(&self.bytecode))?;
        let abi = match &self.abi {
            Some(path) => read_abi(&base_dir.join(path))?,
            None => JsonAbi::default(),
        };

        let mut request = DeploymentRequest::new(bytecode, ShardId::new(self.shard))
            .with_strategy(self.strategy)
            .with_complexity(self.complexity);

        if let Some(salt) = self.salt {
            request = request.with_salt(salt);
        }
        if let Some(fee_credit) = &self.fee_credit {
            let fee_credit: U256 = fee_credit
                .parse()
                .with_context(|| format!("Invalid fee credit: {fee_credit}"))?;
            request = request.with_fee_credit(fee_credit);
        }
        if let Some(secs) = self.deadline_secs {
            request = request.with_deadline(Duration::from_secs(secs));
        }

        Ok((request, abi))
    }
}

fn load_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<(T, PathBuf)> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan file: {}", path.display()))?;
    let plan = toml::from_str(&content)
        .with_context(|| format!("Failed to parse plan file: {}", path.display()))?;
    let base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    Ok((plan, base_dir))
}

fn read_bytecode(path: &Path) -> Result<Bytes> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read bytecode file: {}", path.display()))?;
    let trimmed = content.trim();
    let hex_str = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(hex_str)
        .with_context(|| format!("Bytecode file is not valid hex: {}", path.display()))?;
    Ok(bytes.into())
}

fn read_abi(path: &Path) -> Result<JsonAbi> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read ABI file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse ABI file: {}", path.display()))
}

/// Resolved constructor input types, checked against the argument count
fn constructor_types(abi: &JsonAbi, arg_count: usize) -> Result<Vec<DynSolType>> {
    let inputs = abi
        .constructor()
        .map(|constructor| constructor.inputs.as_slice())
        .unwrap_or_default();

    if inputs.len() != arg_count {
        anyhow::bail!(
            "Constructor takes {} argument(s) but the plan gives {}",
            inputs.len(),
            arg_count
        );
    }

    inputs
        .iter()
        .map(|param| {
            param
                .resolve()
                .with_context(|| format!("Unsupported constructor parameter type {}", param.ty))
        })
        .collect()
}
