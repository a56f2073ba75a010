//! Common types shared by the orchestration components

use crate::{strategy::DeploymentStrategy, DeployerError, Result};
use alloy_dyn_abi::{DynSolValue, JsonAbiExt};
use alloy_json_abi::JsonAbi;
use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

use crate::fees::ComplexityClass;

/// Identifier of a ledger shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardId(u16);

impl ShardId {
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u16 {
        self.0
    }

    pub const fn to_be_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for ShardId {
    fn from(id: u16) -> Self {
        Self(id)
    }
}

/// Exact integer ratio applied to currency amounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ratio {
    pub num: u64,
    pub den: u64,
}

impl Ratio {
    pub const fn new(num: u64, den: u64) -> Self {
        Self { num, den }
    }

    /// `ceil(value * num / den)`, saturating on overflow
    pub fn apply_ceil(self, value: U256) -> U256 {
        let den = U256::from(self.den.max(1));
        let scaled = value.saturating_mul(U256::from(self.num));
        let quotient = scaled / den;
        if (scaled % den).is_zero() {
            quotient
        } else {
            quotient + U256::from(1)
        }
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// A request to deploy one contract
#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    /// Contract creation bytecode without constructor arguments
    pub bytecode: Bytes,

    /// Contract ABI, used to encode constructor arguments
    pub abi: JsonAbi,

    /// Constructor arguments in declaration order
    pub constructor_args: Vec<DynSolValue>,

    /// Target shard
    pub shard: ShardId,

    /// Fixed salt for deterministic redeploys; drawn at random when absent
    pub salt: Option<u64>,

    /// Fee credit to use instead of querying the gas price
    pub fee_credit_hint: Option<U256>,

    /// Requested deployment strategy
    pub strategy: DeploymentStrategy,

    /// Complexity class used for fee estimation
    pub complexity: ComplexityClass,

    /// Overall deadline, measured from the start of the deployment
    pub deadline: Option<Duration>,
}

impl DeploymentRequest {
    pub fn new(bytecode: impl Into<Bytes>, shard: ShardId) -> Self {
        Self {
            bytecode: bytecode.into(),
            abi: JsonAbi::default(),
            constructor_args: Vec::new(),
            shard,
            salt: None,
            fee_credit_hint: None,
            strategy: DeploymentStrategy::default(),
            complexity: ComplexityClass::default(),
            deadline: None,
        }
    }

    pub fn with_constructor(mut self, abi: JsonAbi, args: Vec<DynSolValue>) -> Self {
        self.abi = abi;
        self.constructor_args = args;
        self
    }

    pub fn with_salt(mut self, salt: u64) -> Self {
        self.salt = Some(salt);
        self
    }

    pub fn with_fee_credit(mut self, fee_credit: U256) -> Self {
        self.fee_credit_hint = Some(fee_credit);
        self
    }

    pub fn with_strategy(mut self, strategy: DeploymentStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_complexity(mut self, complexity: ComplexityClass) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Bytecode followed by the ABI-encoded constructor arguments
    pub fn init_code(&self) -> Result<Bytes> {
        if self.bytecode.is_empty() {
            return Err(DeployerError::EmptyBytecode);
        }

        if self.constructor_args.is_empty() {
            return Ok(self.bytecode.clone());
        }

        let constructor = self.abi.constructor().ok_or_else(|| {
            DeployerError::Abi("ABI declares no constructor but arguments were given".to_string())
        })?;
        let encoded = constructor.abi_encode_input(&self.constructor_args)?;

        let mut code = Vec::with_capacity(self.bytecode.len() + encoded.len());
        code.extend_from_slice(&self.bytecode);
        code.extend_from_slice(&encoded);
        Ok(code.into())
    }
}

/// How a deployment transaction is routed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeployMode {
    /// Submitted through an ephemeral deployer account; the ledger assigns the address
    Internal { deployer: Address },
    /// Self-paying deployment to a pre-derived, pre-funded address
    External { address: Address },
}

/// Deployment transaction handed to the ledger client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTransaction {
    pub mode: DeployMode,
    pub shard: ShardId,
    pub init_code: Bytes,
    pub salt: U256,
    pub fee_credit: U256,
}

/// Ledger acknowledgement of a submitted deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub address: Address,
    pub hash: B256,
}

/// Status reported by a transaction receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptStatus {
    Success,
    InsufficientFunds,
    Failed { reason: String },
}

/// Transaction receipt as observed on the read path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub hash: B256,
    pub status: ReceiptStatus,
}

/// Terminal state of one orchestration cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinalState {
    Confirmed,
    TimedOut,
    InsufficientFunds,
    TransactionFailed,
    FundingExhausted,
    SubmissionFailed { reason: String },
}

impl FinalState {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, FinalState::Confirmed)
    }
}

impl fmt::Display for FinalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalState::Confirmed => write!(f, "confirmed"),
            FinalState::TimedOut => write!(f, "timed out"),
            FinalState::InsufficientFunds => write!(f, "insufficient funds"),
            FinalState::TransactionFailed => write!(f, "transaction failed"),
            FinalState::FundingExhausted => write!(f, "funding exhausted"),
            FinalState::SubmissionFailed { reason } => write!(f, "submission failed: {reason}"),
        }
    }
}

/// Result of one deployment, returned to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub address: Address,
    pub transaction_hash: Option<B256>,
    pub shard: ShardId,
    pub strategy_used: DeploymentStrategy,
    pub final_state: FinalState,
    pub salt: u64,
    pub fee_credit: U256,
}

impl DeploymentRecord {
    /// Address of the contract, only once it is confirmed
    pub fn confirmed_address(&self) -> Option<Address> {
        self.final_state.is_confirmed().then_some(self.address)
    }
}
