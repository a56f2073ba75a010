//! In-memory ledger and faucet for stateful tests

use crate::{
    address::shard_of,
    ledger::{Faucet, LedgerClient},
    types::{DeployMode, DeploymentTransaction, Receipt, ReceiptStatus, ShardId, Submission},
    DeployerError, Result,
};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use async_trait::async_trait;
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

/// What the ledger does with the next submitted deployment
#[derive(Debug, Clone)]
pub(crate) enum SubmitBehaviour {
    /// Deploy if the payer covers the fee credit, otherwise report insufficient funds
    Deploy,
    /// Report insufficient funds regardless of balance
    InsufficientFunds,
    /// Report a failed transaction
    Fail(String),
    /// Accept the transaction but never produce a receipt
    Never,
    /// Reject the submission at the transport level
    Error(String),
    /// Deploy at an address other than the requested one
    WrongAddress,
}

struct PendingTx {
    receipt: Receipt,
    address: Address,
    code: Option<Bytes>,
}

#[derive(Default)]
struct LedgerState {
    balances: HashMap<Address, U256>,
    code: HashMap<Address, Bytes>,
    pending: HashMap<B256, PendingTx>,
    receipt_reads: HashMap<B256, u32>,
    code_reads: HashMap<Address, u32>,
    behaviours: VecDeque<SubmitBehaviour>,
    submissions: Vec<DeploymentTransaction>,
    balance_reads: u32,
    balance_errors: u32,
    receipt_errors: u32,
    gas_price_error: bool,
}

/// Ledger whose observable effects lag behind submissions by a configurable number of reads
pub(crate) struct ScriptedLedger {
    shard: ShardId,
    chain_id: u64,
    gas_price: U256,
    receipt_delay: u32,
    code_delay: u32,
    state: Mutex<LedgerState>,
}

impl ScriptedLedger {
    pub(crate) fn new(shard: ShardId) -> Self {
        Self {
            shard,
            chain_id: 31337,
            gas_price: U256::from(1_000),
            receipt_delay: 0,
            code_delay: 0,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Receipt reads returning nothing before the receipt shows up
    pub(crate) fn with_receipt_delay(mut self, reads: u32) -> Self {
        self.receipt_delay = reads;
        self
    }

    /// Code reads returning empty code after the receipt shows up
    pub(crate) fn with_code_delay(mut self, reads: u32) -> Self {
        self.code_delay = reads;
        self
    }

    pub(crate) fn with_gas_price(mut self, gas_price: u64) -> Self {
        self.gas_price = U256::from(gas_price);
        self
    }

    pub(crate) fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    pub(crate) fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub(crate) fn push_behaviour(&self, behaviour: SubmitBehaviour) {
        self.state().behaviours.push_back(behaviour);
    }

    pub(crate) fn fail_balance_reads(&self, count: u32) {
        self.state().balance_errors = count;
    }

    pub(crate) fn fail_receipt_reads(&self, count: u32) {
        self.state().receipt_errors = count;
    }

    pub(crate) fn fail_gas_price(&self) {
        self.state().gas_price_error = true;
    }

    pub(crate) fn credit(&self, address: Address, amount: U256) {
        let mut state = self.state();
        let balance = state.balances.entry(address).or_default();
        *balance = balance.saturating_add(amount);
    }

    pub(crate) fn set_code(&self, address: Address, code: impl Into<Bytes>) {
        self.state().code.insert(address, code.into());
    }

    pub(crate) fn balance_of(&self, address: Address) -> U256 {
        self.state().balances.get(&address).copied().unwrap_or_default()
    }

    pub(crate) fn balance_reads(&self) -> u32 {
        self.state().balance_reads
    }

    pub(crate) fn submissions(&self) -> Vec<DeploymentTransaction> {
        self.state().submissions.clone()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap()
    }

    fn assigned_address(&self, deployer: Address, salt: U256) -> Address {
        let mut preimage = deployer.to_vec();
        preimage.extend_from_slice(&salt.to_be_bytes::<32>());
        let digest = keccak256(&preimage);

        let mut bytes = [0u8; 20];
        bytes[..2].copy_from_slice(&self.shard.to_be_bytes());
        bytes[2..].copy_from_slice(&digest[14..]);
        Address::from(bytes)
    }
}

#[async_trait]
impl LedgerClient for ScriptedLedger {
    fn shard(&self) -> ShardId {
        self.shard
    }

    async fn get_balance(&self, address: Address) -> Result<U256> {
        let mut state = self.state();
        state.balance_reads += 1;
        if state.balance_errors > 0 {
            state.balance_errors -= 1;
            return Err(DeployerError::Rpc("balance read failed".to_string()));
        }
        Ok(state.balances.get(&address).copied().unwrap_or_default())
    }

    async fn get_code(&self, address: Address) -> Result<Bytes> {
        let mut state = self.state();
        if let Some(code) = state.code.get(&address) {
            return Ok(code.clone());
        }

        let pending_code = state
            .pending
            .values()
            .find(|tx| tx.address == address)
            .and_then(|tx| tx.code.clone());
        let Some(code) = pending_code else {
            return Ok(Bytes::new());
        };

        let reads = state.code_reads.entry(address).or_default();
        *reads += 1;
        if *reads > self.code_delay {
            state.code.insert(address, code.clone());
            Ok(code)
        } else {
            Ok(Bytes::new())
        }
    }

    async fn get_gas_price(&self, shard: ShardId) -> Result<U256> {
        if self.state().gas_price_error || shard != self.shard {
            return Err(DeployerError::Rpc("gas price unavailable".to_string()));
        }
        Ok(self.gas_price)
    }

    async fn get_transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>> {
        let mut state = self.state();
        if state.receipt_errors > 0 {
            state.receipt_errors -= 1;
            return Err(DeployerError::Rpc("receipt read failed".to_string()));
        }

        let reads = state.receipt_reads.entry(hash).or_default();
        *reads += 1;
        if *reads <= self.receipt_delay {
            return Ok(None);
        }
        Ok(state.pending.get(&hash).map(|tx| tx.receipt.clone()))
    }

    async fn get_chain_id(&self) -> Result<u64> {
        Ok(self.chain_id)
    }

    async fn submit_deployment(&self, tx: &DeploymentTransaction) -> Result<Submission> {
        let (payer, address) = match tx.mode {
            DeployMode::Internal { deployer } => (deployer, self.assigned_address(deployer, tx.salt)),
            DeployMode::External { address } => (address, address),
        };

        let mut state = self.state();
        let behaviour = state
            .behaviours
            .pop_front()
            .unwrap_or(SubmitBehaviour::Deploy);

        if let SubmitBehaviour::Error(message) = &behaviour {
            return Err(DeployerError::Rpc(message.clone()));
        }

        state.submissions.push(tx.clone());
        let address = match behaviour {
            SubmitBehaviour::WrongAddress => Address::repeat_byte(0xee),
            _ => address,
        };

        let mut preimage = address.to_vec();
        preimage.extend_from_slice(&(state.submissions.len() as u64).to_be_bytes());
        let hash = keccak256(&preimage);

        let funded = state.balances.get(&payer).copied().unwrap_or_default() >= tx.fee_credit;
        let status = match behaviour {
            SubmitBehaviour::Deploy | SubmitBehaviour::WrongAddress if funded => {
                ReceiptStatus::Success
            }
            SubmitBehaviour::Deploy
            | SubmitBehaviour::WrongAddress
            | SubmitBehaviour::InsufficientFunds => ReceiptStatus::InsufficientFunds,
            SubmitBehaviour::Fail(reason) => ReceiptStatus::Failed { reason },
            SubmitBehaviour::Never | SubmitBehaviour::Error(_) => {
                return Ok(Submission { address, hash });
            }
        };

        let code = (status == ReceiptStatus::Success).then(|| tx.init_code.clone());
        state.pending.insert(
            hash,
            PendingTx {
                receipt: Receipt { hash, status },
                address,
                code,
            },
        );

        Ok(Submission { address, hash })
    }
}

/// Faucet crediting scripted ledgers directly
pub(crate) struct ScriptedFaucet {
    ledgers: Vec<Arc<ScriptedLedger>>,
    state: Mutex<FaucetState>,
}

#[derive(Default)]
struct FaucetState {
    calls: Vec<(Address, U256)>,
    fail_first: u32,
    dry: bool,
}

impl ScriptedFaucet {
    pub(crate) fn new(ledgers: Vec<Arc<ScriptedLedger>>) -> Self {
        Self {
            ledgers,
            state: Mutex::new(FaucetState::default()),
        }
    }

    /// Fail the first `count` requests at the transport level
    pub(crate) fn fail_first(self, count: u32) -> Self {
        self.state.lock().unwrap().fail_first = count;
        self
    }

    /// Acknowledge requests without ever crediting
    pub(crate) fn dry(self) -> Self {
        self.state.lock().unwrap().dry = true;
        self
    }

    pub(crate) fn calls(&self) -> Vec<(Address, U256)> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl Faucet for ScriptedFaucet {
    async fn request_funds(&self, address: Address, amount: U256, _token: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push((address, amount));

        if state.fail_first > 0 {
            state.fail_first -= 1;
            return Err(DeployerError::Faucet("faucet unavailable".to_string()));
        }
        if state.dry {
            return Ok(());
        }

        let shard = shard_of(&address);
        if let Some(ledger) = self
            .ledgers
            .iter()
            .find(|ledger| ledger.shard() == shard)
            .or_else(|| self.ledgers.first())
        {
            ledger.credit(address, amount);
        }
        Ok(())
    }
}
