//! JSON-RPC adapters for the ledger and the faucet

use alloy_primitives::{Address, Bytes, B256, U256, U64};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use shard_deployer::{
    DeployMode, DeployerError, DeploymentTransaction, Faucet, LedgerClient, Receipt,
    ReceiptStatus, Result, ShardId, Submission,
};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tracing::debug;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Minimal JSON-RPC 2.0 transport over HTTP
struct RpcTransport {
    url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl RpcTransport {
    fn new(url: String, timeout: Duration) -> std::result::Result<Self, reqwest::Error> {
        Ok(Self {
            url,
            client: reqwest::Client::builder().timeout(timeout).build()?,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> std::result::Result<T, String> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        debug!("{} -> {} (id {})", self.url, method, id);

        let response: RpcResponse = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| format!("{method}: {e}"))?
            .json()
            .await
            .map_err(|e| format!("{method}: invalid response: {e}"))?;

        if let Some(error) = response.error {
            return Err(format!("{method}: {} (code {})", error.message, error.code));
        }

        serde_json::from_value(response.result).map_err(|e| format!("{method}: unexpected result: {e}"))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    status: U64,
    #[serde(default)]
    revert_reason: Option<String>,
}

impl From<RpcReceipt> for Receipt {
    fn from(receipt: RpcReceipt) -> Self {
        let status = if receipt.status == U64::from(1) {
            ReceiptStatus::Success
        } else {
            let reason = receipt.revert_reason.unwrap_or_default();
            if reason.to_lowercase().contains("insufficient funds") {
                ReceiptStatus::InsufficientFunds
            } else {
                ReceiptStatus::Failed { reason }
            }
        };

        Receipt {
            hash: receipt.transaction_hash,
            status,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcSubmission {
    address: Address,
    transaction_hash: B256,
}

/// Ledger client for one shard's JSON-RPC endpoint
pub struct JsonRpcLedgerClient {
    shard: ShardId,
    transport: RpcTransport,
}

impl JsonRpcLedgerClient {
    pub fn new(shard: ShardId, url: String, timeout: Duration) -> Result<Self> {
        let transport =
            RpcTransport::new(url, timeout).map_err(|e| DeployerError::Rpc(e.to_string()))?;
        Ok(Self { shard, transport })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        self.transport
            .call(method, params)
            .await
            .map_err(DeployerError::Rpc)
    }
}

#[async_trait]
impl LedgerClient for JsonRpcLedgerClient {
    fn shard(&self) -> ShardId {
        self.shard
    }

    async fn get_balance(&self, address: Address) -> Result<U256> {
        self.call("eth_getBalance", json!([address, "latest"])).await
    }

    async fn get_code(&self, address: Address) -> Result<Bytes> {
        self.call("eth_getCode", json!([address, "latest"])).await
    }

    async fn get_gas_price(&self, shard: ShardId) -> Result<U256> {
        if shard != self.shard {
            return Err(DeployerError::Rpc(format!(
                "client for shard {} asked for shard {shard} gas price",
                self.shard
            )));
        }
        self.call("eth_gasPrice", json!([])).await
    }

    async fn get_transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>> {
        let receipt: Option<RpcReceipt> = self.call("eth_getTransactionReceipt", json!([hash])).await?;
        Ok(receipt.map(Receipt::from))
    }

    async fn get_chain_id(&self) -> Result<u64> {
        let chain_id: U64 = self.call("eth_chainId", json!([])).await?;
        Ok(chain_id.to::<u64>())
    }

    async fn submit_deployment(&self, tx: &DeploymentTransaction) -> Result<Submission> {
        let submission: RpcSubmission = self
            .call("deployer_submitDeployment", json!([submission_params(tx)]))
            .await?;

        Ok(Submission {
            address: submission.address,
            hash: submission.transaction_hash,
        })
    }
}

fn submission_params(tx: &DeploymentTransaction) -> Value {
    let (mode, account) = match tx.mode {
        DeployMode::Internal { deployer } => ("internal", deployer),
        DeployMode::External { address } => ("external", address),
    };

    json!({
        "mode": mode,
        "account": account,
        "shard": tx.shard,
        "initCode": tx.init_code,
        "salt": tx.salt,
        "feeCredit": tx.fee_credit,
    })
}

/// Faucet reached over JSON-RPC
pub struct HttpFaucet {
    transport: RpcTransport,
}

impl HttpFaucet {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let transport =
            RpcTransport::new(url, timeout).map_err(|e| DeployerError::Faucet(e.to_string()))?;
        Ok(Self { transport })
    }
}

#[async_trait]
impl Faucet for HttpFaucet {
    async fn request_funds(&self, address: Address, amount: U256, token: &str) -> Result<()> {
        let _ack: Value = self
            .transport
            .call(
                "faucet_topUp",
                json!([{ "address": address, "amount": amount, "token": token }]),
            )
            .await
            .map_err(DeployerError::Faucet)?;
        Ok(())
    }
}
