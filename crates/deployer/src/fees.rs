//! Fee credit estimation

use crate::{ledger::LedgerClient, types::Ratio, DeployerError, Result};
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Complexity class of the contract being deployed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityClass {
    Simple,
    Token,
    Nft,
    #[default]
    Generic,
}

impl ComplexityClass {
    /// Multiplier applied to the gas price
    pub const fn multiplier(self) -> Ratio {
        match self {
            ComplexityClass::Simple => Ratio::new(6, 5),
            ComplexityClass::Token => Ratio::new(2, 1),
            ComplexityClass::Nft => Ratio::new(5, 2),
            ComplexityClass::Generic => Ratio::new(3, 2),
        }
    }
}

/// `ceil(gas_price * multiplier)` for the given class
pub fn fee_credit(gas_price: U256, class: ComplexityClass) -> U256 {
    class.multiplier().apply_ceil(gas_price)
}

/// Estimates fee credit from the current gas price of a shard
pub struct FeeEstimator {
    ledger: Arc<dyn LedgerClient>,
}

impl FeeEstimator {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self { ledger }
    }

    pub async fn estimate(&self, class: ComplexityClass) -> Result<U256> {
        let shard = self.ledger.shard();
        let gas_price = self
            .ledger
            .get_gas_price(shard)
            .await
            .map_err(|e| DeployerError::PriceUnavailable(e.to_string()))?;

        let fee = fee_credit(gas_price, class);
        debug!("Shard {} gas price {} -> fee credit {} ({:?})", shard, gas_price, fee, class);
        Ok(fee)
    }
}
