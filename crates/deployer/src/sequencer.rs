//! Two-stage dependent deployments
//!
//! The second contract of a pair takes the first one's address as a constructor
//! argument. Its request only exists once the first deployment is confirmed.

use crate::{
    deployer::Deployer,
    types::{DeploymentRecord, DeploymentRequest, ShardId},
    DeployerError, Result,
};
use alloy_dyn_abi::DynSolValue;
use alloy_primitives::Address;
use serde::Serialize;
use tracing::{error, info, warn};

/// Constructor argument of a deployment template
#[derive(Debug, Clone)]
pub enum ConstructorArg {
    Value(DynSolValue),
    /// Replaced by the confirmed address of the first deployment
    DependencyAddress,
}

/// A deployment request whose constructor arguments are not yet complete
#[derive(Debug, Clone)]
pub struct DeploymentTemplate {
    base: DeploymentRequest,
    args: Vec<ConstructorArg>,
}

impl DeploymentTemplate {
    /// `base` supplies everything except the constructor arguments
    pub fn new(base: DeploymentRequest, args: Vec<ConstructorArg>) -> Self {
        Self { base, args }
    }

    pub fn shard(&self) -> ShardId {
        self.base.shard
    }

    pub fn has_placeholder(&self) -> bool {
        self.args
            .iter()
            .any(|arg| matches!(arg, ConstructorArg::DependencyAddress))
    }

    /// Build the concrete request with `dependency` substituted for every placeholder
    pub fn materialize(self, dependency: Address) -> DeploymentRequest {
        let constructor_args = self
            .args
            .into_iter()
            .map(|arg| match arg {
                ConstructorArg::Value(value) => value,
                ConstructorArg::DependencyAddress => DynSolValue::Address(dependency),
            })
            .collect();

        DeploymentRequest {
            constructor_args,
            ..self.base
        }
    }

    /// Check that the template encodes against its ABI before anything is spent
    fn check_encodable(&self) -> Result<()> {
        self.clone().materialize(Address::ZERO).init_code().map(|_| ())
    }
}

/// Two deployments where the second depends on the first one's address
#[derive(Debug, Clone)]
pub struct DependentPair {
    pub first: DeploymentRequest,
    pub second: DeploymentTemplate,
}

/// Records of a dependent pair; `second` is absent when the first did not confirm
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependentOutcome {
    pub first: DeploymentRecord,
    pub second: Option<DeploymentRecord>,
}

impl Deployer {
    /// Deploy `pair.first`, then `pair.second` with the first contract's address
    pub async fn deploy_dependent_pair(&self, pair: DependentPair) -> Result<DependentOutcome> {
        let DependentPair { first, second } = pair;

        if !second.has_placeholder() {
            return Err(DeployerError::MissingDependencyPlaceholder);
        }
        self.config().check_shard(second.shard())?;
        if let Some(salt) = second.base.salt {
            self.deriver().validate_salt(salt)?;
        }
        second.check_encodable()?;

        let first_shard = first.shard;
        let first = self.deploy(first).await?;

        let Some(dependency) = first.confirmed_address() else {
            warn!(
                "Dependency on shard {} ended {}, second deployment skipped",
                first_shard, first.final_state
            );
            return Ok(DependentOutcome {
                first,
                second: None,
            });
        };

        info!(
            "Dependency confirmed at {} on shard {}, deploying dependent to shard {}",
            dependency,
            first_shard,
            second.shard()
        );

        let second = match self.deploy(second.materialize(dependency)).await {
            Ok(record) => record,
            Err(e) => {
                error!("Dependent deployment failed after {} was confirmed: {}", dependency, e);
                return Err(e);
            }
        };

        Ok(DependentOutcome {
            first,
            second: Some(second),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ledger::{Faucet, LedgerClient, ShardRegistry},
        testing::{ScriptedFaucet, ScriptedLedger, SubmitBehaviour},
        types::{DeployMode, FinalState},
        DeployerConfig,
    };
    use alloy_json_abi::JsonAbi;
    use alloy_primitives::U256;
    use std::sync::Arc;

    const TOKEN: &[u8] = &[0x60, 0x01, 0x60, 0x02];
    const VAULT: &[u8] = &[0x60, 0x03, 0x60, 0x04];

    fn vault_abi() -> JsonAbi {
        serde_json::from_str::<JsonAbi>(
            r#"[{"type":"constructor","inputs":[{"name":"token","type":"address"},{"name":"cap","type":"uint256"}],"stateMutability":"nonpayable"}]"#,
        )
        .unwrap()
    }

    struct Harness {
        shard_one: Arc<ScriptedLedger>,
        shard_two: Arc<ScriptedLedger>,
        deployer: Deployer,
    }

    fn harness() -> Harness {
        let shard_one = Arc::new(ScriptedLedger::new(ShardId::new(1)));
        let shard_two = Arc::new(
            ScriptedLedger::new(ShardId::new(2))
                .with_receipt_delay(2)
                .with_gas_price(5_000)
                .with_chain_id(777),
        );
        let faucet = ScriptedFaucet::new(vec![Arc::clone(&shard_one), Arc::clone(&shard_two)]);
        let registry = ShardRegistry::from_clients([
            Arc::clone(&shard_one) as Arc<dyn LedgerClient>,
            Arc::clone(&shard_two) as Arc<dyn LedgerClient>,
        ]);
        let deployer = Deployer::new(
            DeployerConfig::default(),
            Arc::new(registry),
            Arc::new(faucet) as Arc<dyn Faucet>,
        )
        .unwrap();

        Harness {
            shard_one,
            shard_two,
            deployer,
        }
    }

    fn pair(args: Vec<ConstructorArg>) -> DependentPair {
        DependentPair {
            first: DeploymentRequest::new(TOKEN.to_vec(), ShardId::new(1)),
            second: DeploymentTemplate::new(
                DeploymentRequest::new(VAULT.to_vec(), ShardId::new(2)).with_constructor(vault_abi(), vec![]),
                args,
            ),
        }
    }

    fn vault_args() -> Vec<ConstructorArg> {
        vec![
            ConstructorArg::DependencyAddress,
            ConstructorArg::Value(DynSolValue::Uint(U256::from(1_000), 256)),
        ]
    }

    #[test]
    fn test_materialize_substitutes_placeholder() {
        let template = pair(vault_args()).second;
        assert!(template.has_placeholder());

        let dependency = Address::repeat_byte(0x33);
        let request = template.materialize(dependency);

        assert_eq!(request.constructor_args[0], DynSolValue::Address(dependency));
        assert_eq!(request.shard, ShardId::new(2));
        let code = request.init_code().unwrap();
        assert_eq!(&code[VAULT.len() + 12..VAULT.len() + 32], dependency.as_slice());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cross_shard_pair() {
        let h = harness();

        let outcome = h.deployer.deploy_dependent_pair(pair(vault_args())).await.unwrap();

        assert_eq!(outcome.first.final_state, FinalState::Confirmed);
        let second = outcome.second.unwrap();
        assert_eq!(second.final_state, FinalState::Confirmed);
        assert_eq!(second.shard, ShardId::new(2));

        let submitted = h.shard_two.submissions();
        assert_eq!(submitted.len(), 1);
        assert!(matches!(submitted[0].mode, DeployMode::External { address } if address == second.address));
        let code = &submitted[0].init_code;
        assert_eq!(
            &code[VAULT.len() + 12..VAULT.len() + 32],
            outcome.first.address.as_slice()
        );

        // each contract is priced and addressed with its own shard's parameters
        assert_eq!(outcome.first.fee_credit, U256::from(1_500));
        assert_eq!(second.fee_credit, U256::from(7_500));
        assert_eq!(submitted[0].fee_credit, U256::from(7_500));
        let expected = h
            .deployer
            .deriver()
            .derive(second.salt, code, ShardId::new(2), h.shard_two.chain_id())
            .unwrap();
        assert_eq!(second.address, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_first_never_touches_second() {
        let h = harness();
        h.shard_one
            .push_behaviour(SubmitBehaviour::Fail("reverted".to_string()));

        let outcome = h.deployer.deploy_dependent_pair(pair(vault_args())).await.unwrap();

        assert_eq!(outcome.first.final_state, FinalState::TransactionFailed);
        assert!(outcome.second.is_none());
        assert!(h.shard_two.submissions().is_empty());
        assert_eq!(h.shard_two.balance_reads(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_placeholder_rejected_up_front() {
        let h = harness();
        let args = vec![
            ConstructorArg::Value(DynSolValue::Address(Address::ZERO)),
            ConstructorArg::Value(DynSolValue::Uint(U256::from(1), 256)),
        ];

        let result = h.deployer.deploy_dependent_pair(pair(args)).await;

        assert!(matches!(result, Err(DeployerError::MissingDependencyPlaceholder)));
        assert!(h.shard_one.submissions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unencodable_second_rejected_up_front() {
        let h = harness();
        let args = vec![ConstructorArg::DependencyAddress];

        let result = h.deployer.deploy_dependent_pair(pair(args)).await;

        assert!(matches!(result, Err(DeployerError::Abi(_))));
        assert!(h.shard_one.submissions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_shard_out_of_range_rejected_up_front() {
        let h = harness();
        let mut pair = pair(vault_args());
        pair.second = DeploymentTemplate::new(
            DeploymentRequest::new(VAULT.to_vec(), ShardId::new(7)).with_constructor(vault_abi(), vec![]),
            vault_args(),
        );

        let result = h.deployer.deploy_dependent_pair(pair).await;

        assert!(matches!(result, Err(DeployerError::InvalidShard { .. })));
        assert!(h.shard_one.submissions().is_empty());
    }
}
